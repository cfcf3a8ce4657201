//! Error types for hindsight-dns.

use thiserror::Error;

/// Errors that can occur in the agent.
///
/// Most variants are recoverable: the engine drops the offending event or
/// batch and keeps consuming telemetry. `Invariant` is the exception; it
/// means the engine state is no longer trustworthy and the process should
/// fail fast.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Malformed telemetry (bad address literal, empty chain, empty label).
    /// The event is dropped and counted; engine state is untouched.
    #[error("invalid telemetry: {0}")]
    InvalidTelemetry(String),

    /// Unexpected content encountered while reading the zone at startup.
    #[error("zone reload anomaly: {0}")]
    ZoneReload(String),

    /// Timeout, connection failure, or error rcode on a dynamic update.
    /// The batch completes with the error recorded; the zone view is not
    /// advanced.
    #[error("update transport failure: {0}")]
    UpdateTransport(String),

    /// Engine state desync (queue/store mismatch, dangling best pointer).
    /// Fatal.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}
