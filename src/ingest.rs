//! Telemetry ingress.
//!
//! One datagram per client response, JSON over UDP:
//!
//! ```json
//! {"address": "10.2.66.5", "chain": ["a.example.", "www.a.example."]}
//! ```
//!
//! On the wire the chain runs terminal name first (the name closest to the
//! address) and original query name last. Internally chains are stored the
//! other way around, so parsing reverses them. Addresses are literal v4
//! dotted-quad or v6 text; any parseable form is accepted and collapsed to
//! its canonical representation, anything else is invalid telemetry.
//!
//! A dnstap-shaped streamed ingress carries the same payload; an external
//! adapter can decode it and feed the same channel.

use std::net::IpAddr;

use serde::Deserialize;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::AgentError;
use crate::metrics;

/// Largest accepted telemetry datagram.
pub const MAX_DATAGRAM: usize = 8192;

#[derive(Debug, Deserialize)]
struct WireObservation {
    address: String,
    chain: Vec<String>,
}

/// One validated telemetry event.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Canonicalized client-observed address.
    pub address: IpAddr,
    /// Forward chain, query name first, terminal name last. Names are
    /// lowercase absolute FQDNs.
    pub chain: Vec<String>,
}

/// Parse and validate one telemetry datagram.
pub fn parse_datagram(payload: &[u8]) -> Result<Observation, AgentError> {
    let wire: WireObservation = serde_json::from_slice(payload)
        .map_err(|e| AgentError::InvalidTelemetry(format!("bad JSON: {e}")))?;

    let address: IpAddr = wire
        .address
        .trim()
        .parse()
        .map_err(|_| AgentError::InvalidTelemetry(format!("bad address {:?}", wire.address)))?;

    if wire.chain.is_empty() {
        return Err(AgentError::InvalidTelemetry("empty chain".to_string()));
    }

    let mut chain = Vec::with_capacity(wire.chain.len());
    for name in wire.chain.iter().rev() {
        chain.push(normalize_fqdn(name)?);
    }

    Ok(Observation { address, chain })
}

/// Normalize a name to a lowercase absolute FQDN, rejecting empty labels
/// and oversized names.
pub fn normalize_fqdn(name: &str) -> Result<String, AgentError> {
    let lowered = name.trim().to_ascii_lowercase();
    let stem = lowered.strip_suffix('.').unwrap_or(&lowered);
    if stem.is_empty() {
        return Err(AgentError::InvalidTelemetry(format!("empty name {name:?}")));
    }
    if stem.len() > 253 {
        return Err(AgentError::InvalidTelemetry(format!("oversized name {name:?}")));
    }
    for label in stem.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(AgentError::InvalidTelemetry(format!(
                "bad label in name {name:?}"
            )));
        }
    }
    Ok(format!("{stem}."))
}

/// Receive telemetry datagrams until shutdown, forwarding valid
/// observations into the engine channel. Invalid datagrams are counted and
/// dropped without disturbing anything.
pub async fn run_udp_listener(
    socket: UdpSocket,
    tx: mpsc::Sender<Observation>,
    shutdown: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("telemetry listener shutting down");
                return;
            }

            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, peer)) => match parse_datagram(&buf[..len]) {
                        Ok(observation) => {
                            if tx.send(observation).await.is_err() {
                                info!("engine channel closed, telemetry listener exiting");
                                return;
                            }
                        }
                        Err(e) => {
                            metrics::record_invalid_telemetry();
                            warn!(%peer, error = %e, "dropping telemetry datagram");
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "telemetry socket receive error");
                    }
                }
            }
        }
    }
}
