//! Hindsight DNS - synthesizes PTR records from live DNS resolution
//! telemetry and publishes them into a response policy zone.
//!
//! A recursive resolver's dnstap (or equivalent) telemetry is a running
//! record of which forward names its clients resolved to which addresses.
//! This agent watches that stream and maintains a reverse-mapping overlay:
//! when a client later asks "who is 10.2.66.5?", the resolver can answer
//! with the most recently and most confidently observed forward name that
//! led there, instead of the generic registrar PTR.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        hindsight-dns                           │
//! │                                                                │
//! │  telemetry ──▶ ┌──────────────────┐    ┌──────────────────┐    │
//! │  (JSON/UDP)    │ AssociationStore │───▶│  RefreshBatcher  │    │
//! │                │  + EvictionQueue │    │ (bounded batches)│    │
//! │                └────────┬─────────┘    └────────┬─────────┘    │
//! │                         │ shear / recycle       │ RFC 2136     │
//! │                         ▼                       ▼              │
//! │                ┌──────────────────┐    ┌──────────────────┐    │
//! │  console ─────▶│    ZoneView      │◀───│  update client   │──▶ zone
//! │  (TCP)         │  (RPZ mirror)    │    │  (TCP, one txn   │   master
//! │                └──────────────────┘    │   in flight)     │    │
//! │                                        └──────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The association store ranks every observed resolution with a
//! time-decayed heuristic and enforces a bound on the total resolution
//! count: under pressure it shears the lowest-scoring resolutions from the
//! most idle addresses, recycling survivors and deleting emptied entries.
//! Shorn and re-ranked addresses accumulate into batches, each committed to
//! the zone master as one dynamic-update transaction; the in-memory zone
//! view advances only on success, and any drift between the two views is
//! observable through the diagnostic console.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use hindsight_dns::{Agent, AgentConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: AgentConfig = todo!("load from TOML");
//!     let agent = Agent::new(config).unwrap();
//!     agent.run(CancellationToken::new()).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod agent;
pub mod batch;
pub mod config;
pub mod console;
pub mod error;
pub mod heuristic;
pub mod ingest;
pub mod metrics;
pub mod queue;
pub mod store;
pub mod telemetry;
pub mod update;
pub mod zone;

// Re-export main types
pub use agent::Agent;
pub use config::{AgentConfig, Config, TelemetryConfig};
pub use error::AgentError;
pub use store::AssociationStore;
