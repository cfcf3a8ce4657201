//! Configuration types for hindsight-dns.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::AgentError;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Agent configuration.
    pub agent: AgentConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name of the response policy zone that receives synthesized PTR
    /// records (e.g. "rpz.example.com").
    pub zone_name: String,

    /// Address of the zone master that accepts dynamic updates.
    pub update_target: SocketAddr,

    /// Path to the zone master file, read once at startup to seed the
    /// in-memory views. Optional; the agent starts cold without it.
    #[serde(default)]
    pub zone_file: Option<PathBuf>,

    /// Address for the JSON/UDP telemetry listener.
    pub listen_addr: SocketAddr,

    /// Optional address for the interactive diagnostic console.
    #[serde(default)]
    pub console_addr: Option<SocketAddr>,

    /// Upper bound on the total resolution count held in memory.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Hard cap on addresses per zone-refresh batch.
    #[serde(default = "default_batch_update_size")]
    pub batch_update_size: usize,

    /// Minimum seconds between batch writes.
    #[serde(default = "default_batch_update_frequency")]
    pub batch_update_frequency: u64,

    /// Fractional fill (0.0-1.0) a batch needs before it writes on its
    /// timer. A batch at the hard cap writes regardless.
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: f64,

    /// Number of eviction events retained for diagnostics.
    #[serde(default = "default_log_size")]
    pub eviction_log_size: usize,

    /// Number of completed batch records retained for diagnostics.
    #[serde(default = "default_log_size")]
    pub refresh_log_size: usize,

    /// Exponential weight applied to the inter-query gap when updating a
    /// resolution's trend.
    #[serde(default = "default_trending_alpha")]
    pub trending_alpha: f64,

    /// Seconds to wait for a dynamic-update response before the batch is
    /// failed with a transport error.
    #[serde(default = "default_update_timeout")]
    pub update_timeout: u64,

    /// TTL for published PTR and TXT records, in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Whether unrecognized zone records are logged at startup.
    #[serde(default = "default_log_garbage")]
    pub log_garbage: bool,
}

impl AgentConfig {
    /// Validate value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), AgentError> {
        if !(0.0..=1.0).contains(&self.batch_threshold) {
            return Err(AgentError::Config(format!(
                "batch_threshold must be within 0.0..=1.0, got {}",
                self.batch_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.trending_alpha) {
            return Err(AgentError::Config(format!(
                "trending_alpha must be within 0.0..=1.0, got {}",
                self.trending_alpha
            )));
        }
        if self.batch_update_size == 0 {
            return Err(AgentError::Config(
                "batch_update_size must be at least 1".to_string(),
            ));
        }
        if self.zone_name.trim_matches('.').is_empty() {
            return Err(AgentError::Config("zone_name must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "hindsight_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cache_size() -> usize {
    10_000
}

fn default_batch_update_size() -> usize {
    32
}

fn default_batch_update_frequency() -> u64 {
    60
}

fn default_batch_threshold() -> f64 {
    0.1
}

fn default_log_size() -> usize {
    10
}

fn default_trending_alpha() -> f64 {
    0.1
}

fn default_update_timeout() -> u64 {
    30
}

fn default_ttl() -> u32 {
    600
}

fn default_log_garbage() -> bool {
    true
}
