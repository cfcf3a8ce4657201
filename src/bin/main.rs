//! hindsight-dns binary entry point.

use clap::Parser;
use hindsight_dns::{telemetry, Agent, Config};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// PTR-synthesis agent: turns live DNS resolution telemetry into a
/// reverse-mapping response policy zone.
#[derive(Parser, Debug)]
#[command(name = "hindsight-dns")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "hindsight-dns.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("HINDSIGHT_DNS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        zone = %config.agent.zone_name,
        listen_addr = %config.agent.listen_addr,
        update_target = %config.agent.update_target,
        "Starting hindsight-dns"
    );

    // Setup graceful shutdown
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    // Run the agent
    let agent = Agent::new(config.agent)?;
    let result = agent.run(shutdown).await;

    if let Err(e) = result {
        error!("agent error: {}", e);
        return Err(e.into());
    }

    info!("hindsight-dns shutdown complete");
    Ok(())
}
