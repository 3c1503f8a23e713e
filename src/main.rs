//! Relay daemon
//!
//! Run with: foreverfm-relay [--config config.json] [--stats stats.json]
//!
//! Environment:
//!   URL        upstream host (default from config, else forever.fm)
//!   RELAY_URL  address announced upstream as X-Relay-Addr
//!   PORT       listening port
//!   RUST_LOG   log filter (default foreverfm_relay=info)

use std::path::PathBuf;

use clap::Parser;

use foreverfm_relay::{Relay, RelayConfig};

#[derive(Debug, Parser)]
#[command(name = "foreverfm-relay", version, about = "Relay a radio stream to many listeners")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Statistics file (overrides the config)
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Cross-domain policy file (overrides the config)
    #[arg(long)]
    crossdomain: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("foreverfm_relay=info".parse()?),
        )
        .init();

    let mut config = RelayConfig::load(&args.config)?.with_env_overrides()?;
    if let Some(stats) = args.stats {
        config.stats_path = stats;
    }
    if let Some(crossdomain) = args.crossdomain {
        config.crossdomain_path = crossdomain;
    }

    tracing::info!(
        upstream = %config.upstream_url(),
        port = config.port,
        listener_limit = config.listener_limit,
        "Starting relay"
    );

    let relay = Relay::new(config)?;
    relay
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
