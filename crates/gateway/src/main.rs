use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use tg_core::config::GatewayConfig;
use tg_core::logging;
use tg_gateway::server::Gateway;

#[derive(Parser, Debug)]
#[command(name = "tg-gateway", about = "WebSocket trading gateway")]
struct Cli {
    /// Path to a TOML configuration file. Settings can also be supplied via
    /// TG_-prefixed environment variables.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit human-readable logs instead of JSON.
    #[arg(long)]
    pretty_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(!cli.pretty_logs);

    let config = GatewayConfig::load(cli.config)?;
    tracing::info!(
        brokers = ?config.broker_ids(),
        data_dir = %config.gateway.data_dir.display(),
        "configuration loaded"
    );

    let gateway = Gateway::start(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    gateway.shutdown().await;
    Ok(())
}
