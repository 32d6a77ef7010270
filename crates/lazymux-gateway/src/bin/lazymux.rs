//! Lazymux gateway binary
//!
//! Usage:
//!   lazymux --config config.json
//!   lazymux --config config.json --log-level debug

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use lazymux_core::LazymuxConfig;
use lazymux_gateway::logging::{self, LoggingConfig};
use lazymux_gateway::GatewayServer;

#[derive(Parser)]
#[command(name = "lazymux")]
#[command(about = "Lazy-loading MCP aggregator with a two-tool hierarchy", version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "LAZYMUX_CONFIG")]
    config: PathBuf,

    /// Log level (overrides mcpProxy.options.logLevel; RUST_LOG wins over both)
    #[arg(long, env = "LAZYMUX_LOG_LEVEL")]
    log_level: Option<String>,

    /// Directory for rotated log files (overrides mcpProxy.options.logDir)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = LazymuxConfig::load(&cli.config)?;

    let options = &config.proxy.options;
    let _guard = logging::init(&LoggingConfig {
        level: cli.log_level.unwrap_or_else(|| options.log_level.clone()),
        dir: cli.log_dir.or_else(|| options.log_dir.clone()),
        ansi: false,
    })?;

    info!(
        config = %cli.config.display(),
        servers = config.servers.len(),
        transport = ?config.proxy.transport,
        "Starting lazymux v{}",
        env!("CARGO_PKG_VERSION")
    );

    GatewayServer::from_config(config)?.run().await
}
