//! service-gateway binary.
//!
//! ```text
//! --config <file> → config::load (file, env overrides, validation)
//!     → logging → bind → GatewayServer::run until SIGTERM / Ctrl+C
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use service_gateway::{config, observability, GatewayServer, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "service-gateway", version, about = "HTTP gateway request pipeline")]
struct Cli {
    /// TOML config file. Defaults apply when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;

    observability::init(config.observability.log_format)?;

    tracing::info!("service-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        auth_header = %config.auth.header,
        request_timeout_secs = config.timeouts.request_secs,
        pacing_ms = config.streaming.pacing_ms,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = GatewayServer::new(config)?;

    let shutdown = Shutdown::new();
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
