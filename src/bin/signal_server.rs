//! Signaling server binary
//!
//! ```bash
//! # Defaults: 0.0.0.0:3001
//! signal-server
//!
//! # Custom port and connection limit
//! PORT=8080 signal-server --max-connections 500
//!
//! # Verbose logging
//! RUST_LOG=livesignal=debug signal-server
//! ```

use std::net::{IpAddr, SocketAddr};

use clap::Parser;
use livesignal::server::config::{DEFAULT_OUTBOUND_QUEUE, DEFAULT_PORT};
use livesignal::server::{ServerConfig, SignalingServer};
use tracing_subscriber::EnvFilter;

/// Live broadcast signaling server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Interface to listen on
    #[arg(long, default_value = "0.0.0.0", env = "BIND_ADDR")]
    bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "PORT")]
    port: u16,

    /// Maximum concurrent connections (0 = unlimited)
    #[arg(long, default_value_t = 0, env = "MAX_CONNECTIONS")]
    max_connections: usize,

    /// Outbound messages buffered per connection
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_QUEUE, env = "OUTBOUND_QUEUE")]
    outbound_queue: usize,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "livesignal=info,signal_server=info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = ServerConfig::default()
        .bind(SocketAddr::new(args.bind, args.port))
        .max_connections(args.max_connections)
        .outbound_queue(args.outbound_queue);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.bind_addr,
        max_connections = config.max_connections,
        "Signaling server starting"
    );

    let server = SignalingServer::new(config);
    let service = server.service().clone();

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    let stats = service.stats().await;
    tracing::info!(
        total_connections = stats.total_connections,
        relayed_signals = stats.relayed_signals,
        "Signaling server stopped"
    );

    Ok(())
}
