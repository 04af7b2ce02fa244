//! Self-hosted signaling service
//!
//! Serves the same offer/answer routes as the hosted service from memory.
//! Point callers at it with `--signaling-url http://<addr>`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comms_link::signaling::{server, MemorySignaling};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let store = Arc::new(MemorySignaling::new());

    tokio::select! {
        result = server::serve(args.bind, store) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down signaling server"),
    }
    Ok(())
}
