//! Comms Link caller
//!
//! Joins a session on the signaling service, negotiates a peer connection
//! and streams microphone audio both ways until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use comms_link::{
    audio::{AudioHost, DeviceRole, DeviceSelector},
    call::Call,
    config::AppConfig,
    session::Session,
    signaling::{HttpSignalingClient, SignalingService},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Session name shared with the other peer
    #[arg(short, long, env = "COMMS_LINK_NAME", required_unless_present = "list_devices")]
    name: Option<String>,

    /// Session password
    #[arg(short, long, env = "COMMS_LINK_PASSWORD", default_value = "")]
    password: String,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capture device name, empty for the system default
    #[arg(long)]
    input_device: Option<String>,

    /// Playback device name, empty for the system default
    #[arg(long)]
    output_device: Option<String>,

    /// Signaling service base URL
    #[arg(long)]
    signaling_url: Option<String>,

    /// Print the available devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn print_devices(host: &AudioHost) -> Result<()> {
    let selector = DeviceSelector::new(host);
    println!("\n=== Audio Devices ({}) ===", host.backend_name());
    for role in [DeviceRole::Input, DeviceRole::Output] {
        println!("{}:", role);
        for device in selector.list_devices(role)? {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}", device.name, default_marker);
            println!("    ID: {}", device.id);
        }
    }
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let host = Arc::new(AudioHost::new());

    if args.list_devices {
        return print_devices(&host);
    }

    let mut config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    if let Some(name) = args.input_device {
        config.audio.input_device = name;
    }
    if let Some(name) = args.output_device {
        config.audio.output_device = name;
    }
    if let Some(url) = args.signaling_url {
        config.signaling.base_url = url;
    }

    let session = Session::new(args.name.unwrap_or_default(), args.password);
    tracing::info!("Starting Comms Link, session \"{}\"", session.name());

    let signaling: Arc<dyn SignalingService> = Arc::new(HttpSignalingClient::new(&config.signaling)?);
    let mut call = Call::new(&config, host, signaling).await?;

    for role in [DeviceRole::Input, DeviceRole::Output] {
        if let Some(device) = call.device(role) {
            tracing::info!("{} device: {}", role, device.name);
        }
    }

    let shutdown = call.shutdown_signal();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            ctrl_c.trigger();
        }
    });

    match call.connect(&session).await {
        Ok(state) => tracing::info!("Call {} as {:?}", state, call.role()),
        Err(e) => {
            tracing::error!("Connection failed: {}", e);
            call.hangup().await?;
            return Err(e.into());
        }
    }

    let mut report = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            state = call.ended() => {
                tracing::warn!("Peer connection {:?}", state);
                break;
            }
            _ = report.tick() => {
                call.report_stream_errors();
                let metrics = call.metrics();
                tracing::debug!(
                    sent = metrics.packets_sent,
                    received = metrics.packets_received,
                    dropped = metrics.capture_dropped,
                    silenced = metrics.playback_silenced,
                    concealed = metrics.frames_concealed,
                    "Call stats"
                );
            }
        }
    }

    call.hangup().await?;
    tracing::info!("Comms Link stopped");
    Ok(())
}
