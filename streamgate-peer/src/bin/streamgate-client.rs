use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use streamgate_core::{bootstrap::load_config, logging};
use streamgate_peer::{LoggingSink, PeerSession, StreamId};

#[derive(Parser, Debug)]
#[command(name = "streamgate-client")]
#[command(about = "Negotiate a WebRTC session with the streaming engine", long_about = None)]
struct Args {
    /// Config file (yaml or json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stream id to receive; defaults to client.default_stream
    #[arg(short, long)]
    stream: Option<String>,

    /// Log negotiation diagnostics at info level
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if args.debug {
        config.client.debug = true;
    }
    logging::init_logging(&config.logging)?;

    let stream_id = StreamId::new(
        args.stream
            .unwrap_or_else(|| config.client.default_stream.clone()),
    );
    info!(stream = %stream_id, server = %config.signaling_base_url(), "Starting client");

    let sink = Arc::new(LoggingSink::new());
    let session = PeerSession::connect(&config, stream_id, sink.clone()).await?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
            info!("Received Ctrl+C, closing session");
        }
        () = session.closed() => {
            info!("Peer connection closed");
        }
    }

    let state = session.state();
    info!(
        phase = ?state.phase(),
        rounds = state.rounds(),
        bindings = sink.bindings(),
        "Session summary"
    );
    for (track_id, stats) in sink.stats() {
        info!(
            track_id = %track_id,
            packets = stats.packets,
            bytes = stats.bytes,
            "Track summary"
        );
    }

    session.close().await?;
    Ok(())
}
