mod server;
mod supervisor;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use streamgate_core::{bootstrap::load_config, logging};

use server::StreamgateServer;

#[derive(Parser, Debug)]
#[command(name = "streamgate")]
#[command(about = "Static delivery server for the streaming client", long_about = None)]
struct Args {
    /// Config file (yaml or json)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;

    info!("Starting Streamgate server...");

    // 3. TLS crypto provider, required before any certificate is loaded
    if rustls::crypto::CryptoProvider::get_default().is_none()
        && rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
    {
        warn!("Failed to install rustls ring crypto provider");
    }

    // 4. Serve until a shutdown signal
    let server = StreamgateServer::new(config)?;
    server.start().await?;

    info!("Streamgate server exited");
    Ok(())
}
