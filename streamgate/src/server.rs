//! Server lifecycle management
//!
//! Manages the startup and shutdown of all server components:
//! - plain HTTP listener
//! - TLS listener (HTTP/2 and HTTP/1.1)
//! - external media engine

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use streamgate_api::{create_router, AppState};
use streamgate_core::Config;

use crate::supervisor::EngineSupervisor;

/// Grace period for in-flight TLS connections on shutdown
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Streamgate server - manages all server components
pub struct StreamgateServer {
    config: Config,
    state: AppState,
}

impl StreamgateServer {
    /// Create a new server instance
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let state = AppState::from_config(&config)
            .map_err(|e| anyhow::anyhow!("Failed to open working directory: {e}"))?;
        Ok(Self { config, state })
    }

    #[must_use]
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Start all servers and wait for shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        info!(
            working_dir = %self.state.resolver.working_dir().display(),
            content_root = ?self.state.resolver.content_root(),
            partial_content = self.state.partial_content,
            "Starting Streamgate server..."
        );

        let engine = if self.config.server.start_stream_server {
            match EngineSupervisor::spawn(&self.config.engine, self.state.resolver.working_dir()) {
                Ok(engine) => Some(engine),
                Err(e) => {
                    error!(
                        program = %self.config.engine.program.display(),
                        "Failed to start engine: {}", e
                    );
                    None
                }
            }
        } else {
            None
        };

        let shutdown = CancellationToken::new();
        let router = self.router();
        let mut listeners = JoinSet::new();

        if let Some(address) = self.config.http_address() {
            listeners.spawn(serve_http(address, router.clone(), shutdown.clone()));
        }
        if let Some(address) = self.config.https_address() {
            listeners.spawn(serve_https(
                address,
                self.config.tls.cert_path.clone(),
                self.config.tls.key_path.clone(),
                router,
                shutdown.clone(),
            ));
        }

        tokio::select! {
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
            () = wait_all(&mut listeners) => {
                warn!("All listeners stopped");
            }
        }

        shutdown.cancel();
        wait_all(&mut listeners).await;

        if let Some(engine) = engine {
            info!("Stopping engine...");
            engine.shutdown().await;
        }

        info!("Streamgate server stopped");
        Ok(())
    }
}

async fn wait_all(listeners: &mut JoinSet<()>) {
    while let Some(result) = listeners.join_next().await {
        if let Err(e) = result {
            error!("Listener task failed: {}", e);
        }
    }
}

async fn resolve_address(address: &str) -> Option<SocketAddr> {
    match tokio::net::lookup_host(address).await {
        Ok(mut addrs) => {
            let addr = addrs.next();
            if addr.is_none() {
                error!("Address '{}' resolved to nothing", address);
            }
            addr
        }
        Err(e) => {
            error!("Invalid address '{}': {}", address, e);
            None
        }
    }
}

/// Plain HTTP listener; bind errors are logged and end only this listener
async fn serve_http(address: String, router: Router, shutdown: CancellationToken) {
    let Some(addr) = resolve_address(&address).await else {
        return;
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind HTTP address {}: {}", addr, e);
            return;
        }
    };

    info!("HTTP server listening on {}", addr);

    if let Err(e) = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await
    {
        error!("HTTP server error: {}", e);
    }

    info!("HTTP server shut down gracefully");
}

/// TLS listener; certificate and bind errors end only this listener
async fn serve_https(
    address: String,
    cert_path: PathBuf,
    key_path: PathBuf,
    router: Router,
    shutdown: CancellationToken,
) {
    let Some(addr) = resolve_address(&address).await else {
        return;
    };

    let tls = match RustlsConfig::from_pem_file(&cert_path, &key_path).await {
        Ok(tls) => tls,
        Err(e) => {
            error!(
                cert = %cert_path.display(),
                key = %key_path.display(),
                "Failed to load TLS certificate: {}", e
            );
            return;
        }
    };

    let handle = axum_server::Handle::new();
    let drain = handle.clone();
    tokio::spawn(async move {
        shutdown.cancelled().await;
        drain.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
    });

    info!("HTTPS server listening on {}", addr);

    if let Err(e) = axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .await
    {
        error!("HTTPS server error on {}: {}", addr, e);
    }

    info!("HTTPS server shut down gracefully");
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
