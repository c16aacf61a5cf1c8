// Module: http
// Static delivery over HTTP/1.1 and HTTP/2

pub mod client_ip;
pub mod error;
pub mod files;

use axum::Router;
use std::sync::Arc;
use streamgate_core::Config;
use tower_http::trace::TraceLayer;

use crate::resolve::Resolver;

pub use error::{AppError, AppResult};

/// Shared application state
///
/// Read-only after startup, cloned into every request.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<Resolver>,
    pub partial_content: bool,
}

impl AppState {
    /// Build state from configuration, rooting resolution at
    /// `server.working_dir` or the process working directory. The TLS
    /// certificate and key are never served.
    pub fn from_config(config: &Config) -> std::io::Result<Self> {
        let working_dir = match &config.server.working_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        let resolver = Resolver::new(
            working_dir,
            &config.server.default_folder,
            &config.server.default_file,
        )?
        .hide([&config.tls.cert_path, &config.tls.key_path]);
        Ok(Self {
            resolver: Arc::new(resolver),
            partial_content: config.server.partial_content,
        })
    }
}

/// Create the HTTP router
///
/// There are no fixed routes: every path is handed to the resolver.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .fallback(files::serve_path)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
