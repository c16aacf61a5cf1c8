//! Startup helpers shared by the `streamgate` server and the
//! `streamgate-client` binary.

pub mod config;

pub use config::{load_config, resolve_config_path};
