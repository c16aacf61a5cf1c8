//! Configuration loading

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::Config;

/// Config file names looked up in the working directory
const DEFAULT_CONFIG_FILES: [&str; 2] = ["config.yaml", "config.json"];

/// Determine which config file to load
///
/// Search order:
/// 1. explicit path (command line)
/// 2. `STREAMGATE_CONFIG_PATH` environment variable
/// 3. ./config.yaml, then ./config.json
///
/// Returns `None` when nothing exists, in which case only environment
/// variables and defaults apply.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    let from_env = std::env::var_os("STREAMGATE_CONFIG_PATH").map(PathBuf::from);
    let candidates = explicit
        .map(Path::to_path_buf)
        .into_iter()
        .chain(from_env)
        .chain(DEFAULT_CONFIG_FILES.iter().map(PathBuf::from));
    first_existing(candidates)
}

fn first_existing(candidates: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|p| p.exists())
}

/// Load and validate configuration
///
/// Runs before logging is initialised, so progress goes to stderr.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(anyhow::anyhow!("Config file {} does not exist", path.display()));
        }
    }

    let config = if let Some(path) = resolve_config_path(explicit) {
        eprintln!("Loading config from {}", path.display());
        Config::from_file(&path)
            .map_err(|e| anyhow::anyhow!("Failed to load {}: {e}", path.display()))?
    } else {
        eprintln!("No config file found, using environment variables and defaults");
        Config::from_env()?
    };

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    info!("Configuration loaded and validated successfully");

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_existing_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("config.yaml");
        std::fs::write(&present, "server:\n  http_port: 8000\n").unwrap();

        let found = first_existing(vec![dir.path().join("missing.yaml"), present.clone()]);
        assert_eq!(found, Some(present));
        assert_eq!(first_existing(vec![dir.path().join("nope.json")]), None);
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let result = load_config(Some(Path::new("/nonexistent/streamgate.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_path_is_loaded_and_validated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "server:\n  http_port: 0\n  https_port: 0\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("validation failed"));
    }
}
