use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
///
/// Shared by the delivery server and the negotiation client. Loaded once at
/// startup and handed out as an immutable value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tls: TlsConfig,
    pub engine: EngineConfig,
    pub client: ClientConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// Plain HTTP listener port, 0 disables it
    #[serde(alias = "httpPort")]
    pub http_port: u16,
    /// TLS listener port, 0 disables it
    #[serde(alias = "httpsPort")]
    pub https_port: u16,
    /// Port of the external engine's signaling endpoints
    #[serde(alias = "encoderPort")]
    pub encoder_port: u16,
    /// Spawn the external engine as a child process at startup
    #[serde(alias = "startStreamServer")]
    pub start_stream_server: bool,
    /// Content root searched after the working directory
    pub default_folder: String,
    /// Index file appended to directory-like paths
    pub default_file: String,
    /// Answer range requests with 206 + Content-Range.
    /// When false, ranges are answered with a plain 200.
    pub partial_content: bool,
    /// Root for resolution; defaults to the process working directory
    pub working_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8000,
            https_port: 8001,
            encoder_port: 8083,
            start_stream_server: false,
            default_folder: "client".to_string(),
            default_file: "index.html".to_string(),
            partial_content: true,
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("server/https.crt"),
            key_path: PathBuf::from("server/https.key"),
        }
    }
}

/// External media engine launched by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("stream/stream"),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Promote negotiation diagnostics from debug to info
    pub debug: bool,
    #[serde(alias = "defaultStream")]
    pub default_stream: String,
    pub signaling_scheme: String,
    pub signaling_host: String,
    /// STUN/TURN urls handed to the peer connection
    pub ice_servers: Vec<String>,
    pub keepalive_interval_ms: u64,
    pub request_timeout_seconds: u64,
    /// Retransmit budget of the unreliable data channel
    pub max_retransmits: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            debug: false,
            default_stream: "default".to_string(),
            signaling_scheme: "http".to_string(),
            signaling_host: "localhost".to_string(),
            ice_servers: Vec::new(),
            keepalive_interval_ms: 1000,
            request_timeout_seconds: 10,
            max_retransmits: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&Path>) -> crate::Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if path.exists() {
                builder = builder.add_source(File::from(path));
            }
        }

        // STREAMGATE_SERVER__HTTP_PORT=9000, STREAMGATE_CLIENT__ICE_SERVERS=a,b
        builder = builder.add_source(
            Environment::with_prefix("STREAMGATE")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("client.ice_servers")
                .with_list_parse_key("engine.args")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load from environment variables only
    pub fn from_env() -> crate::Result<Self> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        Self::load(Some(path.as_ref()))
    }

    /// Collect every configuration problem instead of stopping at the first
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 && self.server.https_port == 0 {
            errors.push("server.http_port and server.https_port are both disabled".to_string());
        }
        if self.server.default_file.is_empty() || self.server.default_file.contains(['/', '\\']) {
            errors.push(format!(
                "server.default_file must be a plain file name, got '{}'",
                self.server.default_file
            ));
        }
        if Path::new(&self.server.default_folder)
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            errors.push(format!(
                "server.default_folder must not contain '..', got '{}'",
                self.server.default_folder
            ));
        }
        if self.server.encoder_port == 0 {
            errors.push("server.encoder_port must be non-zero".to_string());
        }
        if !matches!(self.client.signaling_scheme.as_str(), "http" | "https") {
            errors.push(format!(
                "client.signaling_scheme must be http or https, got '{}'",
                self.client.signaling_scheme
            ));
        }
        if self.client.keepalive_interval_ms == 0 {
            errors.push("client.keepalive_interval_ms must be non-zero".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be json or pretty, got '{}'",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Plain HTTP listener address, `None` when disabled
    #[must_use]
    pub fn http_address(&self) -> Option<String> {
        (self.server.http_port > 0).then(|| format!("{}:{}", self.server.host, self.server.http_port))
    }

    /// TLS listener address, `None` when disabled
    #[must_use]
    pub fn https_address(&self) -> Option<String> {
        (self.server.https_port > 0).then(|| format!("{}:{}", self.server.host, self.server.https_port))
    }

    /// Base URL of the engine's signaling routes
    #[must_use]
    pub fn signaling_base_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.client.signaling_scheme, self.client.signaling_host, self.server.encoder_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.http_port, 8000);
        assert_eq!(config.server.https_port, 8001);
        assert_eq!(config.server.default_folder, "client");
        assert_eq!(config.server.default_file, "index.html");
        assert!(!config.server.start_stream_server);
        assert_eq!(config.engine.program, PathBuf::from("stream/stream"));
        assert_eq!(config.client.keepalive_interval_ms, 1000);
        assert_eq!(config.client.max_retransmits, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_addresses() {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.https_port = 0;

        assert_eq!(config.http_address().as_deref(), Some("127.0.0.1:8000"));
        assert_eq!(config.https_address(), None);
        assert_eq!(config.signaling_base_url(), "http://localhost:8083");
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.server.http_port = 0;
        config.server.https_port = 0;
        config.server.default_file = "../index.html".to_string();
        config.client.keepalive_interval_ms = 0;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("both disabled"));
    }

    #[test]
    fn test_validate_rejects_parent_dir_folder() {
        let mut config = Config::default();
        config.server.default_folder = "client/../../etc".to_string();

        let errors = config.validate().unwrap_err();
        assert!(errors[0].contains("default_folder"));
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  http_port: 9100\n  start_stream_server: true\nclient:\n  debug: true\n  default_stream: cam1\n  ice_servers:\n    - stun:stun.example.org:3478\n"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.http_port, 9100);
        assert!(config.server.start_stream_server);
        assert_eq!(config.server.https_port, 8001);
        assert!(config.client.debug);
        assert_eq!(config.client.default_stream, "cam1");
        assert_eq!(config.client.ice_servers, vec!["stun:stun.example.org:3478"]);
    }

    #[test]
    fn test_malformed_file_is_a_config_error() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "server:\n  http_port: not-a-port\n").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
        assert!(err.to_string().starts_with("Configuration error"));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::from_file("/nonexistent/streamgate.yaml").unwrap();
        assert_eq!(config.server.default_file, "index.html");
    }
}
