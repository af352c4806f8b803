//! Configuration management for the gateway.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Default configuration (embedded in the binary)
//! 2. System-wide configuration file (`/etc/memos-gateway/config.toml`)
//! 3. User-specified configuration file (`--config`)
//! 4. Environment variables (`MEMOS_GATEWAY__<SECTION>__<KEY>`)
//! 5. Command-line arguments
//!
//! # Environment Variables
//!
//! - `MEMOS_GATEWAY__AUTH__SECRET` - Instance secret used to sign access tokens
//! - `MEMOS_GATEWAY__SERVER__PORT` - Listen port
//! - `OPENAI_API_KEY` - Upstream chat provider key (name configurable via `chat.api_key_env`)

use crate::error::{Error, Result};
use config::{Config, Environment, File, FileFormat};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Command-line overrides shared by every subcommand
#[derive(Debug, Clone, Default, clap::Args)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, env = "MEMOS_GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address in host:port format
    #[arg(long, value_name = "HOST:PORT")]
    pub listen: Option<String>,

    /// Run in demo mode (stack traces in RPC error logs)
    #[arg(long)]
    pub demo: bool,

    /// Personal access token file
    #[arg(long, value_name = "PATH")]
    pub tokens_file: Option<PathBuf>,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub chat: ChatSettings,
    #[serde(default)]
    pub thumbnail: ThumbnailSettings,
    #[serde(default)]
    pub cors: CorsSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Instance mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Prod,
    Dev,
    Demo,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Prod => "prod",
            Mode::Dev => "dev",
            Mode::Demo => "demo",
        }
    }

    /// Demo instances log stack traces for failed calls
    pub fn is_demo(&self) -> bool {
        matches!(self, Mode::Demo)
    }
}

/// Network and runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub mode: Mode,
    /// Per-request timeout in seconds, 0 disables it
    #[serde(default)]
    pub request_timeout_secs: u64,
}

/// Credential settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// HS256 secret for access tokens
    #[serde(default)]
    pub secret: String,
    /// CSV file holding hashed personal access tokens
    pub tokens_file: PathBuf,
}

/// Upstream chat provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Derived-asset generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailSettings {
    /// Thumbnails rendered at the same time
    #[serde(default = "default_thumbnail_concurrency")]
    pub max_concurrency: usize,
    /// Longest side of a generated thumbnail, in pixels
    #[serde(default = "default_thumbnail_size")]
    pub max_size: u32,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_thumbnail_concurrency(),
            max_size: default_thumbnail_size(),
        }
    }
}

/// CORS settings for the REST bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsSettings {
    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
}

impl Default for CorsSettings {
    fn default() -> Self {
        Self {
            allowed_headers: default_allowed_headers(),
            max_age: default_cors_max_age(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `EnvFilter` directives, e.g. `memos_gateway=debug,tower_http=info`
    #[serde(default)]
    pub filter: Option<String>,
    /// Write daily-rotated log files here instead of stdout
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            filter: None,
            directory: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from all sources
    pub fn load(args: &Args) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::from_str(include_str!("../config/default.toml"), FileFormat::Toml))
            .add_source(File::with_name("/etc/memos-gateway/config.toml").required(false));

        if let Some(path) = &args.config {
            builder = builder.add_source(File::from(path.as_path()));
        }

        builder = builder.add_source(Environment::with_prefix("MEMOS_GATEWAY").separator("__"));

        let mut config: GatewayConfig = builder.build()?.try_deserialize()?;

        if let Some(listen) = &args.listen {
            let (host, port) = parse_listen(listen)?;
            config.server.host = host;
            config.server.port = port;
        }
        if args.demo {
            config.server.mode = Mode::Demo;
        }
        if let Some(path) = &args.tokens_file {
            config.auth.tokens_file = path.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.thumbnail.max_concurrency == 0 {
            return Err(Error::Config("thumbnail.max_concurrency must be at least 1".into()));
        }
        if self.thumbnail.max_size == 0 {
            return Err(Error::Config("thumbnail.max_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Socket address the server binds to
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen address: {e}")))
    }

    /// Fill in a random secret when none is configured.
    ///
    /// Returns true when a secret was generated.
    pub fn ensure_secret(&mut self) -> bool {
        if !self.auth.secret.is_empty() {
            return false;
        }
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        self.auth.secret = hex::encode(bytes);
        true
    }
}

fn parse_listen(listen: &str) -> Result<(String, u16)> {
    let (host, port) = listen
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("listen address must be HOST:PORT, got '{listen}'")))?;
    let port = port
        .parse()
        .map_err(|_| Error::Config(format!("invalid port in '{listen}'")))?;
    Ok((host.trim_matches(|c| c == '[' || c == ']').to_owned(), port))
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_thumbnail_concurrency() -> usize {
    3
}

fn default_thumbnail_size() -> u32 {
    600
}

fn default_allowed_headers() -> Vec<String> {
    ["content-type", "authorization", "accept", "origin"]
        .iter()
        .map(|h| h.to_string())
        .collect()
}

fn default_cors_max_age() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = GatewayConfig::load(&Args::default()).unwrap();
        assert_eq!(config.server.mode, Mode::Prod);
        assert_eq!(config.thumbnail.max_concurrency, 3);
        assert_eq!(config.thumbnail.max_size, 600);
        assert_eq!(config.chat.api_key_env, "OPENAI_API_KEY");
        assert!(config.cors.allowed_headers.contains(&"authorization".to_string()));
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args {
            listen: Some("127.0.0.1:9000".into()),
            demo: true,
            tokens_file: Some(PathBuf::from("/tmp/pats.csv")),
            ..Args::default()
        };
        let config = GatewayConfig::load(&args).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert!(config.server.mode.is_demo());
        assert_eq!(config.auth.tokens_file, PathBuf::from("/tmp/pats.csv"));
        assert_eq!(config.listen_addr().unwrap().port(), 9000);
    }

    #[test]
    fn test_parse_listen_rejects_garbage() {
        assert!(parse_listen("localhost").is_err());
        assert!(parse_listen("localhost:http").is_err());
        assert_eq!(parse_listen("[::1]:80").unwrap(), ("::1".to_owned(), 80));
    }

    #[test]
    fn test_zero_thumbnail_concurrency_rejected() {
        let mut config = GatewayConfig::load(&Args::default()).unwrap();
        assert!(config.validate().is_ok());

        config.thumbnail.max_concurrency = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_ensure_secret() {
        let mut config = GatewayConfig::load(&Args::default()).unwrap();
        config.auth.secret.clear();
        assert!(config.ensure_secret());
        assert_eq!(config.auth.secret.len(), 64);
        assert!(!config.ensure_secret());
    }
}
