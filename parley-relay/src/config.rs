//! Configuration system for the Parley relay server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/parley-relay/config.toml`)
//! 4. Compiled defaults
//!
//! The config file also seeds the user directory through `[[users]]` tables.

use std::path::PathBuf;
use std::time::Duration;

use parley_proto::message::MAX_CONTENT_LEN;

use crate::directory::UserRecord;
use crate::router::{DEFAULT_DELIVERY_TIMEOUT, DEFAULT_OUTBOUND_BUFFER};

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the relay.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
    users: Vec<UserRecord>,
}

/// `[server]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_content_len: Option<usize>,
    outbound_buffer: Option<usize>,
    delivery_timeout_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Parley chat relay server")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to.
    #[arg(short, long, env = "PARLEY_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/parley-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum message content length in bytes.
    #[arg(long)]
    pub max_content_len: Option<usize>,

    /// Outbound frames buffered per connection before pushes start waiting.
    #[arg(long)]
    pub outbound_buffer: Option<usize>,

    /// How long a push may wait on a slow connection, in milliseconds.
    #[arg(long)]
    pub delivery_timeout_ms: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PARLEY_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9000`).
    pub bind_addr: String,
    /// Maximum accepted message content length in bytes.
    pub max_content_len: usize,
    /// Capacity of each connection's outbound channel.
    pub outbound_buffer: usize,
    /// Bound on a single live delivery.
    pub delivery_timeout: Duration,
    /// Users registered in the directory.
    pub users: Vec<UserRecord>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            max_content_len: MAX_CONTENT_LEN,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            users: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, file))
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &RelayCliArgs, file: RelayConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            max_content_len: cli
                .max_content_len
                .or(file.server.max_content_len)
                .unwrap_or(defaults.max_content_len),
            outbound_buffer: cli
                .outbound_buffer
                .or(file.server.outbound_buffer)
                .unwrap_or(defaults.outbound_buffer),
            delivery_timeout: cli
                .delivery_timeout_ms
                .or(file.server.delivery_timeout_ms)
                .map_or(defaults.delivery_timeout, Duration::from_millis),
            users: file.users,
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the relay.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("parley-relay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
