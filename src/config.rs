//! Configuration module for the scene-relay server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::connection::ConnectionSettings;
use crate::protocol::Framing;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the relay
#[derive(Parser, Debug)]
#[command(name = "scene-relay")]
#[command(version)]
#[command(about = "Remote-control bridge for a single-threaded 3D scene host", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Mode>,

    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Address to bind to, or to connect to with `send` (e.g., 127.0.0.1:5000)
    #[arg(short = 'l', long, global = true)]
    pub listen: Option<String>,

    /// Message framing on the wire
    #[arg(long, value_enum, global = true)]
    pub framing: Option<Framing>,

    /// Listen backlog passed to the kernel
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Deadline for receiving a whole request in milliseconds (0 = none)
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Largest accepted request in bytes
    #[arg(long)]
    pub max_request_bytes: Option<usize>,

    /// Delay between drain loop ticks in milliseconds
    #[arg(long)]
    pub tick_interval_ms: Option<u64>,

    /// Maximum queued commands before new requests are rejected (0 = unbounded)
    #[arg(long)]
    pub max_queue_depth: Option<usize>,

    /// Directory for renders without an explicit filepath
    #[arg(long)]
    pub render_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// What the binary should do
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Run the relay with its host loop (default)
    Serve,
    /// Send one JSON command to a running relay and print the response
    Send {
        /// Request body, e.g. '{"action":"list_objects"}'
        request: String,
    },
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub scene: SceneConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and per-connection settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    #[serde(default)]
    pub framing: Framing,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            read_timeout_ms: default_read_timeout_ms(),
            max_request_bytes: default_max_request_bytes(),
            framing: Framing::default(),
        }
    }
}

/// Queue and drain loop settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_queue_depth: default_max_queue_depth(),
        }
    }
}

/// Scene executor settings
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SceneConfig {
    /// Defaults to the system temp directory
    pub render_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_backlog() -> i32 {
    128
}

fn default_read_timeout_ms() -> u64 {
    5000
}

fn default_max_request_bytes() -> usize {
    64 * 1024
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_max_queue_depth() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub backlog: i32,
    /// None disables the request read deadline
    pub read_timeout: Option<Duration>,
    pub max_request_bytes: usize,
    pub framing: Framing,
    pub tick_interval: Duration,
    /// 0 = unbounded
    pub max_queue_depth: usize,
    pub render_dir: PathBuf,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let toml = TomlConfig::default();
        Self {
            listen: toml.server.listen,
            backlog: toml.server.backlog,
            read_timeout: read_timeout(toml.server.read_timeout_ms),
            max_request_bytes: toml.server.max_request_bytes,
            framing: toml.server.framing,
            tick_interval: Duration::from_millis(toml.bridge.tick_interval_ms),
            max_queue_depth: toml.bridge.max_queue_depth,
            render_dir: std::env::temp_dir(),
            log_level: toml.logging.level,
        }
    }
}

fn read_timeout(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl Config {
    /// Parse CLI args, load the optional TOML file and merge them.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<(Self, Mode), ConfigError> {
        let cli = CliArgs::parse();
        let mode = cli.command.clone().unwrap_or(Mode::Serve);
        Ok((Self::from_cli(cli)?, mode))
    }

    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents)
                .map_err(|source| ConfigError::TomlParse {
                    path: config_path.clone(),
                    source,
                })?
        } else {
            TomlConfig::default()
        };
        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let config = Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            read_timeout: read_timeout(
                cli.read_timeout_ms
                    .unwrap_or(toml_config.server.read_timeout_ms),
            ),
            max_request_bytes: cli
                .max_request_bytes
                .unwrap_or(toml_config.server.max_request_bytes),
            framing: cli.framing.unwrap_or(toml_config.server.framing),
            tick_interval: Duration::from_millis(
                cli.tick_interval_ms
                    .unwrap_or(toml_config.bridge.tick_interval_ms),
            ),
            max_queue_depth: cli
                .max_queue_depth
                .unwrap_or(toml_config.bridge.max_queue_depth),
            render_dir: cli
                .render_dir
                .or(toml_config.scene.render_dir)
                .unwrap_or_else(std::env::temp_dir),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("tick_interval_ms must be greater than 0"));
        }
        if self.max_request_bytes == 0 || self.max_request_bytes > u32::MAX as usize {
            return Err(ConfigError::Invalid(
                "max_request_bytes must be between 1 and 4294967295",
            ));
        }
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid("backlog must be greater than 0"));
        }
        Ok(())
    }

    /// Limits handed to every connection handler.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            framing: self.framing,
            max_request_bytes: self.max_request_bytes,
            read_timeout: self.read_timeout,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
