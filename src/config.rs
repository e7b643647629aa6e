//! Configuration module for the framewire server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "framewire")]
#[command(author = "framewire authors")]
#[command(version = "0.1.0")]
#[command(about = "A length-prefixed TCP message server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum number of concurrent connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Number of dispatch workers (0 = one task per request)
    #[arg(short = 'w', long)]
    pub workers: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Write logs to this file instead of stdout
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
        }
    }
}

/// Wire framing configuration
#[derive(Debug, Deserialize)]
pub struct FramingConfig {
    /// Largest accepted payload in bytes (0 = unlimited)
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: u32,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            max_packet_size: default_max_packet_size(),
        }
    }
}

/// Dispatch worker pool configuration
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Capacity of each worker's request queue
    #[serde(default = "default_queue_length")]
    pub max_queue_length: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            max_queue_length: default_queue_length(),
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Capacity of the buffered send path
    #[serde(default = "default_queue_length")]
    pub max_buffered_send_queue_length: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_buffered_send_queue_length: default_queue_length(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path; logs go to stdout when unset
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_name() -> String {
    "framewire".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7777
}

fn default_max_connections() -> usize {
    12000
}

fn default_max_packet_size() -> u32 {
    4096
}

fn default_pool_size() -> u32 {
    10
}

fn default_queue_length() -> u32 {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub max_packet_size: u32,
    pub worker_pool_size: u32,
    pub max_worker_queue_length: u32,
    pub max_buffered_send_queue_length: u32,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = match cli.config {
            Some(ref config_path) => read_toml(config_path)?,
            None => TomlConfig::default(),
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Load configuration from a TOML file alone.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_config = read_toml(path.as_ref())?;
        Ok(Self::merge(CliArgs::default(), toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            name: toml_config.server.name,
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            max_packet_size: toml_config.framing.max_packet_size,
            worker_pool_size: cli.workers.unwrap_or(toml_config.workers.pool_size),
            max_worker_queue_length: toml_config.workers.max_queue_length,
            max_buffered_send_queue_length: toml_config
                .connection
                .max_buffered_send_queue_length,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
            log_file: cli.log_file.or(toml_config.logging.file),
        }
    }

    /// `host:port` string suitable for address parsing.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Directory and file name of the log file, if one is configured.
    ///
    /// A bare file name resolves against the working directory.
    pub fn log_file_location(&self) -> Option<(PathBuf, PathBuf)> {
        let path = self.log_file.as_ref()?;
        let file_name = path.file_name()?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Some((dir, PathBuf::from(file_name)))
    }

    /// Worker queue capacity; tokio bounded channels need at least one slot.
    pub fn worker_queue_capacity(&self) -> usize {
        (self.max_worker_queue_length as usize).max(1)
    }

    /// Buffered send queue capacity, at least one slot.
    pub fn buffered_send_capacity(&self) -> usize {
        (self.max_buffered_send_queue_length as usize).max(1)
    }
}

fn read_toml(path: &Path) -> Result<TomlConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:7777");
        assert_eq!(config.max_connections, 12000);
        assert_eq!(config.max_packet_size, 4096);
        assert_eq!(config.worker_pool_size, 10);
        assert_eq!(config.max_worker_queue_length, 1024);
        assert_eq!(config.max_buffered_send_queue_length, 1024);
        assert_eq!(config.log_level, "info");
        assert!(config.log_file.is_none());
        assert!(config.log_file_location().is_none());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            name = "demo"
            host = "127.0.0.1"
            port = 9000
            max_connections = 2

            [framing]
            max_packet_size = 0

            [workers]
            pool_size = 4
            max_queue_length = 16

            [connection]
            max_buffered_send_queue_length = 8

            [logging]
            level = "debug"
            file = "logs/framewire.log"
        "#;

        let parsed: TomlConfig = toml::from_str(toml_str).unwrap();
        let config = Config::merge(CliArgs::default(), parsed);
        assert_eq!(config.name, "demo");
        assert_eq!(config.listen_addr(), "127.0.0.1:9000");
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.max_packet_size, 0);
        assert_eq!(config.worker_pool_size, 4);
        assert_eq!(config.max_worker_queue_length, 16);
        assert_eq!(config.max_buffered_send_queue_length, 8);
        assert_eq!(config.log_level, "debug");
        assert_eq!(
            config.log_file_location(),
            Some((PathBuf::from("logs"), PathBuf::from("framewire.log")))
        );
    }

    #[test]
    fn test_log_file_from_cli() {
        let parsed: TomlConfig = toml::from_str("[logging]\nfile = \"toml.log\"\n").unwrap();
        let cli = CliArgs {
            log_file: Some(PathBuf::from("cli.log")),
            ..Default::default()
        };
        let config = Config::merge(cli, parsed);
        assert_eq!(
            config.log_file_location(),
            Some((PathBuf::from("."), PathBuf::from("cli.log")))
        );

        let parsed: TomlConfig = toml::from_str("[logging]\nfile = \"toml.log\"\n").unwrap();
        let config = Config::merge(CliArgs::default(), parsed);
        assert_eq!(config.log_file, Some(PathBuf::from("toml.log")));
    }

    #[test]
    fn test_cli_overrides_toml() {
        let parsed: TomlConfig = toml::from_str("[server]\nport = 9000\n").unwrap();
        let cli = CliArgs {
            port: Some(9100),
            workers: Some(0),
            ..Default::default()
        };
        let config = Config::merge(cli, parsed);
        assert_eq!(config.port, 9100);
        assert_eq!(config.worker_pool_size, 0);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[test]
    fn test_zero_capacities_are_clamped() {
        let config = Config {
            max_worker_queue_length: 0,
            max_buffered_send_queue_length: 0,
            ..Config::default()
        };
        assert_eq!(config.worker_queue_capacity(), 1);
        assert_eq!(config.buffered_send_capacity(), 1);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/framewire.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
    }
}
