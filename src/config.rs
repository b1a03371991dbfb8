//! Configuration module for the holy-http server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "holy-http")]
#[command(author = "holy-http authors")]
#[command(version = "0.1.0")]
#[command(about = "A single-threaded reactor HTTP server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to; repeat for several (default: all interfaces)
    #[arg(short = 'b', long = "bind")]
    pub bind_ips: Vec<String>,

    /// Cron interval in milliseconds (0 = disabled)
    #[arg(long)]
    pub cron_interval: Option<u64>,

    /// Maximum readiness events handled per poll
    #[arg(long)]
    pub events_capacity: Option<usize>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: Option<u16>,
    /// Addresses to bind to (empty = all interfaces)
    #[serde(default)]
    pub bind_ips: Vec<String>,
    /// Cron interval in milliseconds
    #[serde(default)]
    pub cron_interval: u64,
    /// Maximum readiness events handled per poll
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: None,
            bind_ips: Vec::new(),
            cron_interval: 0,
            events_capacity: default_events_capacity(),
            backlog: default_backlog(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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

fn default_events_capacity() -> usize {
    1024
}

fn default_backlog() -> i32 {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind_ips: Vec<String>,
    /// Milliseconds between cron callbacks; 0 disables cron.
    pub cron_interval: u64,
    pub events_capacity: usize,
    pub backlog: i32,
    pub log_level: String,
}

impl Config {
    /// Configuration listening on `port` on all interfaces.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            bind_ips: Vec::new(),
            cron_interval: 0,
            events_capacity: default_events_capacity(),
            backlog: default_backlog(),
            log_level: default_log_level(),
        }
    }

    /// Configuration listening on `port` on one address.
    pub fn with_bind_ip(bind_ip: impl Into<String>, port: u16) -> Self {
        Self::with_bind_ips(vec![bind_ip.into()], port)
    }

    /// Configuration listening on `port` on each of `bind_ips`.
    pub fn with_bind_ips(bind_ips: Vec<String>, port: u16) -> Self {
        Self {
            bind_ips,
            ..Self::new(port)
        }
    }

    pub fn cron_interval(mut self, millis: u64) -> Self {
        self.cron_interval = millis;
        self
    }

    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Resolve already parsed CLI args, reading the TOML file they name.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let port = cli
            .port
            .or(toml_config.server.port)
            .ok_or(ConfigError::MissingPort)?;

        Ok(Config {
            port,
            bind_ips: if cli.bind_ips.is_empty() {
                toml_config.server.bind_ips
            } else {
                cli.bind_ips
            },
            cron_interval: cli
                .cron_interval
                .unwrap_or(toml_config.server.cron_interval),
            events_capacity: cli
                .events_capacity
                .unwrap_or(toml_config.server.events_capacity),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    MissingPort,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::MissingPort => {
                write!(f, "No port configured (use --port or [server] port)")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["holy-http"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.port, None);
        assert!(config.server.bind_ips.is_empty());
        assert_eq!(config.server.cron_interval, 0);
        assert_eq!(config.server.events_capacity, 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            port = 8080
            bind_ips = ["127.0.0.1", "::1"]
            cron_interval = 500

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, Some(8080));
        assert_eq!(config.server.bind_ips, vec!["127.0.0.1", "::1"]);
        assert_eq!(config.server.cron_interval, 500);
        assert_eq!(config.server.backlog, 1024);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 8080
            bind_ips = ["0.0.0.0"]
            cron_interval = 500
        "#,
        )
        .unwrap();

        let config = Config::merge(
            cli(&["--port", "9090", "-b", "127.0.0.1", "-b", "10.0.0.1"]),
            toml_config,
        )
        .unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.bind_ips, vec!["127.0.0.1", "10.0.0.1"]);
        assert_eq!(config.cron_interval, 500);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_missing_port() {
        let err = Config::merge(cli(&[]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingPort));
    }

    #[test]
    fn test_constructors() {
        assert!(Config::new(80).bind_ips.is_empty());
        assert_eq!(Config::with_bind_ip("127.0.0.1", 80).bind_ips, vec!["127.0.0.1"]);
        let config = Config::with_bind_ips(vec!["a".into(), "b".into()], 81).cron_interval(100);
        assert_eq!(config.bind_ips.len(), 2);
        assert_eq!(config.port, 81);
        assert_eq!(config.cron_interval, 100);
    }
}
