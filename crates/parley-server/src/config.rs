//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (PARLEY_*)
//! - TOML configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Fan-out configuration applied to every room.
    #[serde(default)]
    pub hub: HubSection,

    /// Query limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection string.
    #[serde(default = "default_database_url")]
    pub url: String,
}

/// Fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSection {
    /// Room size at which broadcast moves to the worker pool.
    #[serde(default = "default_activation_threshold")]
    pub activation_threshold: usize,

    /// Workers per activated pool.
    #[serde(default = "default_pool_workers")]
    pub pool_workers: usize,

    /// Capacity of each client's outbound queue.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

/// Query limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Messages replayed to a joining client.
    #[serde(default = "default_message_history_limit")]
    pub message_history_limit: i64,

    /// Maximum rooms returned by the listing endpoint.
    #[serde(default = "default_room_list_limit")]
    pub room_list_limit: i64,
}

/// Rate limit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable per-user rate limiting.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Requests allowed per window.
    #[serde(default = "default_rate_limit_requests")]
    pub max_requests: u64,

    /// Window length in seconds.
    #[serde(default = "default_rate_limit_window")]
    pub window_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("PARLEY_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("PARLEY_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_database_url() -> String {
    std::env::var("PARLEY_DATABASE_URL").unwrap_or_else(|_| "sqlite://parley.db".to_string())
}

fn default_true() -> bool {
    true
}

fn default_activation_threshold() -> usize {
    64
}

fn default_pool_workers() -> usize {
    4
}

fn default_outbound_capacity() -> usize {
    parley_core::DEFAULT_OUTBOUND_CAPACITY
}

fn default_message_history_limit() -> i64 {
    50
}

fn default_room_list_limit() -> i64 {
    100
}

fn default_rate_limit_requests() -> u64 {
    120
}

fn default_rate_limit_window() -> u64 {
    60
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: DatabaseConfig::default(),
            hub: HubSection::default(),
            limits: LimitsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            activation_threshold: default_activation_threshold(),
            pool_workers: default_pool_workers(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            message_history_limit: default_message_history_limit(),
            room_list_limit: default_room_list_limit(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: default_rate_limit_requests(),
            window_secs: default_rate_limit_window(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "parley.toml",
            "/etc/parley/parley.toml",
            "~/.config/parley/parley.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host/port do not form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.hub.activation_threshold, 64);
        assert_eq!(config.hub.outbound_capacity, 256);
        assert_eq!(config.limits.message_history_limit, 50);
        assert!(config.rate_limit.enabled);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [hub]
            activation_threshold = 10
            pool_workers = 2

            [rate_limit]
            enabled = false
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.hub.activation_threshold, 10);
        assert_eq!(config.hub.pool_workers, 2);
        assert_eq!(config.hub.outbound_capacity, 256);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.limits.room_list_limit, 100);
    }
}
