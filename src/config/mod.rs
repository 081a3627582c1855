//! Configuration module for Fleet Gateway
//!
//! Supports configuration via:
//! - YAML/TOML config files
//! - Environment variables (with FLEET_ prefix, `__` as section separator)
//! - A `.env` file in the working directory

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Engine socket path or `tcp://` URL; platform default when unset
    #[serde(default)]
    pub docker_host: Option<String>,

    /// Timeout for individual runtime requests
    #[serde(default = "default_runtime_timeout")]
    pub runtime_timeout_seconds: u64,

    /// Container registry polling
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Log streaming sessions
    #[serde(default)]
    pub streams: StreamConfig,

    /// Subscriber fan-out
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Metrics settings
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Pretty on a terminal, JSON otherwise
    #[default]
    Auto,
    Pretty,
    Json,
}

/// Container registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Period of the background refresh
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Refresh as soon as the runtime reports a container event
    #[serde(default = "default_true")]
    pub watch_runtime_events: bool,
}

/// Log streaming settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Buffered lines that trigger a batch
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// Release every log session when the gateway shuts down
    #[serde(default = "default_true")]
    pub stop_on_shutdown: bool,
}

/// Broadcast channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Events buffered per subscriber before it starts skipping
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3002
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_runtime_timeout() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_flush_threshold() -> usize {
    100
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            watch_runtime_events: true,
        }
    }
}

impl RegistryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            flush_threshold: default_flush_threshold(),
            stop_on_shutdown: true,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            docker_host: None,
            runtime_timeout_seconds: default_runtime_timeout(),
            registry: RegistryConfig::default(),
            streams: StreamConfig::default(),
            broadcast: BroadcastConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        // Try to load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // Load from config file if present
            .add_source(config::File::with_name("config/fleet-gateway").required(false))
            .add_source(config::File::with_name("/etc/fleet-gateway/config").required(false))
            // Override with environment variables (FLEET_ prefix)
            .add_source(
                config::Environment::with_prefix("FLEET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.registry.poll_interval_ms < 100 {
            anyhow::bail!("Registry poll interval must be at least 100ms");
        }

        if self.streams.flush_threshold == 0 {
            anyhow::bail!("Log flush threshold cannot be 0");
        }

        if self.broadcast.channel_capacity == 0 {
            anyhow::bail!("Broadcast channel capacity cannot be 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.port, 3002);
        assert_eq!(config.streams.flush_threshold, 100);
        assert_eq!(config.registry.poll_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = AppConfig {
            port: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.streams.flush_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.registry.poll_interval_ms = 10;
        assert!(config.validate().is_err());
    }
}
