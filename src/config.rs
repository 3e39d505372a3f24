//! Configuration management for the inference coordinator

use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend inference server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the inference server
    #[serde(default = "default_backend_url")]
    pub url: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Discovery attempts before the registry is declared unhealthy
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Fixed delay between discovery attempts, in seconds
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl BackendConfig {
    /// Fixed delay between discovery attempts.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// NATS connection and subject configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub url: String,
    /// Subject for inference routing requests
    #[serde(default = "default_infer_subject")]
    pub infer_subject: String,
    /// Subject for aggregation requests
    #[serde(default = "default_aggregate_subject")]
    pub aggregate_subject: String,
    /// Subject for model listing queries
    #[serde(default = "default_models_subject")]
    pub models_subject: String,
    /// Subject for coordinator status queries
    #[serde(default = "default_status_subject")]
    pub status_subject: String,
}

/// Coordinator identity and concurrency configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Identity stamped into result metadata
    #[serde(default = "default_identity")]
    pub identity: String,
    /// Maximum concurrently served requests
    #[serde(default = "default_workers")]
    pub workers: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_infer_subject() -> String {
    "inference.request".to_string()
}

fn default_aggregate_subject() -> String {
    "inference.aggregate".to_string()
}

fn default_models_subject() -> String {
    "inference.models".to_string()
}

fn default_status_subject() -> String {
    "inference.status".to_string()
}

fn default_identity() -> String {
    "coordinator-001".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            timeout_secs: default_timeout_secs(),
            connect_attempts: default_connect_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_nats_url(),
            infer_subject: default_infer_subject(),
            aggregate_subject: default_aggregate_subject(),
            models_subject: default_models_subject(),
            status_subject: default_status_subject(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            workers: default_workers(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            nats: NatsConfig::default(),
            coordinator: CoordinatorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
