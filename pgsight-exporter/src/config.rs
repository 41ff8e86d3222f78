//! Configuration for the exporter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use pgsight_common::{LoggingConfig, Target};

use crate::naming::{is_valid_label_name, is_valid_metric_name};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] pgsight_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Prometheus endpoint settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Timeouts applied while scraping.
    #[serde(default)]
    pub scrape: ScrapeConfig,

    /// Database servers to scrape.
    pub targets: Vec<Target>,

    /// Collector filtering settings.
    #[serde(default)]
    pub filters: FilterConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:9187").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Prefix for every metric name (default: "pg"). Empty for none.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Labels added to every series that doesn't already carry them.
    #[serde(default)]
    pub default_labels: HashMap<String, String>,
}

fn default_listen() -> String {
    "0.0.0.0:9187".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_namespace() -> String {
    "pg".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            namespace: default_namespace(),
            default_labels: HashMap::new(),
        }
    }
}

/// Scrape timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Connection timeout per target (milliseconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Timeout for each query (milliseconds). Unbounded when unset.
    #[serde(default)]
    pub query_timeout_ms: Option<u64>,

    /// How long a metrics request waits for the scrape before rendering
    /// what it has (milliseconds). Unbounded when unset.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

fn default_connect_timeout() -> u64 {
    5000
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            query_timeout_ms: None,
            deadline_ms: None,
        }
    }
}

impl ScrapeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

/// Collector filtering configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Glob patterns for collectors to run (empty = all).
    #[serde(default)]
    pub include_collectors: Vec<String>,

    /// Glob patterns for collectors to skip.
    #[serde(default)]
    pub exclude_collectors: Vec<String>,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = pgsight_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = pgsight_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate listen address format
        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        // Validate path starts with /
        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        let namespace = &self.prometheus.namespace;
        if !namespace.is_empty() && !is_valid_metric_name(namespace) {
            return Err(ConfigError::Validation(format!(
                "Invalid namespace: {}",
                namespace
            )));
        }

        for name in self.prometheus.default_labels.keys() {
            if !is_valid_label_name(name) {
                return Err(ConfigError::Validation(format!(
                    "Invalid default label name: {}",
                    name
                )));
            }
        }

        if self.scrape.connect_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "connect_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.scrape.query_timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "query_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.scrape.deadline_ms == Some(0) {
            return Err(ConfigError::Validation(
                "deadline_ms must be > 0".to_string(),
            ));
        }

        if self.targets.is_empty() {
            return Err(ConfigError::Validation(
                "At least one target must be configured".to_string(),
            ));
        }

        for (i, target) in self.targets.iter().enumerate() {
            target
                .validate()
                .map_err(|e| ConfigError::Validation(format!("targets[{}]: {}", i, e)))?;

            let identity = target.identity();
            if self.targets[..i].iter().any(|t| t.identity() == identity) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate target identity: {}",
                    identity
                )));
            }
        }

        Ok(())
    }
}

impl Default for ExporterConfig {
    /// A single local server with default credentials.
    fn default() -> Self {
        Self {
            prometheus: PrometheusConfig::default(),
            scrape: ScrapeConfig::default(),
            targets: vec![Target::new("localhost")],
            filters: FilterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
