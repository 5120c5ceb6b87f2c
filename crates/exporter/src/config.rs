//! Exporter configuration

use anyhow::{Context, Result};
use exporter_lib::scheduler::SchedulerConfig;
use exporter_lib::sources::{default_procfs_root, DEFAULT_DOCKER_SOCKET};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Exporter configuration, read from unprefixed environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// Instance name attached to lifecycle log events
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Port of the scrape endpoint
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Tick interval in seconds
    #[serde(default = "default_collection_interval")]
    pub collection_interval: u64,

    /// Container stats interval in seconds, a multiple of the tick
    #[serde(default = "default_docker_collection_interval")]
    pub docker_collection_interval: u64,

    #[serde(default = "default_docker_socket")]
    pub docker_socket: String,

    /// Disables every container sampler when false
    #[serde(default = "default_docker_enabled")]
    pub docker_enabled: bool,

    /// Per-request timeout for the Docker API in seconds
    #[serde(default = "default_docker_timeout")]
    pub docker_timeout_secs: u64,

    #[serde(default)]
    pub compose_project_filter: Option<String>,

    #[serde(default)]
    pub procfs_root: Option<PathBuf>,
}

fn default_hostname() -> String {
    "unknown".to_string()
}

fn default_metrics_port() -> u16 {
    8000
}

fn default_collection_interval() -> u64 {
    5
}

fn default_docker_collection_interval() -> u64 {
    30
}

fn default_docker_socket() -> String {
    DEFAULT_DOCKER_SOCKET.to_string()
}

fn default_docker_enabled() -> bool {
    true
}

fn default_docker_timeout() -> u64 {
    10
}

impl ExporterConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from an explicit variable map, or the process
    /// environment when `None`
    pub fn load_from(source: Option<HashMap<String, String>>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .try_parsing(true)
                    .source(source),
            )
            .build()
            .context("Failed to read environment")?;

        let config: Self = config
            .try_deserialize()
            .context("Invalid exporter configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler()
            .validate()
            .context("Invalid COLLECTION_INTERVAL / DOCKER_COLLECTION_INTERVAL")?;
        if self.docker_timeout_secs == 0 {
            anyhow::bail!("DOCKER_TIMEOUT_SECS must be positive");
        }
        Ok(())
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig::from_secs(self.collection_interval, self.docker_collection_interval)
    }

    pub fn docker_timeout(&self) -> Duration {
        Duration::from_secs(self.docker_timeout_secs)
    }

    /// Configured procfs root, else `/host/proc` when mounted, else `/proc`
    pub fn procfs_root(&self) -> PathBuf {
        self.procfs_root.clone().unwrap_or_else(default_procfs_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let config = ExporterConfig::load_from(vars(&[])).unwrap();

        assert_eq!(config.hostname, "unknown");
        assert_eq!(config.metrics_port, 8000);
        assert_eq!(config.collection_interval, 5);
        assert_eq!(config.docker_collection_interval, 30);
        assert_eq!(config.docker_socket, "/var/run/docker.sock");
        assert!(config.docker_enabled);
        assert_eq!(config.docker_timeout(), Duration::from_secs(10));
        assert!(config.compose_project_filter.is_none());
        assert_eq!(config.scheduler(), SchedulerConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = ExporterConfig::load_from(vars(&[
            ("METRICS_PORT", "9100"),
            ("COLLECTION_INTERVAL", "10"),
            ("DOCKER_COLLECTION_INTERVAL", "60"),
            ("DOCKER_ENABLED", "false"),
            ("COMPOSE_PROJECT_FILTER", "shop"),
            ("PROCFS_ROOT", "/host/proc"),
        ]))
        .unwrap();

        assert_eq!(config.metrics_port, 9100);
        assert_eq!(config.scheduler(), SchedulerConfig::from_secs(10, 60));
        assert!(!config.docker_enabled);
        assert_eq!(config.compose_project_filter.as_deref(), Some("shop"));
        assert_eq!(config.procfs_root(), PathBuf::from("/host/proc"));
    }

    #[test]
    fn test_rejects_misaligned_heavy_interval() {
        let result = ExporterConfig::load_from(vars(&[
            ("COLLECTION_INTERVAL", "5"),
            ("DOCKER_COLLECTION_INTERVAL", "12"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_interval() {
        let result = ExporterConfig::load_from(vars(&[("COLLECTION_INTERVAL", "0")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_non_numeric_port() {
        let result = ExporterConfig::load_from(vars(&[("METRICS_PORT", "http")]));
        assert!(result.is_err());
    }
}
