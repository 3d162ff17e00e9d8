use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::GatewayConfig;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid worker batch_size: {0}. Must be at least 1")]
    InvalidWorkerBatch(u32),

    #[error("Invalid worker interval_ms: {0}. Must be at least 100")]
    InvalidWorkerInterval(u64),

    #[error("Invalid scheduler batch_size: {0}. Must be at least 1")]
    InvalidSchedulerBatch(u32),

    #[error("Invalid http_client timeout_ms: {0}. Must be between 500 and 60000")]
    InvalidHttpTimeout(u64),

    #[error("Invalid key_buckets: {0}. Must be at least 1")]
    InvalidKeyBuckets(u32),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. fluxgate.yaml (project config)
    /// 3. fluxgate.local.yaml (local overrides, optional)
    /// 4. Environment variables (FLUXGATE_* prefix, highest priority)
    pub fn load() -> Result<GatewayConfig> {
        let config: GatewayConfig = Figment::new()
            .merge(Serialized::defaults(GatewayConfig::default()))
            .merge(Yaml::file("fluxgate.yaml"))
            .merge(Yaml::file("fluxgate.local.yaml"))
            .merge(Env::prefixed("FLUXGATE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<GatewayConfig> {
        let config: GatewayConfig = Figment::new()
            .merge(Serialized::defaults(GatewayConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &GatewayConfig) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.worker.batch_size == 0 {
            return Err(ConfigError::InvalidWorkerBatch(config.worker.batch_size));
        }
        if config.worker.interval_ms < 100 {
            return Err(ConfigError::InvalidWorkerInterval(config.worker.interval_ms));
        }
        if config.scheduler.batch_size == 0 {
            return Err(ConfigError::InvalidSchedulerBatch(config.scheduler.batch_size));
        }
        if config.http_client.timeout_ms < 500 || config.http_client.timeout_ms > 60_000 {
            return Err(ConfigError::InvalidHttpTimeout(config.http_client.timeout_ms));
        }
        if config.sources.key_buckets == 0 {
            return Err(ConfigError::InvalidKeyBuckets(config.sources.key_buckets));
        }

        for source in &config.event_sources {
            if source.tenant.is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "Event source '{}' has an empty tenant",
                    source.name
                )));
            }
            if source.name.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "Event source name cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = GatewayConfig::default();
        assert_eq!(config.worker.interval_ms, 1_000);
        assert_eq!(config.worker.batch_size, 50);
        assert_eq!(config.worker.max_concurrent_batches, 5);
        assert_eq!(config.scheduler.grace_hours, 24);
        assert_eq!(config.database.path, ".fluxgate/fluxgate.db");
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn yaml_parsing_overrides_defaults() {
        let yaml = r#"
worker:
  interval_ms: 2000
  batch_size: 25
scheduler:
  interval_ms: 30000
  grace_hours: 12
security:
  enforce_https: true
  block_private_networks: true
http_client:
  timeout_ms: 10000
database:
  path: /custom/gateway.db
event_sources:
  - id: "3b2e6f0e-72a5-4c7e-9e43-0a2792c02a6a"
    tenant: t-100
    name: ingress
    active: true
    params:
      kind: http_push
      poll_interval_ms: 750
"#;

        let config: GatewayConfig = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.worker.interval_ms, 2_000);
        assert_eq!(config.worker.batch_size, 25);
        assert_eq!(config.scheduler.grace_hours, 12);
        assert!(config.security.enforce_https);
        assert_eq!(config.http_client.timeout_ms, 10_000);
        assert_eq!(config.database.path, "/custom/gateway.db");
        assert_eq!(config.event_sources.len(), 1);
        ConfigLoader::validate(&config).expect("Config should be valid");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = GatewayConfig::default();
        config.logging.level = "loud".into();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));

        let mut config = GatewayConfig::default();
        config.worker.batch_size = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidWorkerBatch(0))
        ));

        let mut config = GatewayConfig::default();
        config.http_client.timeout_ms = 100;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidHttpTimeout(100))
        ));
    }
}
