//! Node configuration

use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Relay node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub upstream: Option<UpstreamConfig>,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the pusher listens on
    pub listen: String,
    /// Shared passphrase gating downstream subscriptions
    pub code: String,
    /// Capacity of the inbound channel between puller and engine
    pub inbound_buffer: usize,
    /// Capacity of each subscriber's outbound channel
    pub outbound_buffer: usize,
    /// Drain window granted to active subscribers on shutdown
    pub shutdown_grace_seconds: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:50061".to_string(),
            code: String::new(),
            inbound_buffer: 64,
            outbound_buffer: 64,
            shutdown_grace_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// `host:port` of the node to pull jobs from
    pub address: String,
    /// Passphrase presented to the upstream
    pub code: String,
    pub connect_timeout_seconds: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            code: String::new(),
            connect_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Receive attempts per pull before the upstream counts as lost
    pub limit: u32,
    /// First wait between failed receives
    pub initial_seconds: u64,
    /// Multiplier applied to the wait after each failure
    pub growth: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            initial_seconds: 1,
            growth: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (JOBLINK_NODE_LISTEN, etc.)
        builder = builder.add_source(
            Environment::with_prefix("JOBLINK")
                .separator("_")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from a config file, with environment overrides
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Validate configuration, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.node.listen.is_empty() {
            errors.push("node.listen must not be empty".to_string());
        }
        if self.node.code.is_empty() {
            errors.push("node.code must be set (subscribers authenticate with it)".to_string());
        }
        if self.node.inbound_buffer == 0 || self.node.outbound_buffer == 0 {
            errors.push("channel buffers must be at least 1".to_string());
        }
        if self.retry.limit == 0 {
            errors.push("retry.limit must be at least 1".to_string());
        }
        if let Some(upstream) = &self.upstream {
            if upstream.address.is_empty() {
                errors.push("upstream.address must not be empty when upstream is set".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.node.shutdown_grace_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.node.listen, "0.0.0.0:50061");
        assert!(config.upstream.is_none());
        assert_eq!(config.retry.limit, 5);
        assert_eq!(config.retry.growth, 2);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate_rejects_empty_code() {
        let config = Config::default();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("node.code")));
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        let mut config = Config::default();
        config.node.code = "sesame".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_upstream_without_address() {
        let mut config = Config::default();
        config.node.code = "sesame".to_string();
        config.upstream = Some(UpstreamConfig::default());
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("upstream.address")));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "node:\n  listen: \"127.0.0.1:9000\"\n  code: \"sesame\"\nupstream:\n  address: \"127.0.0.1:9001\"\n  code: \"sesame\"\nretry:\n  limit: 3"
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.node.listen, "127.0.0.1:9000");
        assert_eq!(config.upstream.as_ref().unwrap().address, "127.0.0.1:9001");
        assert_eq!(config.retry.limit, 3);
        // Unspecified fields keep their defaults
        assert_eq!(config.retry.growth, 2);
        assert!(config.validate().is_ok());
    }
}
