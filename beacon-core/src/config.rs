use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::models::Algorithm;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub registry: RegistryConfig,
    pub heartbeat: HeartbeatConfig,
    pub health_check: HealthCheckConfig,
    pub load_balancer: LoadBalancerConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8500,
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

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Instances without a heartbeat for longer than this are marked inactive
    pub heartbeat_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    /// TTL of the best-effort mirror copy of each service record
    pub mirror_ttl_secs: u64,
    pub mirror_capacity: u64,
    /// Optional Redis URL for a shared mirror tier
    pub redis_url: Option<String>,
    /// Retries for a write that loses an optimistic revision race
    pub max_write_retries: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 300,
            cleanup_interval_secs: 60,
            mirror_ttl_secs: 300,
            mirror_capacity: 10_000,
            redis_url: None,
            max_write_retries: 5,
        }
    }
}

impl RegistryConfig {
    #[must_use]
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        let secs = i64::try_from(self.heartbeat_timeout_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1000))
    }

    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub timeout_minutes: u64,
    pub retention_days: u64,
    pub prune_interval_secs: u64,
    /// Upper bound on retained records per instance
    pub history_per_target: usize,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: 5,
            retention_days: 7,
            prune_interval_secs: 3600,
            history_per_target: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub retries: u32,
    pub interval_ms: u64,
    pub sweep_interval_secs: u64,
    pub result_ttl_secs: u64,
    /// Number of recent results kept per instance for statistics
    pub stats_window: usize,
}

impl HealthCheckConfig {
    /// Largest attempt budget for one check
    pub const MAX_RETRIES: u32 = 10;
    /// Largest per-attempt timeout, and largest pause between attempts
    pub const MAX_WAIT_MS: u64 = 60_000;

    /// Problems with a set of per-check settings; empty when usable
    #[must_use]
    pub fn check_errors(timeout_ms: u64, retries: u32, interval_ms: u64) -> Vec<String> {
        let mut errors = Vec::new();
        if !(1..=Self::MAX_WAIT_MS).contains(&timeout_ms) {
            errors.push(format!("timeout_ms must be between 1 and {}", Self::MAX_WAIT_MS));
        }
        if !(1..=Self::MAX_RETRIES).contains(&retries) {
            errors.push(format!("retries must be between 1 and {}", Self::MAX_RETRIES));
        }
        if interval_ms > Self::MAX_WAIT_MS {
            errors.push(format!("interval_ms must be at most {}", Self::MAX_WAIT_MS));
        }
        errors
    }
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 5000,
            retries: 3,
            interval_ms: 1000,
            sweep_interval_secs: 30,
            result_ttl_secs: 60,
            stats_window: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub default_algorithm: String,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            default_algorithm: Algorithm::RoundRobin.as_str().to_string(),
        }
    }
}

impl LoadBalancerConfig {
    pub fn algorithm(&self) -> crate::Result<Algorithm> {
        self.default_algorithm.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub cache_ttl_secs: u64,
    pub cache_capacity: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 30,
            cache_capacity: 1_000,
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

        // BEACON_REGISTRY__HEARTBEAT_TIMEOUT_SECS, BEACON_SERVER__HTTP_PORT, ...
        builder = builder.add_source(
            Environment::with_prefix("BEACON")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check every setting and report all problems at once
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be non-zero".to_string());
        }

        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "warning" | "error"
        ) {
            errors.push(format!("logging.level is invalid: {}", self.logging.level));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {}",
                self.logging.format
            ));
        }

        if self.registry.heartbeat_timeout_secs == 0 {
            errors.push("registry.heartbeat_timeout_secs must be non-zero".to_string());
        }
        if self.registry.cleanup_interval_secs == 0 {
            errors.push("registry.cleanup_interval_secs must be non-zero".to_string());
        }
        if self.registry.max_write_retries == 0 {
            errors.push("registry.max_write_retries must be at least 1".to_string());
        }

        if self.heartbeat.timeout_minutes == 0 {
            errors.push("heartbeat.timeout_minutes must be non-zero".to_string());
        }
        if self.heartbeat.prune_interval_secs == 0 {
            errors.push("heartbeat.prune_interval_secs must be non-zero".to_string());
        }

        let check = &self.health_check;
        errors.extend(
            HealthCheckConfig::check_errors(check.timeout_ms, check.retries, check.interval_ms)
                .into_iter()
                .map(|e| format!("health_check.{e}")),
        );
        if self.health_check.sweep_interval_secs == 0 {
            errors.push("health_check.sweep_interval_secs must be non-zero".to_string());
        }

        if let Err(e) = self.load_balancer.algorithm() {
            errors.push(e.to_string());
        }

        if self.discovery.cache_ttl_secs == 0 {
            errors.push("discovery.cache_ttl_secs must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.http_address(), "0.0.0.0:8500");
        assert_eq!(config.load_balancer.algorithm().unwrap(), Algorithm::RoundRobin);
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut config = Config::default();
        config.server.http_port = 0;
        config.health_check.retries = 0;
        config.load_balancer.default_algorithm = "fastest".to_string();
        config.logging.format = "xml".to_string();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("fastest")));
    }

    #[test]
    fn test_health_check_bounds() {
        assert!(HealthCheckConfig::check_errors(5000, 3, 1000).is_empty());
        assert!(HealthCheckConfig::check_errors(1, 1, 0).is_empty());

        let errors = HealthCheckConfig::check_errors(0, 11, 60_001);
        assert_eq!(errors.len(), 3);
        assert!(errors[0].starts_with("timeout_ms"));

        let mut config = Config::default();
        config.health_check.timeout_ms = 0;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors, vec!["health_check.timeout_ms must be between 1 and 60000".to_string()]);
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  http_port: 9100\nload_balancer:\n  default_algorithm: least_connections\nregistry:\n  heartbeat_timeout_secs: 45"
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.http_port, 9100);
        assert_eq!(config.registry.heartbeat_timeout_secs, 45);
        assert_eq!(config.load_balancer.algorithm().unwrap(), Algorithm::LeastConnections);
        // Untouched sections keep their defaults
        assert_eq!(config.discovery.cache_ttl_secs, 30);
    }

    #[test]
    fn test_heartbeat_timeout_conversion() {
        let registry = RegistryConfig {
            heartbeat_timeout_secs: 90,
            ..RegistryConfig::default()
        };
        assert_eq!(registry.heartbeat_timeout(), chrono::Duration::seconds(90));
    }
}
