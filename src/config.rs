//! Configuration management for Floodgate.
//!
//! Settings come from an optional YAML file layered under `FLOODGATE__*`
//! environment variables (`FLOODGATE__SERVER__HTTP_ADDR=0.0.0.0:9000`).
//! Everything is read once at startup; there is no hot reload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{FloodgateError, Result};
use crate::ratelimit::{RuleConfig, RuleSet, RulesConfig, DEFAULT_GRACE_MULTIPLE};

/// Main configuration for the Floodgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Limiter housekeeping configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Path to a standalone rules file; takes precedence over `rules`
    #[serde(default)]
    pub rules_path: Option<PathBuf>,

    /// Inline rules, rule name to definition
    #[serde(default)]
    pub rules: BTreeMap<String, RuleConfig>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a proxy that overwrites these headers.
    #[serde(default)]
    pub trust_proxy_headers: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            trust_proxy_headers: false,
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Limiter housekeeping configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// How often the sweeper runs, in milliseconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Maximum records evicted per sweep batch
    #[serde(default = "default_sweep_budget")]
    pub sweep_budget: usize,

    /// Idle windows before a record is evictable
    #[serde(default = "default_grace_multiple")]
    pub grace_multiple: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval(),
            sweep_budget: default_sweep_budget(),
            grace_multiple: default_grace_multiple(),
        }
    }
}

impl LimiterConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn default_sweep_interval() -> u64 {
    30_000
}

fn default_sweep_budget() -> usize {
    1024
}

fn default_grace_multiple() -> u64 {
    DEFAULT_GRACE_MULTIPLE
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl ServiceConfig {
    /// Load configuration from an optional YAML file plus the environment.
    ///
    /// The layered loader lowercases map keys, so rule names from the file
    /// are re-read with serde_yaml to keep their exact spelling.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let mut config: ServiceConfig = builder
            .add_source(
                config::Environment::with_prefix("FLOODGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if let Some(path) = path {
            let file_rules = RulesConfig::from_file(path)?;
            if !file_rules.rules.is_empty() {
                config.rules = file_rules.rules;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ServiceConfig =
            serde_yaml::from_str(yaml).map_err(|e| FloodgateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject housekeeping settings that would disable eviction.
    pub fn validate(&self) -> Result<()> {
        if self.limiter.sweep_interval_ms == 0 {
            return Err(FloodgateError::Config(
                "limiter.sweep_interval_ms must be positive".to_string(),
            ));
        }
        if self.limiter.sweep_budget == 0 {
            return Err(FloodgateError::Config(
                "limiter.sweep_budget must be positive".to_string(),
            ));
        }
        if self.limiter.grace_multiple == 0 {
            return Err(FloodgateError::Config(
                "limiter.grace_multiple must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the validated rule set this configuration describes.
    ///
    /// A rules file wins over inline rules; with neither, the built-in
    /// presets apply.
    pub fn rule_set(&self) -> Result<RuleSet> {
        let rules = match &self.rules_path {
            Some(path) => RulesConfig::from_file(path)?,
            None => RulesConfig {
                rules: self.rules.clone(),
            },
        };

        let set = rules.build()?;
        info!(rules = set.len(), "Rate limit rules loaded");
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.server.http_addr, "127.0.0.1:8080".parse().unwrap());
        assert!(!config.server.trust_proxy_headers);
        assert_eq!(config.limiter.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.limiter.sweep_budget, 1024);
        assert_eq!(config.limiter.grace_multiple, 2);
        assert_eq!(config.logging.filter, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inline_rules() {
        let yaml = r#"
server:
  http_addr: 0.0.0.0:9000
  trust_proxy_headers: true
limiter:
  sweep_interval_ms: 5000
rules:
  api-default:
    max_requests: 3
    window_ms: 1000
"#;
        let config = ServiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.http_addr.port(), 9000);
        assert!(config.server.trust_proxy_headers);
        assert_eq!(config.limiter.sweep_interval_ms, 5000);
        assert_eq!(config.limiter.sweep_budget, 1024);

        let rules = config.rule_set().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.get("api-default").unwrap().max_requests(), 3);
    }

    #[test]
    fn test_no_rules_falls_back_to_presets() {
        let rules = ServiceConfig::default().rule_set().unwrap();
        assert!(rules.contains("api-default"));
        assert!(rules.contains("auth-login"));
    }

    #[test]
    fn test_invalid_rule_fails_at_load() {
        let yaml = r#"
rules:
  broken:
    max_requests: 0
    unit: second
"#;
        let config = ServiceConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.rule_set(),
            Err(FloodgateError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_zero_sweep_budget_rejected() {
        let yaml = r#"
limiter:
  sweep_budget: 0
"#;
        assert!(ServiceConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("floodgate-config-{}.yaml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "limiter:\n  grace_multiple: 4\nlogging:\n  json: true").unwrap();
        drop(file);

        let config = ServiceConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.limiter.grace_multiple, 4);
        assert!(config.logging.json);
    }

    #[test]
    fn test_load_keeps_rule_name_case() {
        let path = std::env::temp_dir().join(format!("floodgate-case-{}.yaml", std::process::id()));
        std::fs::write(&path, "rules:\n  authLogin: {max_requests: 5, unit: minute}\n").unwrap();

        let config = ServiceConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        let rules = config.rule_set().unwrap();
        let names: Vec<&str> = rules.sorted().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["authLogin"]);
        assert_eq!(rules.get("authLogin").unwrap().max_requests(), 5);
    }

    #[test]
    fn test_environment_overrides_file() {
        let path = std::env::temp_dir().join(format!("floodgate-env-{}.yaml", std::process::id()));
        std::fs::write(&path, "limiter:\n  sweep_budget: 100\n  sweep_interval_ms: 2500\n").unwrap();

        std::env::set_var("FLOODGATE__LIMITER__SWEEP_BUDGET", "7");
        let config = ServiceConfig::load(Some(&path));
        std::env::remove_var("FLOODGATE__LIMITER__SWEEP_BUDGET");
        std::fs::remove_file(&path).unwrap();

        let config = config.unwrap();
        assert_eq!(config.limiter.sweep_budget, 7);
        assert_eq!(config.limiter.sweep_interval_ms, 2500);
    }

    #[test]
    fn test_rules_path_wins() {
        let path = std::env::temp_dir().join(format!("floodgate-rules-{}.yaml", std::process::id()));
        std::fs::write(&path, "rules:\n  upload:\n    max_requests: 7\n    unit: hour\n").unwrap();

        let config = ServiceConfig {
            rules_path: Some(path.clone()),
            ..ServiceConfig::default()
        };
        let rules = config.rule_set().unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(rules.len(), 1);
        assert_eq!(rules.get("upload").unwrap().window_ms(), 3_600_000);
    }
}
