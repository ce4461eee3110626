//! Rate limit rules configuration and lookup.
//!
//! Rules are loaded once at startup, validated at registration time and never
//! change afterwards. A check against a rule name that was not registered is a
//! configuration error, not a throttling outcome.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{FloodgateError, Result};

/// Built-in rules registered when the configuration names none.
///
/// `(name, window_ms, max_requests)`
const PRESETS: &[(&str, u64, u64)] = &[
    ("api-default", 60_000, 100),
    ("auth-login", 15 * 60_000, 5),
    ("auth-signup", 3_600_000, 3),
    ("upload", 60_000, 20),
    ("ai-generate", 60_000, 10),
    ("webhook", 60_000, 300),
];

/// A named rate limit policy: at most `max_requests` per `window_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitRule {
    name: String,
    window_ms: u64,
    max_requests: u64,
}

impl RateLimitRule {
    /// Create a validated rule.
    ///
    /// Both the window and the request quota must be strictly positive.
    pub fn new(name: impl Into<String>, window_ms: u64, max_requests: u64) -> Result<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(FloodgateError::InvalidRule {
                name,
                reason: "rule name must not be empty".to_string(),
            });
        }
        if window_ms == 0 {
            return Err(FloodgateError::InvalidRule {
                name,
                reason: "window_ms must be positive".to_string(),
            });
        }
        if max_requests == 0 {
            return Err(FloodgateError::InvalidRule {
                name,
                reason: "max_requests must be positive".to_string(),
            });
        }

        Ok(Self {
            name,
            window_ms,
            max_requests,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }
}

/// Coarse time unit for rule windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Length of one unit in milliseconds.
    pub fn as_millis(&self) -> u64 {
        match self {
            TimeUnit::Second => 1_000,
            TimeUnit::Minute => 60_000,
            TimeUnit::Hour => 3_600_000,
            TimeUnit::Day => 86_400_000,
        }
    }
}

/// Rule as written in configuration.
///
/// Exactly one of `window_ms` or `unit` must be present. `units` multiplies
/// `unit`, so `unit: minute, units: 15` is a fifteen minute window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Maximum admitted requests per window
    pub max_requests: u64,
    /// Window length in milliseconds
    #[serde(default)]
    pub window_ms: Option<u64>,
    /// Window length as a time unit
    #[serde(default)]
    pub unit: Option<TimeUnit>,
    /// Multiplier applied to `unit`
    #[serde(default = "default_units")]
    pub units: u64,
}

fn default_units() -> u64 {
    1
}

impl RuleConfig {
    /// Resolve the configured window and validate into a [`RateLimitRule`].
    pub fn to_rule(&self, name: &str) -> Result<RateLimitRule> {
        let window_ms = match (self.window_ms, self.unit) {
            (Some(ms), None) => ms,
            (None, Some(unit)) => unit.as_millis().checked_mul(self.units).ok_or_else(|| {
                FloodgateError::InvalidRule {
                    name: name.to_string(),
                    reason: "window overflows u64 milliseconds".to_string(),
                }
            })?,
            (Some(_), Some(_)) => {
                return Err(FloodgateError::InvalidRule {
                    name: name.to_string(),
                    reason: "set either window_ms or unit, not both".to_string(),
                })
            }
            (None, None) => {
                return Err(FloodgateError::InvalidRule {
                    name: name.to_string(),
                    reason: "one of window_ms or unit is required".to_string(),
                })
            }
        };

        RateLimitRule::new(name, window_ms, self.max_requests)
    }
}

/// A rules document: rule name mapped to its configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub rules: BTreeMap<String, RuleConfig>,
}

impl RulesConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| FloodgateError::Config(format!("Failed to parse rate limit rules: {}", e)))
    }

    /// Validate every entry and build the immutable rule set.
    ///
    /// An empty document yields the built-in presets.
    pub fn build(&self) -> Result<RuleSet> {
        if self.rules.is_empty() {
            return Ok(RuleSet::presets());
        }

        let mut set = RuleSet::new();
        for (name, rule) in &self.rules {
            set.register(rule.to_rule(name)?)?;
        }
        Ok(set)
    }
}

/// The registered rules, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: HashMap<String, Arc<RateLimitRule>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in rule set.
    pub fn presets() -> Self {
        let mut set = Self::new();
        for &(name, window_ms, max_requests) in PRESETS {
            // Presets are static and known to be valid.
            if let Ok(rule) = RateLimitRule::new(name, window_ms, max_requests) {
                set.rules.insert(name.to_string(), Arc::new(rule));
            }
        }
        set
    }

    /// Build a set from already validated rules.
    pub fn from_rules<I>(rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = RateLimitRule>,
    {
        let mut set = Self::new();
        for rule in rules {
            set.register(rule)?;
        }
        Ok(set)
    }

    /// Register a rule. Names must be unique.
    pub fn register(&mut self, rule: RateLimitRule) -> Result<()> {
        if self.rules.contains_key(rule.name()) {
            return Err(FloodgateError::InvalidRule {
                name: rule.name().to_string(),
                reason: "duplicate rule name".to_string(),
            });
        }

        debug!(
            rule = %rule.name(),
            window_ms = rule.window_ms(),
            max_requests = rule.max_requests(),
            "Registered rate limit rule"
        );
        self.rules.insert(rule.name().to_string(), Arc::new(rule));
        Ok(())
    }

    /// Resolve a rule by name.
    pub fn get(&self, name: &str) -> Result<&Arc<RateLimitRule>> {
        self.rules
            .get(name)
            .ok_or_else(|| FloodgateError::UnknownRule(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// All rules, sorted by name.
    pub fn sorted(&self) -> Vec<&RateLimitRule> {
        let mut rules: Vec<&RateLimitRule> = self.rules.values().map(|r| r.as_ref()).collect();
        rules.sort_by(|a, b| a.name().cmp(b.name()));
        rules
    }
}
