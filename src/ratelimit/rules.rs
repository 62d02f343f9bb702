//! Named rate limit policies loaded from configuration.
//!
//! A rule ties an action name to an algorithm and a window, so callers only
//! supply the caller identity at check time:
//!
//! ```yaml
//! rules:
//!   - name: msg
//!     scope: user
//!     algorithm: sliding
//!     requests_per_unit: 5
//!     unit: minute
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::key::{validate_key, RateLimitKey};
use super::window::{Algorithm, TimeWindow, Window};
use crate::error::{KvGuardError, Result};

/// Window applied when a rule gives neither a unit nor a positive `window_ms`.
pub const DEFAULT_RULE_WINDOW: Duration = Duration::from_secs(60);

/// A set of named rate limit rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitRules {
    /// The configured rules
    #[serde(default)]
    pub rules: Vec<RateLimitRule>,
}

/// A rate limit rule for one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Action name, used as the last segment of the rate limit key
    pub name: String,
    /// Key scope, the first segment of the rate limit key
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Algorithm to enforce the rule with
    #[serde(default = "default_algorithm")]
    pub algorithm: Algorithm,
    /// Number of requests allowed per window
    pub requests_per_unit: u64,
    /// Window preset
    #[serde(default)]
    pub unit: Option<TimeWindow>,
    /// Window length in milliseconds, takes precedence over `unit` when positive
    #[serde(default)]
    pub window_ms: Option<u64>,
}

fn default_scope() -> String {
    "user".to_string()
}

fn default_algorithm() -> Algorithm {
    Algorithm::Fixed
}

impl RateLimitRule {
    /// The window this rule enforces.
    pub fn window(&self) -> Result<Window> {
        let duration = match (self.window_ms, self.unit) {
            (Some(ms), _) if ms > 0 => Duration::from_millis(ms),
            (_, Some(unit)) => unit.duration(),
            _ => DEFAULT_RULE_WINDOW,
        };
        Window::new(self.requests_per_unit, duration)
    }

    /// The rate limit key for `identity` under this rule.
    pub fn key_for(&self, identity: impl std::fmt::Display) -> Result<RateLimitKey> {
        RateLimitKey::new(&self.scope, identity, &self.name)
    }
}

impl RateLimitRules {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: RateLimitRules = serde_yaml::from_str(yaml).map_err(|e| {
            KvGuardError::Config(format!("Failed to parse rate limit rules: {}", e))
        })?;
        rules.validate()?;
        Ok(rules)
    }

    /// Find a rule by name.
    pub fn get(&self, name: &str) -> Option<&RateLimitRule> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    /// Check names are valid key segments and unique.
    pub fn validate(&self) -> Result<()> {
        for (i, rule) in self.rules.iter().enumerate() {
            validate_key(&rule.name, "rule name")
                .and_then(|_| validate_key(&rule.scope, "rule scope"))
                .map_err(|e| KvGuardError::Config(e.to_string()))?;

            if self.rules[..i].iter().any(|other| other.name == rule.name) {
                return Err(KvGuardError::Config(format!(
                    "duplicate rate limit rule '{}'",
                    rule.name
                )));
            }
        }
        Ok(())
    }
}
