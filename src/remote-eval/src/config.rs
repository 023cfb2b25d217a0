//! Remote evaluation configuration loading and validation

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{RemoteEvalError, Result};

/// Prefix of the environment variables recognized by [`RemoteEvalConfig::apply_env_overrides`]
pub const ENV_PREFIX: &str = "AUTH_EVALUATION_";

/// Complete remote evaluation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteEvalConfig {
    /// Subject the evaluation requests are sent on
    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    #[serde(default)]
    pub circuit_breaker: CircuitConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitConfig {
    /// When false the breaker is bypassed and errors propagate to the caller
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Hard timeout for a single transport round trip
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Minimum number of calls in the rolling window before the circuit can trip
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u64,
    /// Time spent Open before a probe is allowed
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    /// Failure rate (percent) within the window that trips the circuit
    #[serde(default = "default_error_threshold_percent")]
    pub error_threshold_percent: f64,
    #[serde(default = "default_rolling_window_ms")]
    pub rolling_window_ms: u64,
    #[serde(default = "default_rolling_buckets")]
    pub rolling_buckets: u32,
}

/// Configuration for the retry loop
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

// Default value functions
fn default_true() -> bool { true }
fn default_queue_name() -> String { "auth.evaluate".to_string() }
fn default_timeout_ms() -> u64 { 3000 }
fn default_failure_threshold() -> u64 { 5 }
fn default_reset_timeout_ms() -> u64 { 30_000 }
fn default_error_threshold_percent() -> f64 { 50.0 }
fn default_rolling_window_ms() -> u64 { 10_000 }
fn default_rolling_buckets() -> u32 { 10 }
fn default_max_attempts() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 500 }
fn default_backoff_multiplier() -> f64 { 2.0 }

impl Default for RemoteEvalConfig {
    fn default() -> Self {
        Self {
            queue_name: default_queue_name(),
            circuit_breaker: CircuitConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            timeout_ms: default_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            error_threshold_percent: default_error_threshold_percent(),
            rolling_window_ms: default_rolling_window_ms(),
            rolling_buckets: default_rolling_buckets(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl CircuitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn rolling_window(&self) -> Duration {
        Duration::from_millis(self.rolling_window_ms)
    }

    /// Width of one rolling bucket
    pub fn bucket_width(&self) -> Duration {
        Duration::from_millis(self.rolling_window_ms / u64::from(self.rolling_buckets.max(1)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(invalid("circuit_breaker.timeout_ms must be greater than 0"));
        }
        if self.failure_threshold == 0 {
            return Err(invalid("circuit_breaker.failure_threshold must be greater than 0"));
        }
        if self.reset_timeout_ms == 0 {
            return Err(invalid("circuit_breaker.reset_timeout_ms must be greater than 0"));
        }
        if !(0.0..=100.0).contains(&self.error_threshold_percent) {
            return Err(invalid(
                "circuit_breaker.error_threshold_percent must be between 0 and 100",
            ));
        }
        if self.rolling_buckets == 0 {
            return Err(invalid("circuit_breaker.rolling_buckets must be greater than 0"));
        }
        if self.rolling_window_ms < u64::from(self.rolling_buckets) {
            return Err(invalid(
                "circuit_breaker.rolling_window_ms must be at least one millisecond per bucket",
            ));
        }
        Ok(())
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be greater than 0"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid("retry.backoff_multiplier must be at least 1.0"));
        }
        Ok(())
    }
}

impl RemoteEvalConfig {
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .context("Failed to read configuration file")?;

        let config: RemoteEvalConfig = toml::from_str(&contents)
            .context("Failed to parse configuration file")?;

        Ok(config)
    }

    /// Override individual options from `AUTH_EVALUATION_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("QUEUE_NAME") {
            self.queue_name = value;
        }

        let cb = &mut self.circuit_breaker;
        override_value(&lookup, "ENABLED", &mut cb.enabled)?;
        override_value(&lookup, "TIMEOUT_MS", &mut cb.timeout_ms)?;
        override_value(&lookup, "FAILURE_THRESHOLD", &mut cb.failure_threshold)?;
        override_value(&lookup, "RESET_TIMEOUT_MS", &mut cb.reset_timeout_ms)?;
        override_value(&lookup, "ERROR_THRESHOLD_PERCENT", &mut cb.error_threshold_percent)?;
        override_value(&lookup, "ROLLING_WINDOW_MS", &mut cb.rolling_window_ms)?;
        override_value(&lookup, "ROLLING_BUCKETS", &mut cb.rolling_buckets)?;

        let retry = &mut self.retry;
        override_value(&lookup, "MAX_ATTEMPTS", &mut retry.max_attempts)?;
        override_value(&lookup, "BASE_DELAY_MS", &mut retry.base_delay_ms)?;
        override_value(&lookup, "BACKOFF_MULTIPLIER", &mut retry.backoff_multiplier)?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.queue_name.trim().is_empty() {
            return Err(invalid("queue_name must not be empty"));
        }
        self.circuit_breaker.validate()?;
        self.retry.validate()
    }
}

fn override_value<T, F>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *target = raw.trim().parse().map_err(|_| {
            RemoteEvalError::Configuration(format!(
                "invalid value '{}' for {}{}",
                raw, ENV_PREFIX, key
            ))
        })?;
    }
    Ok(())
}

fn invalid(message: &str) -> RemoteEvalError {
    RemoteEvalError::Configuration(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = RemoteEvalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue_name, "auth.evaluate");
        assert_eq!(config.circuit_breaker.bucket_width(), Duration::from_millis(1000));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RemoteEvalConfig = toml::from_str(
            r#"
            queue_name = "authz.check"

            [circuit_breaker]
            failure_threshold = 3
            reset_timeout_ms = 100

            [retry]
            max_attempts = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.queue_name, "authz.check");
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.reset_timeout_ms, 100);
        assert_eq!(config.circuit_breaker.timeout_ms, 3000);
        assert!(config.circuit_breaker.enabled);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay_ms, 500);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ENABLED", "false"),
            ("TIMEOUT_MS", "250"),
            ("BACKOFF_MULTIPLIER", "1.5"),
            ("QUEUE_NAME", "auth.other"),
        ]
        .into_iter()
        .collect();

        let mut config = RemoteEvalConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert!(!config.circuit_breaker.enabled);
        assert_eq!(config.circuit_breaker.timeout_ms, 250);
        assert_eq!(config.retry.backoff_multiplier, 1.5);
        assert_eq!(config.queue_name, "auth.other");
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = RemoteEvalConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "MAX_ATTEMPTS").then(|| "three".to_string())
        });

        assert!(matches!(result, Err(RemoteEvalError::Configuration(_))));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = RemoteEvalConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = RemoteEvalConfig::default();
        config.circuit_breaker.error_threshold_percent = 150.0;
        assert!(config.validate().is_err());

        let mut config = RemoteEvalConfig::default();
        config.circuit_breaker.rolling_buckets = 0;
        assert!(config.validate().is_err());

        let mut config = RemoteEvalConfig::default();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = RemoteEvalConfig::default();
        config.queue_name = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
