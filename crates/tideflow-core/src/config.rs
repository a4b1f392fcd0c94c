#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! A [`Config`] is installed per thread with
//! [`runtime::configure`](crate::runtime::configure). All fields have sane
//! defaults; the `with_*` builders adjust one field at a time.
//!
//! With the `config-file` feature, a configuration can also be parsed from a
//! flat TOML table:
//!
//! ```ignore
//! let config = Config::from_toml_str("async_updates = false\nmax_update_count = 20")?;
//! ```

use thiserror::Error;

/// Default runaway threshold: how many times one node may re-enter the same
/// queue pass before the pass is aborted.
pub const DEFAULT_MAX_UPDATE_COUNT: usize = 100;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `max_update_count` must allow at least one re-entry.
    #[error("max_update_count must be at least 1")]
    ZeroUpdateLimit,

    /// The TOML document could not be parsed.
    #[cfg(feature = "config-file")]
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Runtime configuration for the reactive engine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(default, deny_unknown_fields))]
pub struct Config {
    /// When `false`, every trigger runs its node immediately instead of
    /// queueing it for the next flush.
    pub async_updates: bool,
    /// Runaway threshold used when `detect_runaway` is on.
    pub max_update_count: usize,
    /// Count per-node re-entries during a flush and abort runaway passes.
    pub detect_runaway: bool,
    /// Report evaluation and setter failures to the diagnostics sink.
    pub report_expression_errors: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            async_updates: true,
            max_update_count: DEFAULT_MAX_UPDATE_COUNT,
            detect_runaway: cfg!(debug_assertions),
            report_expression_errors: true,
        }
    }
}

impl Config {
    /// Toggle deferred (batched) updates.
    #[must_use]
    pub fn with_async_updates(mut self, enabled: bool) -> Self {
        self.async_updates = enabled;
        self
    }

    /// Set the runaway threshold.
    #[must_use]
    pub fn with_max_update_count(mut self, count: usize) -> Self {
        self.max_update_count = count;
        self
    }

    /// Toggle runaway detection.
    #[must_use]
    pub fn with_detect_runaway(mut self, enabled: bool) -> Self {
        self.detect_runaway = enabled;
        self
    }

    /// Toggle reporting of evaluation and setter failures.
    #[must_use]
    pub fn with_report_expression_errors(mut self, enabled: bool) -> Self {
        self.report_expression_errors = enabled;
        self
    }

    /// Check field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_update_count == 0 {
            return Err(ConfigError::ZeroUpdateLimit);
        }
        Ok(())
    }

    /// Parse and validate a configuration from a flat TOML table. Missing
    /// fields take their defaults.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }
}
