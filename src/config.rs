//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Default unprompted-speech window (15 minutes).
pub const DEFAULT_UNPROMPTED_INTERVAL: Duration = Duration::from_secs(900);

/// Default Dirichlet concentration used for score jitter.
pub const DEFAULT_JITTER_ALPHA: [f64; 2] = [18.0, 2.0];

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How long the bot must stay quiet before it may speak unprompted.
    pub unprompted_interval: Duration,
    /// Upper bound on a single answer module invocation.
    pub module_timeout: Duration,
    /// Invoke answer modules concurrently instead of one after another.
    pub parallel_modules: bool,
    /// Dirichlet concentration parameters for the jitter draw.
    pub jitter_alpha: Vec<f64>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            unprompted_interval: DEFAULT_UNPROMPTED_INTERVAL,
            module_timeout: Duration::from_secs(5),
            parallel_modules: false,
            jitter_alpha: DEFAULT_JITTER_ALPHA.to_vec(),
        }
    }
}

impl DispatcherConfig {
    /// Build a config from `SOCIAL_DISPATCH_*` environment variables.
    ///
    /// Unset or unparseable numeric values fall back to the defaults.
    /// The jitter alpha is checked by [`DispatcherConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let unprompted_interval = std::env::var("SOCIAL_DISPATCH_UNPROMPTED_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.unprompted_interval);

        let module_timeout = std::env::var("SOCIAL_DISPATCH_MODULE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.module_timeout);

        let parallel_modules = std::env::var("SOCIAL_DISPATCH_PARALLEL_MODULES")
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.parallel_modules);

        let jitter_alpha = match std::env::var("SOCIAL_DISPATCH_JITTER_ALPHA") {
            Ok(raw) => parse_alpha(&raw)?,
            Err(_) => defaults.jitter_alpha,
        };

        let config = Self {
            unprompted_interval,
            module_timeout,
            parallel_modules,
            jitter_alpha,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that the dispatcher relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.module_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "module_timeout".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.jitter_alpha.len() < 2 {
            return Err(ConfigError::InvalidValue {
                key: "jitter_alpha".into(),
                message: format!(
                    "needs at least two concentration parameters, got {}",
                    self.jitter_alpha.len()
                ),
            });
        }
        if let Some(bad) = self
            .jitter_alpha
            .iter()
            .find(|a| !a.is_finite() || **a <= 0.0)
        {
            return Err(ConfigError::InvalidValue {
                key: "jitter_alpha".into(),
                message: format!("concentration parameters must be positive, got {bad}"),
            });
        }
        Ok(())
    }
}

/// Parse a comma-separated list of concentration parameters, e.g. `"18,2"`.
fn parse_alpha(raw: &str) -> Result<Vec<f64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>().map_err(|e| ConfigError::InvalidValue {
                key: "SOCIAL_DISPATCH_JITTER_ALPHA".into(),
                message: format!("{s:?}: {e}"),
            })
        })
        .collect()
}
