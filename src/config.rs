//! Configuration using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. An optional TOML file (`--config`, or `config/refl_daq.toml` if present)
//! 3. Environment variables prefixed with `REFL_DAQ_`, nested with `__`
//!    (e.g. `REFL_DAQ_RECOVERY__DECISION_DELAY_SECS=2`)
//!
//! # Example
//! ```no_run
//! use refl_daq::config::ScriptConfig;
//!
//! let config = ScriptConfig::load()?;
//! config.validate()?;
//! println!("Instrument: {}", config.constants.instrument);
//! # Ok::<(), refl_daq::error::ScriptError>(())
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{ScriptError, ScriptResult};
use crate::experiment::guard::DEFAULT_DECISION_DELAY;
use crate::experiment::{
    ConfiguredConstants, ConstantsProvider, EstimateRates, InstrumentConstants, ModeOverrides,
};

/// File read by [`ScriptConfig::load`] when it exists.
pub const DEFAULT_CONFIG_PATH: &str = "config/refl_daq.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Name and logging
    pub application: ApplicationConfig,
    /// Interrupt recovery
    pub recovery: RecoveryConfig,
    /// Dry-run duration rates
    pub estimator: EstimateRates,
    /// Base instrument constants
    pub constants: InstrumentConstants,
    /// Per-mode overrides of the base constants
    pub modes: HashMap<String, ModeOverrides>,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name used in logs
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "refl-daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Interrupt recovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Pause after the operator's decision before the script is stopped
    pub decision_delay_secs: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            decision_delay_secs: 5.0,
        }
    }
}

impl RecoveryConfig {
    /// The delay as a `Duration`. Values no `Duration` can hold fall back to
    /// the default; [`ScriptConfig::validate`] rejects them up front.
    pub fn decision_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.decision_delay_secs.max(0.0))
            .unwrap_or(DEFAULT_DECISION_DELAY)
    }
}

impl ScriptConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] (if present) and the environment.
    pub fn load() -> ScriptResult<Self> {
        Ok(Self::figment(Path::new(DEFAULT_CONFIG_PATH)).extract()?)
    }

    /// Load from `path` and the environment. A missing explicit file is an error.
    pub fn load_from<P: AsRef<Path>>(path: Option<P>) -> ScriptResult<Self> {
        match path {
            Some(path) => {
                let path = path.as_ref();
                if !path.is_file() {
                    return Err(ScriptError::Configuration(format!(
                        "config file {} not found",
                        path.display()
                    )));
                }
                Ok(Self::figment(path).extract()?)
            }
            None => Self::load(),
        }
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(ScriptConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("REFL_DAQ_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ScriptResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ScriptError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let rates = &self.estimator;
        for (name, value) in [
            ("uamps_per_hour", rates.uamps_per_hour),
            ("seconds_per_minute", rates.seconds_per_minute),
            ("frames_per_minute", rates.frames_per_minute),
        ] {
            if value <= 0.0 || !value.is_finite() {
                return Err(ScriptError::Configuration(format!(
                    "estimator.{name} must be positive, got {value}"
                )));
            }
        }

        let delay = self.recovery.decision_delay_secs;
        if !(delay.is_finite() && delay >= 0.0) {
            return Err(ScriptError::Configuration(format!(
                "recovery.decision_delay_secs must be a finite, non-negative number, got {}",
                self.recovery.decision_delay_secs
            )));
        }

        if self.constants.slits.is_empty() {
            return Err(ScriptError::Configuration(
                "constants.slits must name at least one slit".to_string(),
            ));
        }
        Ok(())
    }

    /// Constants provider for the configured instrument and modes.
    pub fn constants_provider(&self) -> Arc<dyn ConstantsProvider> {
        Arc::new(ConfiguredConstants::new(
            self.constants.clone(),
            self.modes.clone(),
        ))
    }
}
