//! Instrument constants and their per-mode resolution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-instrument limits and geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConstants {
    /// Instrument name
    pub instrument: String,
    /// Maximum vertical gap of slit 3
    pub s3max: f64,
    /// Maximum vertical gap of slit 4, if the instrument has one
    pub s4max: Option<f64>,
    /// Largest theta the slit 3 scaling is relative to
    pub max_theta: f64,
    /// Distance between slit 1 and slit 2 (mm)
    pub s1s2: f64,
    /// Distance between slit 2 and the sample (mm)
    pub s2sa: f64,
    /// Slits whose gaps and centres are read and restored
    pub slits: Vec<String>,
    /// Supermirror blocks removed when an angle run asks for no mirror
    pub mirror_blocks: Vec<String>,
    /// Gap used while oscillating when none is requested
    pub default_osc_gap: f64,
    /// Whether the instrument has a coarse (secondary) height stage
    pub has_height2: bool,
}

impl Default for InstrumentConstants {
    fn default() -> Self {
        Self {
            instrument: "INTER".to_string(),
            s3max: 60.0,
            s4max: Some(53.0),
            max_theta: 2.3,
            s1s2: 1940.5,
            s2sa: 364.0,
            slits: ["S1", "S2", "S3", "S4"].map(String::from).to_vec(),
            mirror_blocks: ["SM1", "SM2"].map(String::from).to_vec(),
            default_osc_gap: 10.0,
            has_height2: true,
        }
    }
}

/// Fields a mode may override.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeOverrides {
    /// Slit 3 maximum vertical gap
    pub s3max: Option<f64>,
    /// Slit 4 maximum vertical gap
    pub s4max: Option<f64>,
    /// Theta the slit 3 scaling is relative to
    pub max_theta: Option<f64>,
    /// Oscillation gap default
    pub default_osc_gap: Option<f64>,
}

/// Resolves instrument constants for a mode.
///
/// Unknown modes are not an error here: validating modes belongs to the
/// control system.
pub trait ConstantsProvider: Send + Sync {
    /// Constants with the overrides of `mode` applied.
    fn constants_for(&self, mode: &str) -> InstrumentConstants;
}

/// Constants from configuration: a base set plus optional per-mode overrides.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredConstants {
    base: InstrumentConstants,
    modes: HashMap<String, ModeOverrides>,
}

impl ConfiguredConstants {
    /// Base constants plus overrides keyed by mode name (any case).
    pub fn new(base: InstrumentConstants, modes: HashMap<String, ModeOverrides>) -> Self {
        let modes = modes
            .into_iter()
            .map(|(name, overrides)| (name.to_uppercase(), overrides))
            .collect();
        Self { base, modes }
    }
}

impl ConstantsProvider for ConfiguredConstants {
    fn constants_for(&self, mode: &str) -> InstrumentConstants {
        let mut constants = self.base.clone();
        if let Some(o) = self.modes.get(&mode.to_uppercase()) {
            if let Some(v) = o.s3max {
                constants.s3max = v;
            }
            if o.s4max.is_some() {
                constants.s4max = o.s4max;
            }
            if let Some(v) = o.max_theta {
                constants.max_theta = v;
            }
            if let Some(v) = o.default_osc_gap {
                constants.default_osc_gap = v;
            }
        }
        constants
    }
}
