//! Sample definitions consumed by the measurement actions.

use serde::{Deserialize, Serialize};

use super::axes::AxisValueMap;

/// A sample mounted on the instrument.
///
/// Read-only for the duration of one action. Offsets are the nominal values
/// the sample axes return to after a transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sample {
    /// Run title prefix
    pub title: String,
    /// Appended to the title for angle runs
    pub subtitle: String,
    /// Sample translation
    pub translation: f64,
    /// Nominal fine height
    pub height_offset: f64,
    /// Nominal coarse (secondary) height
    pub height2_offset: f64,
    /// Phi offset, used outside liquid mode
    pub phi_offset: f64,
    /// Psi offset, used outside liquid mode
    pub psi_offset: f64,
    /// Relative angular resolution (dθ/θ)
    pub resolution: f64,
    /// Beam footprint on the sample (mm)
    pub footprint: f64,
    /// Default horizontal gaps for this sample
    pub hgaps: AxisValueMap,
}

impl Sample {
    /// Sample with default geometry and no offsets.
    pub fn new(title: impl Into<String>, subtitle: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            subtitle: subtitle.into(),
            ..Self::default()
        }
    }

    /// Nominal fine and coarse heights.
    pub fn with_heights(mut self, height: f64, height2: f64) -> Self {
        self.height_offset = height;
        self.height2_offset = height2;
        self
    }

    /// Resolution and footprint used for the slit gaps.
    pub fn with_geometry(mut self, resolution: f64, footprint: f64) -> Self {
        self.resolution = resolution;
        self.footprint = footprint;
        self
    }

    /// Default horizontal gaps.
    pub fn with_hgaps(mut self, hgaps: AxisValueMap) -> Self {
        self.hgaps = hgaps;
        self
    }
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            title: String::new(),
            subtitle: String::new(),
            translation: 0.0,
            height_offset: 0.0,
            height2_offset: 0.0,
            phi_offset: 0.0,
            psi_offset: 0.0,
            resolution: 0.03,
            footprint: 60.0,
            hgaps: AxisValueMap::new(),
        }
    }
}
