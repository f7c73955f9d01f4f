//! Measurement scripts.
//!
//! A script is a TOML file with named samples and an ordered list of actions:
//!
//! ```toml
//! [samples.quartz]
//! title = "Quartz"
//! subtitle = "in D2O"
//! translation = 100.0
//! hgaps = { S1HG = 40.0, S2HG = 30.0 }
//!
//! [[actions]]
//! kind = "run_angle"
//! sample = "quartz"
//! angle = 0.7
//! count_uamps = 20.0
//!
//! [[actions]]
//! kind = "transmission"
//! sample = "quartz"
//! title = "Quartz transmission"
//! count_seconds = 600.0
//! ```
//!
//! Every sample reference is resolved before the first action runs, so a typo
//! fails the script before anything moves.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{ScriptError, ScriptResult};
use crate::experiment::{
    ActionOutcome, AngleRequest, AutoHeight, AxisValueMap, MirrorRequest, Oscillation, Sample,
    ScriptSession, TransmissionRequest,
};
use crate::hardware::StopCondition;

/// Slit oscillation fields shared by both action kinds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OscillationStep {
    /// Override whether to oscillate
    pub osc_slit: Option<bool>,
    /// Override the oscillated block
    pub osc_block: Option<String>,
    /// Override the oscillation gap
    pub osc_gap: Option<f64>,
}

impl OscillationStep {
    fn apply(&self, mut base: Oscillation) -> Oscillation {
        if let Some(enabled) = self.osc_slit {
            base.enabled = enabled;
        }
        if let Some(block) = &self.osc_block {
            base.block = block.to_uppercase();
        }
        if let Some(gap) = self.osc_gap {
            base.gap = Some(gap);
        }
        base
    }
}

/// Counting fields shared by both action kinds.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CountStep {
    /// Charge to count
    pub count_uamps: Option<f64>,
    /// Seconds to count
    pub count_seconds: Option<f64>,
    /// Frames to count
    pub count_frames: Option<f64>,
}

impl CountStep {
    fn condition(&self) -> Option<StopCondition> {
        StopCondition::from_counts(self.count_uamps, self.count_seconds, self.count_frames)
    }
}

/// A `kind = "run_angle"` action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AngleStep {
    /// Key into `[samples]`
    pub sample: String,
    /// Theta in degrees
    pub angle: f64,
    /// Counting condition
    #[serde(flatten)]
    pub count: CountStep,
    /// Vertical gap overrides
    #[serde(default)]
    pub vgaps: AxisValueMap,
    /// Horizontal gaps; the sample's when absent
    pub hgaps: Option<AxisValueMap>,
    /// Mode to switch to
    pub mode: Option<String>,
    /// Absent removes every supermirror
    pub mirror: Option<MirrorRequest>,
    /// Oscillation overrides
    #[serde(flatten)]
    pub oscillation: OscillationStep,
    /// Laser height alignment; absent skips it
    pub auto_height: Option<AutoHeight>,
    /// Override the title-gaps default
    pub include_gaps_in_title: Option<bool>,
    /// Estimate instead of executing
    #[serde(default)]
    pub dry_run: bool,
}

/// A `kind = "transmission"` action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransmissionStep {
    /// Key into `[samples]`
    pub sample: String,
    /// Run title
    pub title: String,
    /// Counting condition
    #[serde(flatten)]
    pub count: CountStep,
    /// Vertical gap overrides
    #[serde(default)]
    pub vgaps: AxisValueMap,
    /// Horizontal gaps; the sample's when absent
    pub hgaps: Option<AxisValueMap>,
    /// Override the default lowering of 5
    pub height_offset: Option<f64>,
    /// Mode to switch to
    pub mode: Option<String>,
    /// Absent leaves the supermirrors where they are
    pub mirror: Option<MirrorRequest>,
    /// Oscillation overrides
    #[serde(flatten)]
    pub oscillation: OscillationStep,
    /// Override the title-gaps default
    pub include_gaps_in_title: Option<bool>,
    /// Override the gap angle of 0.7
    pub at_angle: Option<f64>,
    /// Estimate instead of executing
    #[serde(default)]
    pub dry_run: bool,
}

/// One script action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptStep {
    /// Measure at one angle
    RunAngle(AngleStep),
    /// Measure a transmission
    Transmission(TransmissionStep),
}

/// A step with its sample resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptRequest {
    /// Angle run
    Angle(AngleRequest),
    /// Transmission
    Transmission(TransmissionRequest),
}

/// Parsed script file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScriptFile {
    /// Samples by name
    #[serde(default)]
    pub samples: HashMap<String, Sample>,
    /// Actions in run order
    #[serde(default)]
    pub actions: Vec<ScriptStep>,
}

impl ScriptFile {
    /// Read and parse a script file.
    pub fn load<P: AsRef<Path>>(path: P) -> ScriptResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ScriptError::Configuration(format!("cannot read script {}: {e}", path.display()))
        })?;
        Self::parse(&text)
    }

    /// Parse script text.
    pub fn parse(text: &str) -> ScriptResult<Self> {
        Ok(toml::from_str(text)?)
    }

    fn sample(&self, name: &str) -> ScriptResult<Sample> {
        self.samples
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::UnknownSample(name.to_string()))
    }

    /// Resolve every step into a request.
    pub fn requests(&self) -> ScriptResult<Vec<ScriptRequest>> {
        self.actions
            .iter()
            .map(|step| -> ScriptResult<ScriptRequest> {
                match step {
                    ScriptStep::RunAngle(step) => {
                        let mut request = AngleRequest::new(self.sample(&step.sample)?, step.angle)
                            .with_vgaps(step.vgaps.clone())
                            .dry_run(step.dry_run);
                        request.count = step.count.condition();
                        request.hgaps = step.hgaps.clone();
                        request.mode = step.mode.clone();
                        if let Some(mirror) = &step.mirror {
                            request.mirror = Some(mirror.clone());
                        }
                        request.oscillation = step.oscillation.apply(request.oscillation);
                        request.auto_height = step.auto_height.clone();
                        if let Some(include) = step.include_gaps_in_title {
                            request.include_gaps_in_title = include;
                        }
                        Ok(ScriptRequest::Angle(request))
                    }
                    ScriptStep::Transmission(step) => {
                        let mut request =
                            TransmissionRequest::new(self.sample(&step.sample)?, step.title.clone())
                                .with_vgaps(step.vgaps.clone())
                                .with_mirror(step.mirror.clone())
                                .dry_run(step.dry_run);
                        request.count = step.count.condition();
                        request.hgaps = step.hgaps.clone();
                        request.mode = step.mode.clone();
                        if let Some(offset) = step.height_offset {
                            request.height_offset = offset;
                        }
                        request.oscillation = step.oscillation.apply(request.oscillation);
                        if let Some(include) = step.include_gaps_in_title {
                            request.include_gaps_in_title = include;
                        }
                        if let Some(angle) = step.at_angle {
                            request.at_angle = angle;
                        }
                        Ok(ScriptRequest::Transmission(request))
                    }
                }
            })
            .collect()
    }

    /// Run every action in order, stopping at the first error.
    pub async fn run(&self, session: &mut ScriptSession) -> ScriptResult<Vec<ActionOutcome>> {
        let requests = self.requests()?;
        info!(actions = requests.len(), dry_run = session.is_dry_run(), "Starting script");

        let mut outcomes = Vec::with_capacity(requests.len());
        for request in &requests {
            let outcome = match request {
                ScriptRequest::Angle(request) => session.run_angle(request).await?,
                ScriptRequest::Transmission(request) => session.transmission(request).await?,
            };
            outcomes.push(outcome);
        }
        info!("Script finished");
        Ok(outcomes)
    }
}
