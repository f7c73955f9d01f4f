//! Measurement actions: angle runs and transmissions.
//!
//! The same request is either executed against the instrument or estimated.
//! [`ScriptActions`] is the strategy seam: [`LiveActions`] drives hardware,
//! [`DryRunActions`] only prices the request. [`ScriptSession`] picks the
//! strategy per call, so a dry run can never reach hardware.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::console::SharedConsole;
use crate::error::{ScriptError, ScriptResult};
use crate::hardware::StopCondition;

use super::axes::AxisValueMap;
use super::constants::{ConstantsProvider, InstrumentConstants};
use super::estimator::{DryRunEstimator, EstimateRates, RunPlanEntry};
use super::gaps::SlitGapCalculator;
use super::guard::{GapHeightGuard, DEFAULT_DECISION_DELAY};
use super::measurement::{run_measurement, Oscillation};
use super::movement::Beamline;
use super::sample::Sample;
use super::setup::{
    auto_height, sample_setup, set_slit_vgaps, setup_measurement, update_title, AutoHeight,
    MirrorRequest,
};

fn summarize(head: String, count: Option<StopCondition>) -> String {
    match count {
        Some(condition) => format!("{head} {condition}"),
        None => head,
    }
}

/// Measure reflectivity at one angle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AngleRequest {
    /// Sample to position
    pub sample: Sample,
    /// Theta in degrees
    pub angle: f64,
    /// Counting condition; `None` only positions
    pub count: Option<StopCondition>,
    /// Vertical gaps; missing entries are calculated from the sample
    pub vgaps: AxisValueMap,
    /// Horizontal gaps; the sample's defaults when absent
    pub hgaps: Option<AxisValueMap>,
    /// Mode to switch to; `None` keeps the current one
    pub mode: Option<String>,
    /// `None` leaves the supermirrors where they are
    pub mirror: Option<MirrorRequest>,
    /// Slit oscillation while counting
    pub oscillation: Oscillation,
    /// Laser height alignment after positioning; skipped when absent
    #[serde(default)]
    pub auto_height: Option<AutoHeight>,
    /// Append the live gaps to the run title
    pub include_gaps_in_title: bool,
    /// Estimate instead of executing
    pub dry_run: bool,
}

impl AngleRequest {
    /// Angle run with every supermirror removed and no counting.
    pub fn new(sample: Sample, angle: f64) -> Self {
        Self {
            sample,
            angle,
            count: None,
            vgaps: AxisValueMap::new(),
            hgaps: None,
            mode: None,
            mirror: Some(MirrorRequest::remove_all()),
            oscillation: Oscillation::disabled(),
            auto_height: None,
            include_gaps_in_title: false,
            dry_run: false,
        }
    }

    /// Count by charge, then time, then frames; zero values are ignored.
    pub fn with_counts(mut self, uamps: Option<f64>, seconds: Option<f64>, frames: Option<f64>) -> Self {
        self.count = StopCondition::from_counts(uamps, seconds, frames);
        self
    }

    /// Count until `condition` is met.
    pub fn with_count(mut self, condition: StopCondition) -> Self {
        self.count = Some(condition);
        self
    }

    /// Vertical gaps overriding the calculated ones.
    pub fn with_vgaps(mut self, vgaps: AxisValueMap) -> Self {
        self.vgaps = vgaps;
        self
    }

    /// Horizontal gaps instead of the sample's.
    pub fn with_hgaps(mut self, hgaps: AxisValueMap) -> Self {
        self.hgaps = Some(hgaps);
        self
    }

    /// Switch to `mode` first.
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Mirror configuration; `None` leaves the mirrors where they are.
    pub fn with_mirror(mut self, mirror: Option<MirrorRequest>) -> Self {
        self.mirror = mirror;
        self
    }

    /// Oscillate a slit while counting.
    pub fn with_oscillation(mut self, oscillation: Oscillation) -> Self {
        self.oscillation = oscillation;
        self
    }

    /// Align the sample height with the laser gauge before setting gaps.
    pub fn with_auto_height(mut self, auto_height: AutoHeight) -> Self {
        self.auto_height = Some(auto_height);
        self
    }

    /// Append the live gaps to the run title.
    pub fn include_gaps_in_title(mut self, include: bool) -> Self {
        self.include_gaps_in_title = include;
        self
    }

    /// Estimate instead of executing.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Short parameter text for the dry-run plan.
    pub fn parameter_summary(&self) -> String {
        summarize(format!("th={}", self.angle), self.count)
    }
}

/// Measure transmission with the sample lowered out of the beam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionRequest {
    /// Sample to measure through
    pub sample: Sample,
    /// Run title
    pub title: String,
    /// Vertical gaps; missing entries are calculated for `at_angle`
    pub vgaps: AxisValueMap,
    /// Horizontal gaps; the sample's defaults when absent
    pub hgaps: Option<AxisValueMap>,
    /// Counting condition; `None` only positions
    pub count: Option<StopCondition>,
    /// Distance the coarse height is lowered by
    pub height_offset: f64,
    /// Mode to switch to; `None` keeps the current one
    pub mode: Option<String>,
    /// `None` leaves the supermirrors where they are
    pub mirror: Option<MirrorRequest>,
    /// Slit oscillation while counting
    pub oscillation: Oscillation,
    /// Append the live gaps to the run title
    pub include_gaps_in_title: bool,
    /// Angle the vertical gaps are calculated for
    pub at_angle: f64,
    /// Estimate instead of executing
    pub dry_run: bool,
}

impl TransmissionRequest {
    /// Transmission with the sample lowered by 5, oscillating S2HG, gaps in the title.
    pub fn new(sample: Sample, title: impl Into<String>) -> Self {
        Self {
            sample,
            title: title.into(),
            vgaps: AxisValueMap::new(),
            hgaps: None,
            count: None,
            height_offset: 5.0,
            mode: None,
            mirror: None,
            oscillation: Oscillation::enabled(),
            include_gaps_in_title: true,
            at_angle: 0.7,
            dry_run: false,
        }
    }

    /// Count by charge, then time, then frames; zero values are ignored.
    pub fn with_counts(mut self, uamps: Option<f64>, seconds: Option<f64>, frames: Option<f64>) -> Self {
        self.count = StopCondition::from_counts(uamps, seconds, frames);
        self
    }

    /// Count until `condition` is met.
    pub fn with_count(mut self, condition: StopCondition) -> Self {
        self.count = Some(condition);
        self
    }

    /// Vertical gaps overriding the calculated ones.
    pub fn with_vgaps(mut self, vgaps: AxisValueMap) -> Self {
        self.vgaps = vgaps;
        self
    }

    /// Horizontal gaps instead of the sample's.
    pub fn with_hgaps(mut self, hgaps: AxisValueMap) -> Self {
        self.hgaps = Some(hgaps);
        self
    }

    /// Lower the sample by `offset` instead of 5.
    pub fn with_height_offset(mut self, offset: f64) -> Self {
        self.height_offset = offset;
        self
    }

    /// Switch to `mode` first.
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Mirror configuration; `None` leaves the mirrors where they are.
    pub fn with_mirror(mut self, mirror: Option<MirrorRequest>) -> Self {
        self.mirror = mirror;
        self
    }

    /// Slit oscillation while counting.
    pub fn with_oscillation(mut self, oscillation: Oscillation) -> Self {
        self.oscillation = oscillation;
        self
    }

    /// Append the live gaps to the run title.
    pub fn include_gaps_in_title(mut self, include: bool) -> Self {
        self.include_gaps_in_title = include;
        self
    }

    /// Angle the vertical gaps are calculated for.
    pub fn at_angle(mut self, angle: f64) -> Self {
        self.at_angle = angle;
        self
    }

    /// Estimate instead of executing.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Short parameter text for the dry-run plan.
    pub fn parameter_summary(&self) -> String {
        summarize(format!("at={}", self.at_angle), self.count)
    }

    /// Vertical gaps with S3VG opened to the instrument maximum unless given.
    pub fn effective_vgaps(&self, constants: &InstrumentConstants) -> AxisValueMap {
        let mut vgaps = self.vgaps.clone();
        if !vgaps.contains("S3VG") {
            vgaps.insert("S3VG", constants.s3max);
        }
        vgaps
    }
}

/// Strategy for carrying out measurement actions.
#[async_trait]
pub trait ScriptActions: Send {
    /// What one action produces
    type Output: Send;

    /// Position for one angle and count.
    async fn run_angle(&mut self, request: &AngleRequest) -> ScriptResult<Self::Output>;

    /// Measure a transmission with the sample out of the beam.
    async fn transmission(&mut self, request: &TransmissionRequest) -> ScriptResult<Self::Output>;
}

/// Executes actions on the instrument.
pub struct LiveActions {
    beamline: Beamline,
    constants: Arc<dyn ConstantsProvider>,
    gaps: Arc<dyn SlitGapCalculator>,
    decision_delay: Duration,
}

impl LiveActions {
    /// Execute against `beamline` with the given constants and gap calculator.
    pub fn new(
        beamline: Beamline,
        constants: Arc<dyn ConstantsProvider>,
        gaps: Arc<dyn SlitGapCalculator>,
    ) -> Self {
        Self {
            beamline,
            constants,
            gaps,
            decision_delay: DEFAULT_DECISION_DELAY,
        }
    }

    /// Pause after an interrupt recovery decision.
    pub fn with_decision_delay(mut self, delay: Duration) -> Self {
        self.decision_delay = delay;
        self
    }

    /// The instrument this strategy drives.
    pub fn beamline(&self) -> &Beamline {
        &self.beamline
    }

    async fn transmission_body(
        &self,
        request: &TransmissionRequest,
        constants: &InstrumentConstants,
        mode: &str,
    ) -> ScriptResult<()> {
        let beamline = &self.beamline;
        let movement = &beamline.movement;
        let sample = &request.sample;

        let mirror = sample_setup(
            movement,
            sample,
            0.0,
            constants,
            mode,
            request.height_offset,
            request.mirror.as_ref(),
        )
        .await?;

        let vgaps = request.effective_vgaps(constants);
        let hgaps = request.hgaps.clone().unwrap_or_else(|| sample.hgaps.clone());
        movement.set_axis_dict(&hgaps).await?;
        set_slit_vgaps(
            movement,
            self.gaps.as_ref(),
            request.at_angle,
            constants,
            &vgaps,
            sample,
        )
        .await?;
        movement.wait_for_move().await?;

        update_title(
            beamline,
            constants,
            &request.title,
            "",
            None,
            &mirror,
            request.include_gaps_in_title,
        )
        .await?;
        run_measurement(
            beamline,
            constants,
            request.count,
            &request.oscillation,
            &vgaps,
            &hgaps,
        )
        .await
    }
}

#[async_trait]
impl ScriptActions for LiveActions {
    type Output = ();

    #[instrument(skip_all, fields(sample = %request.sample.title, angle = request.angle))]
    async fn run_angle(&mut self, request: &AngleRequest) -> ScriptResult<()> {
        let beamline = &self.beamline;
        let movement = &beamline.movement;
        let sample = &request.sample;

        beamline.console.status("Running for real...");
        beamline
            .console
            .status(&format!("** Run angle {} **", sample.title));
        info!(params = %request.parameter_summary(), "Run angle");

        let (constants, mode) =
            setup_measurement(movement, self.constants.as_ref(), request.mode.as_deref()).await?;
        let mirror = sample_setup(
            movement,
            sample,
            request.angle,
            &constants,
            &mode,
            0.0,
            request.mirror.as_ref(),
        )
        .await?;
        if let Some(settings) = &request.auto_height {
            auto_height(beamline, settings).await?;
        }

        let hgaps = request.hgaps.clone().unwrap_or_else(|| sample.hgaps.clone());
        movement.set_axis_dict(&hgaps).await?;
        set_slit_vgaps(
            movement,
            self.gaps.as_ref(),
            request.angle,
            &constants,
            &request.vgaps,
            sample,
        )
        .await?;
        movement.wait_for_move().await?;

        update_title(
            beamline,
            &constants,
            &sample.title,
            &sample.subtitle,
            Some(request.angle),
            &mirror,
            request.include_gaps_in_title,
        )
        .await?;
        run_measurement(
            beamline,
            &constants,
            request.count,
            &request.oscillation,
            &request.vgaps,
            &hgaps,
        )
        .await
    }

    #[instrument(skip_all, fields(title = %request.title))]
    async fn transmission(&mut self, request: &TransmissionRequest) -> ScriptResult<()> {
        let beamline = &self.beamline;

        beamline.console.status("Running for real...");
        beamline
            .console
            .status(&format!("** Transmission {} **", request.title));
        info!(params = %request.parameter_summary(), "Transmission");

        let (constants, mode) = setup_measurement(
            &beamline.movement,
            self.constants.as_ref(),
            request.mode.as_deref(),
        )
        .await?;

        let guard = GapHeightGuard::enter(beamline, &request.sample, &constants)
            .await?
            .with_decision_delay(self.decision_delay);
        let body = self.transmission_body(request, &constants, &mode).await;
        guard.exit(body.into()).await
    }
}

/// Estimates actions without touching hardware.
pub struct DryRunActions {
    estimator: DryRunEstimator,
}

impl DryRunActions {
    /// Estimator printing to `console`.
    pub fn new(rates: EstimateRates, console: SharedConsole) -> Self {
        Self {
            estimator: DryRunEstimator::new(rates, console),
        }
    }

    /// The plan so far.
    pub fn estimator(&self) -> &DryRunEstimator {
        &self.estimator
    }

    /// Start a fresh plan.
    pub fn reset(&mut self) {
        self.estimator.reset();
    }
}

#[async_trait]
impl ScriptActions for DryRunActions {
    type Output = RunPlanEntry;

    async fn run_angle(&mut self, request: &AngleRequest) -> ScriptResult<RunPlanEntry> {
        Ok(self.estimator.record(
            "run_angle",
            &request.sample.title,
            &request.parameter_summary(),
            request.count,
        ))
    }

    async fn transmission(&mut self, request: &TransmissionRequest) -> ScriptResult<RunPlanEntry> {
        Ok(self.estimator.record(
            "transmission",
            &request.sample.title,
            &request.parameter_summary(),
            request.count,
        ))
    }
}

/// What happened to one action.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Ran on the instrument
    Executed,
    /// Priced by the dry-run estimator
    Estimated(RunPlanEntry),
}

impl ActionOutcome {
    /// The plan row, for an estimated action.
    pub fn plan_entry(&self) -> Option<&RunPlanEntry> {
        match self {
            ActionOutcome::Estimated(entry) => Some(entry),
            ActionOutcome::Executed => None,
        }
    }
}

/// Routes each action to the live or the estimating strategy.
pub struct ScriptSession {
    live: Option<LiveActions>,
    dry: DryRunActions,
    dry_run: bool,
}

impl ScriptSession {
    /// Session that executes unless a request asks for a dry run.
    pub fn live(live: LiveActions, dry: DryRunActions) -> Self {
        Self {
            live: Some(live),
            dry,
            dry_run: false,
        }
    }

    /// Session that only estimates.
    pub fn dry(dry: DryRunActions) -> Self {
        Self {
            live: None,
            dry,
            dry_run: true,
        }
    }

    /// True when every action is estimated.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// The dry-run plan so far.
    pub fn estimator(&self) -> &DryRunEstimator {
        self.dry.estimator()
    }

    /// Start a fresh dry-run plan.
    pub fn reset(&mut self) {
        self.dry.reset();
    }

    fn live_mut(&mut self) -> ScriptResult<&mut LiveActions> {
        self.live.as_mut().ok_or(ScriptError::NoHardware)
    }

    /// Run or estimate an angle measurement.
    pub async fn run_angle(&mut self, request: &AngleRequest) -> ScriptResult<ActionOutcome> {
        if self.dry_run || request.dry_run {
            return Ok(ActionOutcome::Estimated(self.dry.run_angle(request).await?));
        }
        self.live_mut()?.run_angle(request).await?;
        Ok(ActionOutcome::Executed)
    }

    /// Run or estimate a transmission.
    pub async fn transmission(
        &mut self,
        request: &TransmissionRequest,
    ) -> ScriptResult<ActionOutcome> {
        if self.dry_run || request.dry_run {
            return Ok(ActionOutcome::Estimated(
                self.dry.transmission(request).await?,
            ));
        }
        self.live_mut()?.transmission(request).await?;
        Ok(ActionOutcome::Executed)
    }
}
