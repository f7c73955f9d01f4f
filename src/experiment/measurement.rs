//! Counting with optional slit oscillation.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{ScriptError, ScriptResult};
use crate::hardware::StopCondition;

use super::axes::AxisValueMap;
use super::constants::InstrumentConstants;
use super::movement::Beamline;

fn default_block() -> String {
    "S2HG".to_string()
}

/// Slit oscillation during counting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Oscillation {
    /// Slit gap axis to oscillate
    #[serde(default = "default_block")]
    pub block: String,
    /// Gap while oscillating; the instrument default when absent
    #[serde(default)]
    pub gap: Option<f64>,
    /// Whether to oscillate at all
    #[serde(default)]
    pub enabled: bool,
}

impl Oscillation {
    /// Oscillate the default block at the instrument's default gap.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::disabled()
        }
    }

    /// No oscillation.
    pub fn disabled() -> Self {
        Self {
            block: default_block(),
            gap: None,
            enabled: false,
        }
    }

    /// Oscillate `block` instead of the default.
    pub fn with_block(mut self, block: impl Into<String>) -> Self {
        self.block = block.into();
        self
    }

    /// Oscillate at `gap` instead of the instrument default.
    pub fn with_gap(mut self, gap: f64) -> Self {
        self.gap = Some(gap);
        self
    }

    /// Resolve the gap to oscillate at, or `None` if oscillation is skipped.
    ///
    /// The extent is the caller-supplied gap for the block, else `live`.
    pub fn resolve(
        &self,
        constants: &InstrumentConstants,
        vgaps: &AxisValueMap,
        hgaps: &AxisValueMap,
        live: f64,
    ) -> Option<f64> {
        if !self.enabled {
            return None;
        }
        let extent = vgaps
            .get(&self.block)
            .or_else(|| hgaps.get(&self.block))
            .unwrap_or(live);
        let gap = self.gap.unwrap_or(constants.default_osc_gap);
        if gap < extent {
            Some(gap)
        } else {
            debug!(block = %self.block, gap, extent, "Oscillation gap not below extent; not oscillating");
            None
        }
    }
}

impl Default for Oscillation {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Count until `condition` is met, oscillating a slit if requested.
///
/// With no condition the instrument is left positioned and nothing is counted.
/// An interrupt while counting leaves the run (and any oscillating slit) as it
/// is and propagates. Any other failure stops the oscillation first.
pub async fn run_measurement(
    beamline: &Beamline,
    constants: &InstrumentConstants,
    condition: Option<StopCondition>,
    oscillation: &Oscillation,
    vgaps: &AxisValueMap,
    hgaps: &AxisValueMap,
) -> ScriptResult<()> {
    let Some(condition) = condition else {
        beamline
            .console
            .status("No count requested; instrument left in position");
        return Ok(());
    };

    let movement = &beamline.movement;
    let osc_gap = if oscillation.enabled {
        let live = movement.axis_value(&oscillation.block).await?;
        oscillation.resolve(constants, vgaps, hgaps, live)
    } else {
        debug!("Oscillation disabled");
        None
    };
    if let Some(gap) = osc_gap {
        info!(block = %oscillation.block, gap, "Oscillating slit");
        movement.oscillate(&oscillation.block, gap).await?;
    }

    let counted = count(beamline, condition).await;
    if osc_gap.is_none() {
        return counted;
    }

    match counted {
        // The run is still counting and may be kept; the transmission guard
        // stops the slit if the operator ends or aborts.
        Err(ScriptError::Interrupted) => {
            warn!(block = %oscillation.block, "Interrupted while oscillating; slit left oscillating");
            Err(ScriptError::Interrupted)
        }
        Err(err) => {
            if let Err(stop_err) = movement.stop_oscillation(&oscillation.block).await {
                error!(error = %stop_err, block = %oscillation.block, "Could not stop oscillation after failed count");
            }
            Err(err)
        }
        Ok(()) => movement.stop_oscillation(&oscillation.block).await,
    }
}

async fn count(beamline: &Beamline, condition: StopCondition) -> ScriptResult<()> {
    info!(%condition, "Counting");
    beamline.run.begin().await?;
    let run = beamline.run.clone();
    beamline
        .interrupt()
        .guard(async move { run.wait_for(condition).await.map_err(ScriptError::from) })
        .await?;
    beamline.run.end().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ScriptedConsole;
    use crate::hardware::{InterruptPoint, MockBeamline, RunState};
    use crate::interrupt::InterruptSignal;
    use std::sync::Arc;

    fn beamline(mock: Arc<MockBeamline>, interrupt: InterruptSignal) -> Beamline {
        Beamline::new(
            mock.clone(),
            mock,
            Arc::new(ScriptedConsole::new(Vec::<String>::new())),
            interrupt,
        )
    }

    #[test]
    fn oscillation_uses_requested_extent_first() {
        let constants = InstrumentConstants::default();
        let hgaps: AxisValueMap = [("S2HG", 5.0)].into_iter().collect();
        let osc = Oscillation::enabled();

        assert_eq!(osc.resolve(&constants, &AxisValueMap::new(), &hgaps, 50.0), None);
        assert_eq!(
            osc.resolve(&constants, &AxisValueMap::new(), &AxisValueMap::new(), 50.0),
            Some(10.0)
        );
        assert_eq!(
            osc.clone()
                .with_gap(2.0)
                .resolve(&constants, &AxisValueMap::new(), &hgaps, 50.0),
            Some(2.0)
        );

        let vgaps: AxisValueMap = [("S3VG", 4.0)].into_iter().collect();
        let osc = Oscillation::enabled().with_block("S3VG");
        assert_eq!(osc.resolve(&constants, &vgaps, &hgaps, 50.0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn counts_with_oscillation_in_order() {
        let mock = Arc::new(MockBeamline::new());
        let bl = beamline(mock.clone(), InterruptSignal::new());

        run_measurement(
            &bl,
            &InstrumentConstants::default(),
            Some(StopCondition::Time(30.0)),
            &Oscillation::enabled(),
            &AxisValueMap::new(),
            &AxisValueMap::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                "oscillate S2HG=10",
                "begin",
                "wait_for seconds=30",
                "end",
                "stop_oscillation S2HG"
            ]
        );
        assert_eq!(mock.oscillation("S2HG"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_count_stops_oscillation() {
        let mock = Arc::new(MockBeamline::new().with_failing_count());
        let bl = beamline(mock.clone(), InterruptSignal::new());

        let err = run_measurement(
            &bl,
            &InstrumentConstants::default(),
            Some(StopCondition::Time(30.0)),
            &Oscillation::enabled(),
            &AxisValueMap::new(),
            &AxisValueMap::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ScriptError::Hardware(_)));
        assert_eq!(mock.oscillation("S2HG"), None);
        assert_eq!(
            mock.calls().last().map(String::as_str),
            Some("stop_oscillation S2HG")
        );
        assert!(bl.movement.oscillating().is_empty());
    }

    #[tokio::test]
    async fn interrupt_leaves_slit_oscillating() {
        let signal = InterruptSignal::new();
        let mock = Arc::new(
            MockBeamline::new().with_interrupt(signal.clone(), InterruptPoint::DuringCount),
        );
        let bl = beamline(mock.clone(), signal);

        let err = run_measurement(
            &bl,
            &InstrumentConstants::default(),
            Some(StopCondition::Time(30.0)),
            &Oscillation::enabled(),
            &AxisValueMap::new(),
            &AxisValueMap::new(),
        )
        .await
        .unwrap_err();

        assert!(err.is_interrupt());
        assert_eq!(mock.oscillation("S2HG"), Some(10.0));
        assert_eq!(bl.movement.oscillating(), vec!["S2HG"]);
    }

    #[tokio::test]
    async fn no_condition_means_no_counting() {
        let mock = Arc::new(MockBeamline::new());
        let bl = beamline(mock.clone(), InterruptSignal::new());

        run_measurement(
            &bl,
            &InstrumentConstants::default(),
            None,
            &Oscillation::enabled(),
            &AxisValueMap::new(),
            &AxisValueMap::new(),
        )
        .await
        .unwrap();

        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn interrupt_leaves_run_counting() {
        let signal = InterruptSignal::new();
        let mock = Arc::new(
            MockBeamline::new().with_interrupt(signal.clone(), InterruptPoint::DuringCount),
        );
        let bl = beamline(mock.clone(), signal);

        let err = run_measurement(
            &bl,
            &InstrumentConstants::default(),
            Some(StopCondition::Charge(10.0)),
            &Oscillation::disabled(),
            &AxisValueMap::new(),
            &AxisValueMap::new(),
        )
        .await
        .unwrap_err();

        assert!(err.is_interrupt());
        assert_eq!(mock.state(), RunState::Running);
        assert!(!mock.calls().contains(&"end".to_string()));
    }
}
