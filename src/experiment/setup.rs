//! Mode and sample setup.
//!
//! Resolves the instrument mode and constants for an action, then computes and
//! requests the sample-dependent positions: angle, translation, heights,
//! secondary rotation axes, supermirrors and vertical gaps. None of these
//! functions wait for motion; the caller settles once everything is requested.
//! The exception is [`auto_height`], which has to settle before every laser
//! reading.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ScriptError, ScriptResult};

use super::axes::AxisValueMap;
use super::constants::{ConstantsProvider, InstrumentConstants};
use super::gaps::SlitGapCalculator;
use super::movement::{Beamline, Movement};
use super::sample::Sample;

/// Mode in which the secondary rotation axes stay disabled.
pub const LIQUID_MODE: &str = "LIQUID";

/// Requested supermirror configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorRequest {
    /// Mirror blocks (e.g. `SM1`, `SM2`); empty means every configured mirror.
    #[serde(default)]
    pub blocks: Vec<String>,
    /// `Some(0.0)` removes the mirror, `Some(angle)` inserts it, `None` leaves
    /// it untouched.
    pub angle: Option<f64>,
}

impl MirrorRequest {
    /// Insert `block` at `angle` (zero removes it).
    pub fn at(block: impl Into<String>, angle: f64) -> Self {
        Self {
            blocks: vec![block.into()],
            angle: Some(angle),
        }
    }

    /// Remove every configured mirror from the beam.
    pub fn remove_all() -> Self {
        Self {
            blocks: Vec::new(),
            angle: Some(0.0),
        }
    }
}

/// Mirror configuration applied by [`sample_setup`], for the run title.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MirrorState {
    /// Mirror blocks touched
    pub blocks: Vec<String>,
    /// Angle applied; `None` when untouched
    pub angle: Option<f64>,
}

impl MirrorState {
    /// True when a mirror was put in the beam at a non-zero angle.
    pub fn in_beam(&self) -> bool {
        matches!(self.angle, Some(a) if a != 0.0) && !self.blocks.is_empty()
    }
}

fn default_laser_block() -> String {
    "KEYENCE".to_string()
}

fn default_fine_height_block() -> String {
    "HEIGHT".to_string()
}

/// Laser-guided sample height alignment for angle runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoHeight {
    /// Block reporting the laser offset of the sample surface from the beam centre
    pub laser_offset_block: String,
    /// Axis moved to correct the offset
    pub fine_height_block: String,
    /// Laser offset to align to
    pub target: f64,
    /// Report a failed alignment and carry on instead of ending the script
    pub continue_on_error: bool,
    /// Accepted distance from `target`
    pub tolerance: f64,
    /// Corrections tried before giving up
    pub max_iterations: usize,
}

impl Default for AutoHeight {
    fn default() -> Self {
        Self {
            laser_offset_block: default_laser_block(),
            fine_height_block: default_fine_height_block(),
            target: 0.0,
            continue_on_error: false,
            tolerance: 0.005,
            max_iterations: 5,
        }
    }
}

impl AutoHeight {
    /// Align to `target` instead of zero.
    pub fn with_target(mut self, target: f64) -> Self {
        self.target = target;
        self
    }

    /// Carry on after a failed alignment.
    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }
}

/// Drive the fine height until the laser offset reads `target`.
///
/// Returns the final fine height, or `None` when alignment failed and
/// `continue_on_error` let the run go on at the current height.
pub async fn auto_height(beamline: &Beamline, settings: &AutoHeight) -> ScriptResult<Option<f64>> {
    let movement = &beamline.movement;
    let laser = settings.laser_offset_block.as_str();
    let fine = settings.fine_height_block.as_str();
    info!(laser, fine, target = settings.target, "Auto-height");

    movement.wait_for_move().await?;
    let mut corrections = 0;
    let failure = loop {
        let reading = movement.axis_value(laser).await?;
        if reading.is_nan() {
            break format!("{laser} reading is NaN");
        }
        let offset = reading - settings.target;
        let height = movement.axis_value(fine).await?;
        if offset.abs() <= settings.tolerance {
            info!(height, reading, corrections, "Auto-height aligned");
            return Ok(Some(height));
        }
        if corrections == settings.max_iterations {
            break format!(
                "{laser} still {offset:.4} from target after {corrections} corrections"
            );
        }

        debug!(reading, height, next = height - offset, "Auto-height correction");
        movement.set_axis(fine, height - offset).await?;
        movement.wait_for_move().await?;
        corrections += 1;
    };

    if settings.continue_on_error {
        beamline
            .console
            .status(&format!("Auto-height failed ({failure}); continuing at current height"));
        warn!(%failure, "Auto-height failed; continuing");
        Ok(None)
    } else {
        Err(ScriptError::AutoHeight(failure))
    }
}

/// Resolve the effective mode and its constants.
///
/// `None` keeps the instrument's current mode; `Some(mode)` switches to it.
/// Unknown modes are passed through; validation is the control system's job.
pub async fn setup_measurement(
    movement: &Movement,
    provider: &dyn ConstantsProvider,
    mode: Option<&str>,
) -> ScriptResult<(InstrumentConstants, String)> {
    let mode = match mode {
        Some(requested) => {
            info!(mode = requested, "Changing mode");
            movement.set_mode(requested).await?;
            requested.to_string()
        }
        None => movement.current_mode().await?,
    };
    Ok((provider.constants_for(&mode), mode))
}

/// Request sample positions for `angle` and configure mirrors.
///
/// `height_offset` lowers the sample below its nominal position (used by
/// transmissions to take the sample out of the beam). It is applied to the
/// coarse HEIGHT2 stage, or to HEIGHT on instruments without one.
pub async fn sample_setup(
    movement: &Movement,
    sample: &Sample,
    angle: f64,
    constants: &InstrumentConstants,
    mode: &str,
    height_offset: f64,
    mirror: Option<&MirrorRequest>,
) -> ScriptResult<MirrorState> {
    movement.set_axis("THETA", angle).await?;
    movement.set_axis("TRANS", sample.translation).await?;
    if constants.has_height2 {
        movement.set_axis("HEIGHT", sample.height_offset).await?;
        movement
            .set_axis("HEIGHT2", sample.height2_offset - height_offset)
            .await?;
    } else {
        movement
            .set_axis("HEIGHT", sample.height_offset - height_offset)
            .await?;
    }

    if mode.eq_ignore_ascii_case(LIQUID_MODE) {
        movement.set_axis_enabled("PHI", false).await?;
        movement.set_axis_enabled("PSI", false).await?;
    } else {
        movement.set_axis_enabled("PHI", true).await?;
        movement.set_axis_enabled("PSI", true).await?;
        movement.set_axis("PHI", sample.phi_offset).await?;
        movement.set_axis("PSI", sample.psi_offset).await?;
    }

    let Some(request) = mirror else {
        return Ok(MirrorState::default());
    };
    let blocks = if request.blocks.is_empty() {
        constants.mirror_blocks.clone()
    } else {
        request.blocks.iter().map(|b| b.to_uppercase()).collect()
    };
    if let Some(angle) = request.angle {
        for block in &blocks {
            if angle == 0.0 {
                movement.set_axis(&format!("{block}INBEAM"), 0.0).await?;
            } else {
                movement.set_axis(&format!("{block}INBEAM"), 1.0).await?;
                movement.set_axis(&format!("{block}ANGLE"), angle).await?;
            }
        }
    }
    Ok(MirrorState {
        blocks,
        angle: request.angle,
    })
}

/// Request vertical gaps for `angle`, with caller-supplied gaps taking
/// precedence over calculated ones.
pub async fn set_slit_vgaps(
    movement: &Movement,
    calculator: &dyn SlitGapCalculator,
    angle: f64,
    constants: &InstrumentConstants,
    vgaps: &AxisValueMap,
    sample: &Sample,
) -> ScriptResult<AxisValueMap> {
    let calculated = calculator.vertical_gaps(angle, sample, constants);
    let gaps = vgaps.clone().with_defaults(&calculated);
    movement.set_axis_dict(&gaps).await?;
    Ok(gaps)
}

/// Compose a run title.
pub fn build_title(
    title: &str,
    subtitle: &str,
    angle: Option<f64>,
    mirror: &MirrorState,
    gaps: Option<(&AxisValueMap, &AxisValueMap)>,
) -> String {
    let mut full = title.trim().to_string();
    if !subtitle.trim().is_empty() {
        full.push(' ');
        full.push_str(subtitle.trim());
    }
    if let Some(angle) = angle {
        full.push_str(&format!(" th={angle}"));
    }
    if mirror.in_beam() {
        if let Some(angle) = mirror.angle {
            full.push_str(&format!(" {}={angle}", mirror.blocks.join("+")));
        }
    }
    if let Some((vertical, horizontal)) = gaps {
        let fmt = |map: &AxisValueMap| {
            map.values()
                .iter()
                .map(|v| format!("{v:.3}"))
                .collect::<Vec<_>>()
                .join(" ")
        };
        full.push_str(&format!(" VG({}) HG({})", fmt(vertical), fmt(horizontal)));
    }
    full
}

/// Set the run title, optionally appending the live gaps.
pub async fn update_title(
    beamline: &Beamline,
    constants: &InstrumentConstants,
    title: &str,
    subtitle: &str,
    angle: Option<f64>,
    mirror: &MirrorState,
    add_current_gaps: bool,
) -> ScriptResult<String> {
    let gaps = if add_current_gaps {
        let vertical = beamline.movement.get_gaps(constants, true, false).await?;
        let horizontal = beamline.movement.get_gaps(constants, false, false).await?;
        Some((vertical, horizontal))
    } else {
        None
    };
    let full = build_title(
        title,
        subtitle,
        angle,
        mirror,
        gaps.as_ref().map(|(v, h)| (v, h)),
    );

    beamline.console.status(&format!("Title: {full}"));
    beamline.run.change_title(&full).await?;
    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ScriptedConsole;
    use crate::experiment::constants::ConfiguredConstants;
    use crate::hardware::MockBeamline;
    use crate::interrupt::InterruptSignal;
    use std::sync::Arc;

    fn movement(mock: &Arc<MockBeamline>) -> Movement {
        Movement::new(mock.clone(), InterruptSignal::new())
    }

    #[tokio::test]
    async fn keeping_current_mode_does_not_switch() {
        let mock = Arc::new(MockBeamline::new().with_mode("Solid"));
        let (_, mode) = setup_measurement(&movement(&mock), &ConfiguredConstants::default(), None)
            .await
            .unwrap();
        assert_eq!(mode, "Solid");
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn requested_mode_is_applied() {
        let mock = Arc::new(MockBeamline::new());
        let (_, mode) = setup_measurement(
            &movement(&mock),
            &ConfiguredConstants::default(),
            Some("PNR"),
        )
        .await
        .unwrap();
        assert_eq!(mode, "PNR");
        assert_eq!(mock.calls(), vec!["mode PNR"]);
    }

    #[tokio::test]
    async fn liquid_mode_disables_phi_psi() {
        let mock = Arc::new(MockBeamline::new());
        let sample = Sample::new("water", "");
        sample_setup(
            &movement(&mock),
            &sample,
            0.5,
            &InstrumentConstants::default(),
            "Liquid",
            0.0,
            None,
        )
        .await
        .unwrap();

        assert!(mock.is_disabled("PHI"));
        assert!(mock.is_disabled("PSI"));
        assert!(!mock.calls().iter().any(|c| c.starts_with("set PHI")));
    }

    #[tokio::test]
    async fn height_offset_lowers_coarse_height() {
        let mock = Arc::new(MockBeamline::new());
        let sample = Sample::new("s", "").with_heights(1.0, 10.0);
        sample_setup(
            &movement(&mock),
            &sample,
            0.0,
            &InstrumentConstants::default(),
            "NR",
            5.0,
            None,
        )
        .await
        .unwrap();

        assert_eq!(mock.value("HEIGHT"), Some(1.0));
        assert_eq!(mock.value("HEIGHT2"), Some(5.0));
    }

    #[tokio::test]
    async fn height_offset_falls_back_to_fine_height() {
        let mock = Arc::new(MockBeamline::new());
        let sample = Sample::new("s", "").with_heights(1.0, 10.0);
        let constants = InstrumentConstants {
            has_height2: false,
            ..Default::default()
        };
        sample_setup(&movement(&mock), &sample, 0.0, &constants, "NR", 5.0, None)
            .await
            .unwrap();

        assert_eq!(mock.value("HEIGHT"), Some(-4.0));
        assert!(!mock.calls().iter().any(|c| c.starts_with("set HEIGHT2")));
    }

    #[tokio::test]
    async fn mirror_zero_angle_removes_all_configured_mirrors() {
        let mock = Arc::new(MockBeamline::new().with_axis("SM1INBEAM", 1.0));
        let state = sample_setup(
            &movement(&mock),
            &Sample::default(),
            0.7,
            &InstrumentConstants::default(),
            "NR",
            0.0,
            Some(&MirrorRequest::remove_all()),
        )
        .await
        .unwrap();

        assert_eq!(mock.value("SM1INBEAM"), Some(0.0));
        assert_eq!(mock.value("SM2INBEAM"), Some(0.0));
        assert!(!state.in_beam());
    }

    #[tokio::test]
    async fn mirror_angle_inserts_block() {
        let mock = Arc::new(MockBeamline::new());
        let state = sample_setup(
            &movement(&mock),
            &Sample::default(),
            0.7,
            &InstrumentConstants::default(),
            "NR",
            0.0,
            Some(&MirrorRequest::at("sm2", 0.25)),
        )
        .await
        .unwrap();

        assert_eq!(mock.value("SM2INBEAM"), Some(1.0));
        assert_eq!(mock.value("SM2ANGLE"), Some(0.25));
        assert_eq!(mock.value("SM1INBEAM"), Some(0.0));
        assert!(state.in_beam());
    }

    #[tokio::test]
    async fn mirror_without_angle_is_untouched() {
        let mock = Arc::new(MockBeamline::new());
        let request = MirrorRequest {
            blocks: vec!["SM2".into()],
            angle: None,
        };
        sample_setup(
            &movement(&mock),
            &Sample::default(),
            0.7,
            &InstrumentConstants::default(),
            "NR",
            0.0,
            Some(&request),
        )
        .await
        .unwrap();
        assert!(!mock.calls().iter().any(|c| c.contains("SM2")));
    }

    #[tokio::test]
    async fn supplied_vgaps_override_calculated() {
        let mock = Arc::new(MockBeamline::new());
        let vgaps: AxisValueMap = [("s1vg", 0.1)].into_iter().collect();
        let applied = set_slit_vgaps(
            &movement(&mock),
            &crate::experiment::gaps::FootprintGapCalculator,
            0.5,
            &InstrumentConstants::default(),
            &vgaps,
            &Sample::default(),
        )
        .await
        .unwrap();

        assert_eq!(applied.get("S1VG"), Some(0.1));
        assert_eq!(mock.value("S1VG"), Some(0.1));
        assert!(applied.contains("S4VG"));
    }

    fn beamline(mock: &Arc<MockBeamline>) -> Beamline {
        Beamline::new(
            mock.clone(),
            mock.clone(),
            Arc::new(ScriptedConsole::new(Vec::<String>::new())),
            InterruptSignal::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn auto_height_moves_fine_height_onto_target() {
        let mock = Arc::new(
            MockBeamline::new()
                .with_axis("HEIGHT", 1.0)
                .with_laser("KEYENCE", "HEIGHT", 1.25),
        );

        let height = auto_height(&beamline(&mock), &AutoHeight::default().with_target(0.5))
            .await
            .unwrap();

        assert_eq!(height, Some(1.75));
        assert_eq!(mock.value("HEIGHT"), Some(1.75));
        assert_eq!(
            mock.calls(),
            vec![
                "wait_for_move",
                "read KEYENCE",
                "set HEIGHT=1.75",
                "wait_for_move",
                "read KEYENCE",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn auto_height_already_aligned_does_not_move() {
        let mock = Arc::new(MockBeamline::new().with_laser("KEYENCE", "HEIGHT", 0.0));

        let height = auto_height(&beamline(&mock), &AutoHeight::default())
            .await
            .unwrap();

        assert_eq!(height, Some(0.0));
        assert!(!mock.calls().iter().any(|c| c.starts_with("set ")));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_height_nan_reading_is_fatal_unless_continuing() {
        let mock = Arc::new(MockBeamline::new().with_laser("KEYENCE", "HEIGHT", f64::NAN));

        let err = auto_height(&beamline(&mock), &AutoHeight::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::AutoHeight(ref reason) if reason.contains("NaN")));

        let console = Arc::new(ScriptedConsole::new(Vec::<String>::new()));
        let bl = Beamline::new(mock.clone(), mock.clone(), console.clone(), InterruptSignal::new());
        let height = auto_height(&bl, &AutoHeight::default().continue_on_error(true))
            .await
            .unwrap();
        assert_eq!(height, None);
        assert!(console.transcript()[0].starts_with("status: Auto-height failed (KEYENCE reading is NaN)"));
        assert!(!mock.calls().iter().any(|c| c.starts_with("set ")));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_height_gives_up_after_max_iterations() {
        let mock = Arc::new(
            MockBeamline::new()
                .with_laser("KEYENCE", "HEIGHT", 0.0)
                .with_failing_axis("HEIGHT"),
        );

        let err = auto_height(&beamline(&mock), &AutoHeight::default().with_target(1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Hardware(_)));

        let stuck = Arc::new(MockBeamline::new().with_laser("KEYENCE", "HEIGHT2", 0.0));
        let settings = AutoHeight {
            max_iterations: 2,
            ..AutoHeight::default().with_target(1.0)
        };
        let err = auto_height(&beamline(&stuck), &settings).await.unwrap_err();
        assert!(matches!(err, ScriptError::AutoHeight(ref reason) if reason.contains("after 2 corrections")));
        assert_eq!(
            stuck.calls().iter().filter(|c| c.starts_with("set HEIGHT=")).count(),
            2
        );
    }

    #[test]
    fn title_annotations() {
        let mirror = MirrorState {
            blocks: vec!["SM2".into()],
            angle: Some(0.1),
        };
        let vg: AxisValueMap = [("S1VG", 0.5)].into_iter().collect();
        let hg: AxisValueMap = [("S1HG", 20.0)].into_iter().collect();

        assert_eq!(
            build_title("Quartz", "D2O", Some(0.7), &MirrorState::default(), None),
            "Quartz D2O th=0.7"
        );
        assert_eq!(
            build_title("Quartz", "", None, &mirror, Some((&vg, &hg))),
            "Quartz SM2=0.1 VG(0.500) HG(20.000)"
        );
    }
}
