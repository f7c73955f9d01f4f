//! Beamline Capabilities
//!
//! The orchestration layer touches the instrument through two small traits:
//!
//! - [`AxisControl`]: named motorized axes, instrument mode, slit oscillation
//! - [`RunControl`]: the counting system (begin/end/abort/pause/resume, title)
//!
//! Both are provided by the instrument control system and are outside this
//! crate; [`crate::hardware::mock::MockBeamline`] implements them for tests and
//! for the CLI.
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (requires Send + Sync)
//! - Uses anyhow::Result for errors
//!
//! Move requests return as soon as the request is accepted; settling is a
//! separate, single blocking call.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Capability: Named Axis Motion
///
/// Axis names are case-insensitive; implementations should normalise them.
#[async_trait]
pub trait AxisControl: Send + Sync {
    /// Request a move of `name` to `value`. Does not wait for the move.
    async fn set_axis(&self, name: &str, value: f64) -> Result<()>;

    /// Current value of `name`.
    async fn axis_value(&self, name: &str) -> Result<f64>;

    /// Block until every outstanding move has settled.
    ///
    /// There is no partial-completion signal.
    async fn wait_for_move(&self) -> Result<()>;

    /// Enable or disable an axis (used for secondary rotation axes).
    async fn set_axis_enabled(&self, name: &str, enabled: bool) -> Result<()>;

    /// Currently selected instrument mode.
    async fn current_mode(&self) -> Result<String>;

    /// Switch the instrument mode preset.
    async fn set_mode(&self, mode: &str) -> Result<()>;

    /// Start oscillating the slit `block` with the given gap.
    async fn oscillate(&self, block: &str, gap: f64) -> Result<()>;

    /// Stop oscillating the slit `block`.
    async fn stop_oscillation(&self, block: &str) -> Result<()>;
}

/// Stopping condition for one counting period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCondition {
    /// Accumulated proton charge in µA·h.
    Charge(f64),
    /// Elapsed time in seconds.
    Time(f64),
    /// Detector frames.
    Frames(f64),
}

impl StopCondition {
    /// Pick the stopping condition from optional counts.
    ///
    /// At most one is honoured: charge takes precedence over time, which takes
    /// precedence over frames. Zero or missing values are ignored, and `None`
    /// means "do not count".
    pub fn from_counts(
        uamps: Option<f64>,
        seconds: Option<f64>,
        frames: Option<f64>,
    ) -> Option<Self> {
        let given = |v: Option<f64>| v.filter(|x| *x != 0.0);
        given(uamps)
            .map(StopCondition::Charge)
            .or_else(|| given(seconds).map(StopCondition::Time))
            .or_else(|| given(frames).map(StopCondition::Frames))
    }
}

impl std::fmt::Display for StopCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopCondition::Charge(uamps) => write!(f, "uamps={uamps}"),
            StopCondition::Time(seconds) => write!(f, "seconds={seconds}"),
            StopCondition::Frames(frames) => write!(f, "frames={frames}"),
        }
    }
}

/// Counting state reported by run control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// No run in progress
    Setup,
    /// Counting
    Running,
    /// Run paused; data is not accumulating
    Paused,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Setup => write!(f, "SETUP"),
            RunState::Running => write!(f, "RUNNING"),
            RunState::Paused => write!(f, "PAUSED"),
        }
    }
}

impl RunState {
    /// Anything other than setup counts as an active run.
    pub fn is_counting(&self) -> bool {
        !matches!(self, RunState::Setup)
    }
}

/// Capability: Run/Counting Control
#[async_trait]
pub trait RunControl: Send + Sync {
    /// Current counting state.
    async fn run_state(&self) -> Result<RunState>;

    /// Start counting.
    async fn begin(&self) -> Result<()>;

    /// Finish the run, keeping the data.
    async fn end(&self) -> Result<()>;

    /// Finish the run, discarding the data.
    async fn abort(&self) -> Result<()>;

    /// Stop accumulating data without ending the run.
    async fn pause(&self) -> Result<()>;

    /// Resume a paused run.
    async fn resume(&self) -> Result<()>;

    /// Set the run title.
    async fn change_title(&self, title: &str) -> Result<()>;

    /// Block until `condition` is met for the current run.
    async fn wait_for(&self, condition: StopCondition) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_beats_time_beats_frames() {
        assert_eq!(
            StopCondition::from_counts(Some(40.0), Some(60.0), Some(100.0)),
            Some(StopCondition::Charge(40.0))
        );
        assert_eq!(
            StopCondition::from_counts(None, Some(60.0), Some(100.0)),
            Some(StopCondition::Time(60.0))
        );
        assert_eq!(
            StopCondition::from_counts(None, None, Some(100.0)),
            Some(StopCondition::Frames(100.0))
        );
    }

    #[test]
    fn zero_counts_mean_no_counting() {
        assert_eq!(StopCondition::from_counts(None, None, None), None);
        assert_eq!(
            StopCondition::from_counts(Some(0.0), None, Some(5.0)),
            Some(StopCondition::Frames(5.0))
        );
    }

    #[test]
    fn run_state_counting() {
        assert!(!RunState::Setup.is_counting());
        assert!(RunState::Running.is_counting());
        assert!(RunState::Paused.is_counting());
    }
}
