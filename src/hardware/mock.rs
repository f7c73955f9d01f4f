//! Mock Beamline
//!
//! Simulated instrument implementing both [`AxisControl`] and [`RunControl`].
//! All delays use `tokio::time::sleep`, so tests running with paused time
//! complete instantly.
//!
//! Every call is appended to a [`CallLog`] as a short text entry
//! (`"set S1HG=20"`, `"wait_for_move"`, `"pause"`, ...). Tests share the same
//! log with [`crate::console::ScriptedConsole`] to check ordering across
//! hardware and console.
//!
//! # Performance Characteristics
//!
//! - Axes: 1 unit/sec motion speed, settle time proportional to the largest
//!   outstanding move plus 50ms
//! - Counting: 40 µA·h per hour of beam, 10 frames per second
//! - Laser gauge (optional): reads instantly, logged as `"read <block>"`

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::hardware::capabilities::{AxisControl, RunControl, RunState, StopCondition};
use crate::interrupt::InterruptSignal;

/// Ordered record of calls made against mock hardware.
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Where the mock raises an operator interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptPoint {
    /// While waiting for the counting condition.
    DuringCount,
    /// During the n-th `wait_for_move` (1-based).
    DuringSettle(usize),
}

#[derive(Debug)]
struct BeamlineState {
    axes: HashMap<String, f64>,
    disabled: HashSet<String>,
    pending_travel: f64,
    mode: String,
    run_state: RunState,
    title: String,
    oscillating: HashMap<String, f64>,
    settle_calls: usize,
}

/// Simulated reflectometry beamline.
///
/// # Example
///
/// ```rust,ignore
/// let beamline = MockBeamline::new()
///     .with_axis("S1HG", 30.0)
///     .with_mode("Solid");
/// beamline.set_axis("s1hg", 20.0).await?;
/// beamline.wait_for_move().await?;
/// assert_eq!(beamline.value("S1HG"), Some(20.0));
/// ```
pub struct MockBeamline {
    state: Mutex<BeamlineState>,
    log: CallLog,
    speed_per_sec: f64,
    interrupt: Option<(InterruptSignal, InterruptPoint)>,
    failing_axis: Option<String>,
    failing_count: bool,
    laser: Option<LaserGauge>,
}

/// Height gauge reading `height_axis - surface`.
#[derive(Debug, Clone)]
struct LaserGauge {
    block: String,
    height_axis: String,
    surface: f64,
}

impl MockBeamline {
    /// Beamline with the standard reflectometry axes at nominal positions.
    pub fn new() -> Self {
        let mut axes = HashMap::new();
        for (name, value) in [
            ("THETA", 0.0),
            ("TRANS", 0.0),
            ("HEIGHT", 0.0),
            ("HEIGHT2", 0.0),
            ("PHI", 0.0),
            ("PSI", 0.0),
            ("SM1ANGLE", 0.0),
            ("SM1INBEAM", 0.0),
            ("SM2ANGLE", 0.0),
            ("SM2INBEAM", 0.0),
        ] {
            axes.insert(name.to_string(), value);
        }
        for slit in ["S1", "S2", "S3", "S4"] {
            axes.insert(format!("{slit}VG"), 1.0);
            axes.insert(format!("{slit}VC"), 0.0);
            axes.insert(format!("{slit}HG"), 30.0);
            axes.insert(format!("{slit}HC"), 0.0);
        }

        Self {
            state: Mutex::new(BeamlineState {
                axes,
                disabled: HashSet::new(),
                pending_travel: 0.0,
                mode: "NR".to_string(),
                run_state: RunState::Setup,
                title: String::new(),
                oscillating: HashMap::new(),
                settle_calls: 0,
            }),
            log: CallLog::default(),
            speed_per_sec: 1.0,
            interrupt: None,
            failing_axis: None,
            failing_count: false,
            laser: None,
        }
    }

    /// Set an axis value without logging a call.
    pub fn with_axis(self, name: &str, value: f64) -> Self {
        self.state.lock().axes.insert(name.to_uppercase(), value);
        self
    }

    /// Start in the given mode.
    pub fn with_mode(self, mode: &str) -> Self {
        self.state.lock().mode = mode.to_string();
        self
    }

    /// Start with counting in progress.
    pub fn with_run_state(self, run_state: RunState) -> Self {
        self.state.lock().run_state = run_state;
        self
    }

    /// Share an existing call log.
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Raise `signal` when execution reaches `point`.
    pub fn with_interrupt(mut self, signal: InterruptSignal, point: InterruptPoint) -> Self {
        self.interrupt = Some((signal, point));
        self
    }

    /// Reject every move request for `name`.
    pub fn with_failing_axis(mut self, name: &str) -> Self {
        self.failing_axis = Some(name.to_uppercase());
        self
    }

    /// Fail every `wait_for` as if the counting system dropped out.
    pub fn with_failing_count(mut self) -> Self {
        self.failing_count = true;
        self
    }

    /// Add a laser height gauge `block` reading the distance of `height_axis`
    /// above `surface`. A NaN surface makes every reading NaN.
    pub fn with_laser(mut self, block: &str, height_axis: &str, surface: f64) -> Self {
        self.laser = Some(LaserGauge {
            block: block.to_uppercase(),
            height_axis: height_axis.to_uppercase(),
            surface,
        });
        self
    }

    /// The call log.
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Snapshot of the call log.
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Current value of an axis, if it exists.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.state.lock().axes.get(&name.to_uppercase()).copied()
    }

    /// Current run title.
    pub fn title(&self) -> String {
        self.state.lock().title.clone()
    }

    /// Current counting state.
    pub fn state(&self) -> RunState {
        self.state.lock().run_state
    }

    /// Gap of an oscillating slit block, if it is oscillating.
    pub fn oscillation(&self, block: &str) -> Option<f64> {
        self.state.lock().oscillating.get(&block.to_uppercase()).copied()
    }

    /// Whether an axis has been disabled.
    pub fn is_disabled(&self, name: &str) -> bool {
        self.state.lock().disabled.contains(&name.to_uppercase())
    }

    fn record(&self, entry: String) {
        debug!(call = %entry, "mock beamline");
        self.log.lock().push(entry);
    }

    fn raise_interrupt_at(&self, point: InterruptPoint) -> bool {
        match &self.interrupt {
            Some((signal, at)) if *at == point => {
                signal.trigger();
                true
            }
            _ => false,
        }
    }
}

impl Default for MockBeamline {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AxisControl for MockBeamline {
    async fn set_axis(&self, name: &str, value: f64) -> Result<()> {
        let key = name.to_uppercase();
        self.record(format!("set {key}={value}"));
        if self.failing_axis.as_deref() == Some(key.as_str()) {
            bail!("MockBeamline: axis {key} failed to move");
        }

        let mut state = self.state.lock();
        let current = state.axes.get(&key).copied().unwrap_or(0.0);
        state.pending_travel = state.pending_travel.max((value - current).abs());
        state.axes.insert(key, value);
        Ok(())
    }

    async fn axis_value(&self, name: &str) -> Result<f64> {
        let key = name.to_uppercase();
        if let Some(laser) = self.laser.as_ref().filter(|l| l.block == key) {
            self.record(format!("read {key}"));
            let height = self.state.lock().axes.get(&laser.height_axis).copied();
            return height
                .map(|h| h - laser.surface)
                .ok_or_else(|| anyhow!("MockBeamline: unknown axis {}", laser.height_axis));
        }
        self.state
            .lock()
            .axes
            .get(&key)
            .copied()
            .ok_or_else(|| anyhow!("MockBeamline: unknown axis {key}"))
    }

    async fn wait_for_move(&self) -> Result<()> {
        self.record("wait_for_move".to_string());
        let (travel, call) = {
            let mut state = self.state.lock();
            state.settle_calls += 1;
            (std::mem::take(&mut state.pending_travel), state.settle_calls)
        };

        if self.raise_interrupt_at(InterruptPoint::DuringSettle(call)) {
            std::future::pending::<()>().await;
        }

        let delay_ms = (travel / self.speed_per_sec * 1000.0) as u64 + 50;
        sleep(Duration::from_millis(delay_ms)).await;
        Ok(())
    }

    async fn set_axis_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let key = name.to_uppercase();
        self.record(format!(
            "{} {key}",
            if enabled { "enable" } else { "disable" }
        ));
        let mut state = self.state.lock();
        if enabled {
            state.disabled.remove(&key);
        } else {
            state.disabled.insert(key);
        }
        Ok(())
    }

    async fn current_mode(&self) -> Result<String> {
        Ok(self.state.lock().mode.clone())
    }

    async fn set_mode(&self, mode: &str) -> Result<()> {
        self.record(format!("mode {mode}"));
        self.state.lock().mode = mode.to_string();
        Ok(())
    }

    async fn oscillate(&self, block: &str, gap: f64) -> Result<()> {
        let key = block.to_uppercase();
        self.record(format!("oscillate {key}={gap}"));
        self.state.lock().oscillating.insert(key, gap);
        Ok(())
    }

    async fn stop_oscillation(&self, block: &str) -> Result<()> {
        let key = block.to_uppercase();
        self.record(format!("stop_oscillation {key}"));
        self.state.lock().oscillating.remove(&key);
        Ok(())
    }
}

#[async_trait]
impl RunControl for MockBeamline {
    async fn run_state(&self) -> Result<RunState> {
        Ok(self.state.lock().run_state)
    }

    async fn begin(&self) -> Result<()> {
        self.record("begin".to_string());
        let mut state = self.state.lock();
        if state.run_state.is_counting() {
            bail!("MockBeamline: cannot begin, run is {}", state.run_state);
        }
        state.run_state = RunState::Running;
        Ok(())
    }

    async fn end(&self) -> Result<()> {
        self.record("end".to_string());
        self.state.lock().run_state = RunState::Setup;
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        self.record("abort".to_string());
        self.state.lock().run_state = RunState::Setup;
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.record("pause".to_string());
        self.state.lock().run_state = RunState::Paused;
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.record("resume".to_string());
        self.state.lock().run_state = RunState::Running;
        Ok(())
    }

    async fn change_title(&self, title: &str) -> Result<()> {
        self.record(format!("title {title}"));
        self.state.lock().title = title.to_string();
        Ok(())
    }

    async fn wait_for(&self, condition: StopCondition) -> Result<()> {
        self.record(format!("wait_for {condition}"));
        if self.failing_count {
            bail!("MockBeamline: counting failed");
        }
        if self.raise_interrupt_at(InterruptPoint::DuringCount) {
            std::future::pending::<()>().await;
        }

        let seconds = match condition {
            StopCondition::Charge(uamps) => uamps / 40.0 * 3600.0,
            StopCondition::Time(seconds) => seconds,
            StopCondition::Frames(frames) => frames / 10.0,
        };
        sleep(Duration::from_secs_f64(seconds.max(0.0))).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScriptError;

    #[tokio::test(start_paused = true)]
    async fn axes_are_case_insensitive_and_logged() {
        let beamline = MockBeamline::new();
        beamline.set_axis("s1hg", 20.0).await.unwrap();
        beamline.wait_for_move().await.unwrap();

        assert_eq!(beamline.axis_value("S1HG").await.unwrap(), 20.0);
        assert_eq!(beamline.calls(), vec!["set S1HG=20", "wait_for_move"]);
    }

    #[tokio::test]
    async fn unknown_axis_is_an_error() {
        let beamline = MockBeamline::new();
        assert!(beamline.axis_value("NOPE").await.is_err());
    }

    #[tokio::test]
    async fn failing_axis_rejects_moves() {
        let beamline = MockBeamline::new().with_failing_axis("THETA");
        assert!(beamline.set_axis("theta", 1.0).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn run_lifecycle() {
        let beamline = MockBeamline::new();
        beamline.begin().await.unwrap();
        assert_eq!(beamline.state(), RunState::Running);
        assert!(beamline.begin().await.is_err());

        beamline.pause().await.unwrap();
        assert_eq!(beamline.state(), RunState::Paused);
        beamline.resume().await.unwrap();
        beamline.wait_for(StopCondition::Time(10.0)).await.unwrap();
        beamline.end().await.unwrap();
        assert_eq!(beamline.state(), RunState::Setup);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_point_raises_signal() {
        let signal = InterruptSignal::new();
        let beamline = Arc::new(
            MockBeamline::new().with_interrupt(signal.clone(), InterruptPoint::DuringCount),
        );

        let waiter = beamline.clone();
        let result = signal
            .guard(async move {
                waiter
                    .wait_for(StopCondition::Time(1.0))
                    .await
                    .map_err(ScriptError::from)
            })
            .await;

        assert!(signal.is_triggered());
        assert!(result.unwrap_err().is_interrupt());
    }
}
