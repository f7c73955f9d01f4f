//! Axis movement facade.
//!
//! The orchestration layer's only way to touch axes. Settling is the one
//! suspension point here and races the operator interrupt. There are no
//! retries: a driver error is returned as `ScriptError::Hardware` and ends the
//! enclosing action.
//!
//! Dry runs never build a [`Movement`], so nothing here needs a dry-run branch.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use crate::console::SharedConsole;
use crate::error::{ScriptError, ScriptResult};
use crate::hardware::{AxisControl, RunControl};
use crate::interrupt::InterruptSignal;

use super::axes::AxisValueMap;
use super::constants::InstrumentConstants;

/// Facade over [`AxisControl`].
///
/// Clones share the record of which slit blocks are oscillating, so a guard
/// holding a clone can stop an oscillation the measurement left engaged.
#[derive(Clone)]
pub struct Movement {
    axes: Arc<dyn AxisControl>,
    interrupt: InterruptSignal,
    oscillating: Arc<Mutex<Vec<String>>>,
}

impl Movement {
    /// Facade over `axes` whose settling races `interrupt`.
    pub fn new(axes: Arc<dyn AxisControl>, interrupt: InterruptSignal) -> Self {
        Self {
            axes,
            interrupt,
            oscillating: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Request a single axis move.
    pub async fn set_axis(&self, name: &str, value: f64) -> ScriptResult<()> {
        debug!(axis = name, value, "set axis");
        self.axes.set_axis(name, value).await?;
        Ok(())
    }

    /// Request one move per entry, in map order.
    pub async fn set_axis_dict(&self, values: &AxisValueMap) -> ScriptResult<()> {
        for (name, value) in values.iter() {
            self.set_axis(name, value).await?;
        }
        Ok(())
    }

    /// Block until all outstanding moves have settled.
    ///
    /// Returns `ScriptError::Interrupted` if the operator interrupts first.
    #[instrument(skip(self))]
    pub async fn wait_for_move(&self) -> ScriptResult<()> {
        let axes = self.axes.clone();
        self.interrupt
            .guard(async move { axes.wait_for_move().await.map_err(ScriptError::from) })
            .await
    }

    /// Current value of a single axis or block.
    pub async fn axis_value(&self, name: &str) -> ScriptResult<f64> {
        Ok(self.axes.axis_value(name).await?)
    }

    /// Live gaps (or centres) of every configured slit.
    pub async fn get_gaps(
        &self,
        constants: &InstrumentConstants,
        vertical: bool,
        centres: bool,
    ) -> ScriptResult<AxisValueMap> {
        let suffix = match (vertical, centres) {
            (true, false) => "VG",
            (true, true) => "VC",
            (false, false) => "HG",
            (false, true) => "HC",
        };

        let mut gaps = AxisValueMap::new();
        for slit in &constants.slits {
            let name = format!("{slit}{suffix}");
            let value = self.axis_value(&name).await?;
            gaps.insert(name, value);
        }
        Ok(gaps)
    }

    /// Enable or disable an axis.
    pub async fn set_axis_enabled(&self, name: &str, enabled: bool) -> ScriptResult<()> {
        self.axes.set_axis_enabled(name, enabled).await?;
        Ok(())
    }

    /// Mode the instrument is currently in.
    pub async fn current_mode(&self) -> ScriptResult<String> {
        Ok(self.axes.current_mode().await?)
    }

    /// Switch the instrument mode.
    pub async fn set_mode(&self, mode: &str) -> ScriptResult<()> {
        self.axes.set_mode(mode).await?;
        Ok(())
    }

    /// Start oscillating `block` and remember it as engaged.
    pub async fn oscillate(&self, block: &str, gap: f64) -> ScriptResult<()> {
        self.axes.oscillate(block, gap).await?;
        let key = block.to_uppercase();
        let mut engaged = self.oscillating.lock();
        if !engaged.contains(&key) {
            engaged.push(key);
        }
        Ok(())
    }

    /// Stop oscillating `block`.
    pub async fn stop_oscillation(&self, block: &str) -> ScriptResult<()> {
        self.axes.stop_oscillation(block).await?;
        let key = block.to_uppercase();
        self.oscillating.lock().retain(|b| *b != key);
        Ok(())
    }

    /// Blocks started with [`Movement::oscillate`] and not yet stopped.
    pub fn oscillating(&self) -> Vec<String> {
        self.oscillating.lock().clone()
    }

    /// Stop every oscillation still engaged. A no-op when none is.
    pub async fn stop_all_oscillations(&self) -> ScriptResult<()> {
        for block in self.oscillating() {
            info!(%block, "Stopping slit oscillation");
            self.stop_oscillation(&block).await?;
        }
        Ok(())
    }

    /// The interrupt this facade listens to.
    pub fn interrupt(&self) -> &InterruptSignal {
        &self.interrupt
    }
}

/// Everything a live action needs to reach the instrument and the operator.
#[derive(Clone)]
pub struct Beamline {
    /// Axis facade
    pub movement: Movement,
    /// Counting system
    pub run: Arc<dyn RunControl>,
    /// Operator console
    pub console: SharedConsole,
}

impl Beamline {
    /// Bundle axes, run control and console around one interrupt signal.
    pub fn new(
        axes: Arc<dyn AxisControl>,
        run: Arc<dyn RunControl>,
        console: SharedConsole,
        interrupt: InterruptSignal,
    ) -> Self {
        Self {
            movement: Movement::new(axes, interrupt),
            run,
            console,
        }
    }

    /// The operator interrupt shared with [`Movement`].
    pub fn interrupt(&self) -> &InterruptSignal {
        self.movement.interrupt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{InterruptPoint, MockBeamline};

    #[tokio::test(start_paused = true)]
    async fn set_axis_dict_issues_one_move_per_entry_in_order() {
        let mock = Arc::new(MockBeamline::new());
        let movement = Movement::new(mock.clone(), InterruptSignal::new());
        let map: AxisValueMap = [("s2hg", 20.0), ("S1HG", 25.0)].into_iter().collect();

        movement.set_axis_dict(&map).await.unwrap();
        movement.wait_for_move().await.unwrap();

        assert_eq!(
            mock.calls(),
            vec!["set S1HG=25", "set S2HG=20", "wait_for_move"]
        );
    }

    #[tokio::test]
    async fn get_gaps_reads_each_slit() {
        let mock = Arc::new(MockBeamline::new().with_axis("S2HC", 1.5));
        let movement = Movement::new(mock, InterruptSignal::new());
        let constants = InstrumentConstants::default();

        let centres = movement.get_gaps(&constants, false, true).await.unwrap();
        assert_eq!(centres.len(), 4);
        assert_eq!(centres.get("S2HC"), Some(1.5));

        let gaps = movement.get_gaps(&constants, false, false).await.unwrap();
        assert_eq!(gaps.get("S1HG"), Some(30.0));
    }

    #[tokio::test]
    async fn wait_for_move_is_interruptible() {
        let signal = InterruptSignal::new();
        let mock = Arc::new(
            MockBeamline::new().with_interrupt(signal.clone(), InterruptPoint::DuringSettle(1)),
        );
        let movement = Movement::new(mock, signal);

        let err = movement.wait_for_move().await.unwrap_err();
        assert!(matches!(err, ScriptError::Interrupted));
    }

    #[tokio::test]
    async fn engaged_oscillations_are_tracked_across_clones() {
        let mock = Arc::new(MockBeamline::new());
        let movement = Movement::new(mock.clone(), InterruptSignal::new());
        let shared = movement.clone();

        movement.oscillate("s2hg", 10.0).await.unwrap();
        assert_eq!(shared.oscillating(), vec!["S2HG"]);

        shared.stop_all_oscillations().await.unwrap();
        assert!(movement.oscillating().is_empty());
        assert_eq!(mock.oscillation("S2HG"), None);

        shared.stop_all_oscillations().await.unwrap();
        assert_eq!(
            mock.calls(),
            vec!["oscillate S2HG=10", "stop_oscillation S2HG"]
        );
    }

    #[tokio::test]
    async fn driver_failure_is_fatal() {
        let mock = Arc::new(MockBeamline::new().with_failing_axis("THETA"));
        let movement = Movement::new(mock, InterruptSignal::new());
        let err = movement.set_axis("theta", 0.5).await.unwrap_err();
        assert!(matches!(err, ScriptError::Hardware(_)));
    }
}
