//! Scoped gap/height restore for transmissions.
//!
//! A transmission opens the horizontal slits and drops the sample out of the
//! beam. [`GapHeightGuard`] snapshots the horizontal gaps and centres on entry
//! and puts them (and the sample heights) back on exit, whichever way the body
//! finished. A slit still oscillating when the snapshot is restored is stopped
//! first.
//!
//! # Exit paths
//!
//! ```text
//! Normal ───────────────────────────────> restore ──> Ok
//! Failed(err) ──────────────────────────> restore ──> Err(err)
//! Interrupted ──> [Counting: pause] ──> Prompting
//!                                         │
//!               ┌─────────── A ───────────┼─────────── E ──────────┐
//!               ▼                         K                        ▼
//!   Aborting: abort, restore              ▼              Ending: end, restore
//!               │                  Keeping: resume                 │
//!               └────────> Restored ─────┬──────── Restored <──────┘
//!                                        ▼
//!                           decision delay ──> Err(Interrupted)
//! ```
//!
//! `exit` consumes the guard, so the snapshot is restored at most once. A guard
//! dropped without `exit` is a bug in the caller and is logged as an error.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::{ScriptError, ScriptResult};

use super::axes::AxisValueMap;
use super::constants::InstrumentConstants;
use super::movement::Beamline;
use super::sample::Sample;

/// Pause between the recovery decision and re-raising the interrupt.
pub const DEFAULT_DECISION_DELAY: Duration = Duration::from_secs(5);

const RECOVERY_PROMPT: &str = "ctrl-c hit do you wish to (A)bort or (E)nd or (K)eep Counting?";
const INVALID_CHOICE: &str = "Invalid choice try again!";
const ABORT_NOTICE: &str = "Setting horizontal slit gaps to pre-transmission values.";
const KEEP_NOTICE: &str =
    "Continuing counting, remember to set back horizontal slit gaps when the run is ended.";

/// State captured when the guard is entered.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationSnapshot {
    /// Horizontal gaps
    pub gaps: AxisValueMap,
    /// Horizontal centres
    pub centres: AxisValueMap,
    /// Nominal fine height
    pub height: f64,
    /// `None` when the instrument has no coarse height stage
    pub height2: Option<f64>,
}

/// How the guarded body finished.
#[derive(Debug)]
pub enum ExitOutcome {
    /// Body finished
    Normal,
    /// Operator interrupted the body
    Interrupted,
    /// Body failed with an error
    Failed(ScriptError),
}

impl From<ScriptResult<()>> for ExitOutcome {
    fn from(result: ScriptResult<()>) -> Self {
        match result {
            Ok(()) => ExitOutcome::Normal,
            Err(ScriptError::Interrupted) => ExitOutcome::Interrupted,
            Err(e) => ExitOutcome::Failed(e),
        }
    }
}

/// Operator's answer to the recovery prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryChoice {
    /// End the run, discarding data, and restore
    Abort,
    /// End the run, keeping data, and restore
    End,
    /// Keep counting and leave the gaps
    Keep,
}

impl FromStr for RecoveryChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(RecoveryChoice::Abort),
            "E" => Ok(RecoveryChoice::End),
            "K" => Ok(RecoveryChoice::Keep),
            other => Err(format!("'{other}' is not one of A, E or K")),
        }
    }
}

/// Interrupt recovery progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// Run was counting when the interrupt was handled
    Counting,
    /// Waiting for the operator's choice
    Prompting,
    /// Abort chosen
    Aborting,
    /// End chosen
    Ending,
    /// Keep chosen; the snapshot is left alone
    Keeping,
    /// Snapshot has been put back
    Restored,
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryState::Counting => write!(f, "Counting"),
            RecoveryState::Prompting => write!(f, "Prompting"),
            RecoveryState::Aborting => write!(f, "Aborting"),
            RecoveryState::Ending => write!(f, "Ending"),
            RecoveryState::Keeping => write!(f, "Keeping"),
            RecoveryState::Restored => write!(f, "Restored"),
        }
    }
}

impl RecoveryState {
    /// True once the operator has made a choice.
    pub fn is_decided(&self) -> bool {
        matches!(
            self,
            RecoveryState::Aborting
                | RecoveryState::Ending
                | RecoveryState::Keeping
                | RecoveryState::Restored
        )
    }

    /// True when no further transitions follow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryState::Keeping | RecoveryState::Restored)
    }
}

/// Restores horizontal gaps, centres and sample heights on exit.
pub struct GapHeightGuard {
    beamline: Beamline,
    snapshot: ConfigurationSnapshot,
    decision_delay: Duration,
    exited: bool,
}

impl GapHeightGuard {
    /// Snapshot the live horizontal gaps and centres and the sample's nominal
    /// heights.
    pub async fn enter(
        beamline: &Beamline,
        sample: &Sample,
        constants: &InstrumentConstants,
    ) -> ScriptResult<Self> {
        let movement = &beamline.movement;
        let gaps = movement.get_gaps(constants, false, false).await?;
        let centres = movement.get_gaps(constants, false, true).await?;
        info!(gaps = %gaps, centres = %centres, "Entering gap/height guard");

        Ok(Self {
            beamline: beamline.clone(),
            snapshot: ConfigurationSnapshot {
                gaps,
                centres,
                height: sample.height_offset,
                height2: constants.has_height2.then_some(sample.height2_offset),
            },
            decision_delay: DEFAULT_DECISION_DELAY,
            exited: false,
        })
    }

    /// Override the pause after a recovery decision.
    pub fn with_decision_delay(mut self, delay: Duration) -> Self {
        self.decision_delay = delay;
        self
    }

    /// What `exit` will restore.
    pub fn snapshot(&self) -> &ConfigurationSnapshot {
        &self.snapshot
    }

    /// Leave the guarded scope.
    pub async fn exit(mut self, outcome: ExitOutcome) -> ScriptResult<()> {
        self.exited = true;
        match outcome {
            ExitOutcome::Normal => self.restore().await,
            ExitOutcome::Failed(err) => {
                if let Err(restore_err) = self.restore().await {
                    error!(error = %restore_err, "Restore after failure did not complete");
                }
                Err(err)
            }
            ExitOutcome::Interrupted => {
                let mut state = RecoveryState::Prompting;
                match self.recover(&mut state).await {
                    Ok(()) => self.decision_pause().await,
                    Err(err) => {
                        if !state.is_decided() {
                            if let Err(restore_err) = self.restore().await {
                                error!(error = %restore_err, "Restore after failed recovery did not complete");
                            }
                        }
                        Err(err)
                    }
                }
            }
        }
    }

    async fn restore(&self) -> ScriptResult<()> {
        let movement = &self.beamline.movement;
        let console = &self.beamline.console;
        let snapshot = &self.snapshot;

        movement.stop_all_oscillations().await?;
        console.status(&format!(
            "Reset horizontal centres to {:?}",
            snapshot.centres.values()
        ));
        movement.set_axis_dict(&snapshot.centres).await?;
        console.status(&format!(
            "Reset horizontal gaps to {:?}",
            snapshot.gaps.values()
        ));
        movement.set_axis_dict(&snapshot.gaps).await?;

        movement.set_axis("HEIGHT", snapshot.height).await?;
        if let Some(height2) = snapshot.height2 {
            movement.set_axis("HEIGHT2", height2).await?;
        }
        movement.wait_for_move().await?;
        info!("Horizontal gaps and sample height restored");
        Ok(())
    }

    /// Drive the recovery state machine to a terminal state.
    async fn recover(&self, state: &mut RecoveryState) -> ScriptResult<()> {
        let run = &self.beamline.run;
        let console = &self.beamline.console;

        // Lower the flag so a second interrupt during the decision is seen.
        self.beamline.interrupt().clear();
        let counting = run.run_state().await?.is_counting();
        if counting {
            *state = RecoveryState::Counting;
        }

        while !state.is_terminal() {
            let next = match *state {
                RecoveryState::Counting => {
                    run.pause().await?;
                    RecoveryState::Prompting
                }
                RecoveryState::Prompting => match self.ask().await? {
                    RecoveryChoice::Abort => RecoveryState::Aborting,
                    RecoveryChoice::End => RecoveryState::Ending,
                    RecoveryChoice::Keep => RecoveryState::Keeping,
                },
                RecoveryState::Aborting => {
                    if counting {
                        run.abort().await?;
                    }
                    console.status(ABORT_NOTICE);
                    self.restore().await?;
                    RecoveryState::Restored
                }
                RecoveryState::Ending => {
                    if counting {
                        run.end().await?;
                    }
                    self.restore().await?;
                    RecoveryState::Restored
                }
                RecoveryState::Keeping | RecoveryState::Restored => break,
            };
            let current = *state;
            info!(from = %current, to = %next, "Recovery transition");
            *state = next;
        }

        if *state == RecoveryState::Keeping {
            console.status(KEEP_NOTICE);
            warn!("{KEEP_NOTICE}");
            if counting {
                run.resume().await?;
            }
        }
        Ok(())
    }

    async fn ask(&self) -> ScriptResult<RecoveryChoice> {
        let console = &self.beamline.console;
        loop {
            let Some(answer) = console.prompt(RECOVERY_PROMPT).await? else {
                return Err(ScriptError::Console(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "console closed while waiting for a recovery choice",
                )));
            };
            match answer.parse::<RecoveryChoice>() {
                Ok(choice) => return Ok(choice),
                Err(reason) => {
                    info!(%reason, "Rejected recovery choice");
                    console.status(INVALID_CHOICE);
                }
            }
        }
    }

    /// Give the operator time to interrupt again, then re-raise.
    async fn decision_pause(&self) -> ScriptResult<()> {
        let delay = self.decision_delay;
        let waited = self
            .beamline
            .interrupt()
            .guard(async move {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await;
        if waited.is_err() {
            info!("Decision delay cut short by a second interrupt");
        }
        Err(ScriptError::Interrupted)
    }
}

impl Drop for GapHeightGuard {
    fn drop(&mut self) {
        if !self.exited {
            error!(
                gaps = %self.snapshot.gaps,
                centres = %self.snapshot.centres,
                "Gap/height guard dropped without exit; horizontal gaps were not restored"
            );
        }
    }
}
