//! Dry-run duration estimates.
//!
//! One [`DryRunEstimator`] covers one script: it numbers each action, keeps a
//! running total of estimated minutes and prints the plan table as it goes.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::console::SharedConsole;
use crate::hardware::StopCondition;

/// Conversion rates from stop conditions to minutes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimateRates {
    /// Beam current integrated per hour (µA·h)
    pub uamps_per_hour: f64,
    /// Seconds counted per minute
    pub seconds_per_minute: f64,
    /// Detector frames per minute
    pub frames_per_minute: f64,
}

impl Default for EstimateRates {
    fn default() -> Self {
        Self {
            uamps_per_hour: 40.0,
            seconds_per_minute: 60.0,
            frames_per_minute: 36000.0,
        }
    }
}

impl EstimateRates {
    /// Estimated minutes to satisfy `condition`; zero without one.
    pub fn minutes(&self, condition: Option<StopCondition>) -> f64 {
        match condition {
            Some(StopCondition::Charge(uamps)) => uamps / self.uamps_per_hour * 60.0,
            Some(StopCondition::Time(seconds)) => seconds / self.seconds_per_minute,
            Some(StopCondition::Frames(frames)) => frames / self.frames_per_minute,
            None => 0.0,
        }
    }
}

/// One row of the dry-run plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunPlanEntry {
    /// 1-based position in the plan
    pub sequence: u32,
    /// `run_angle` or `transmission`
    pub action: String,
    /// Sample title
    pub title: String,
    /// Angle and counting summary
    pub parameters: String,
    /// Estimate for this action alone
    pub minutes: f64,
    /// Running total including this action
    pub cumulative_minutes: f64,
}

fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

impl fmt::Display for RunPlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.cumulative_minutes.max(0.0) as u64;
        write!(
            f,
            "{:02} Dry run: {:17} {:52} {:17} -->| {:02}:{:02}  hh:mm",
            self.sequence,
            clip(&self.action, 15),
            clip(&self.title, 50),
            clip(&self.parameters, 15),
            total / 60,
            total % 60,
        )
    }
}

/// Column header printed before the first row.
pub fn plan_header() -> String {
    format!(
        "{:^11}|{:^17}|{:^52}|{:^19}|{:^16}",
        "No", "Action", "Title", "Parameters", "Duration"
    )
}

/// Session state of a dry run.
pub struct DryRunEstimator {
    counter: u32,
    total_minutes: f64,
    header_printed: bool,
    rates: EstimateRates,
    console: SharedConsole,
}

impl DryRunEstimator {
    /// Empty plan printing rows to `console`.
    pub fn new(rates: EstimateRates, console: SharedConsole) -> Self {
        Self {
            counter: 0,
            total_minutes: 0.0,
            header_printed: false,
            rates,
            console,
        }
    }

    /// Minutes for one condition, with this session's rates.
    pub fn estimate(&self, condition: Option<StopCondition>) -> f64 {
        self.rates.minutes(condition)
    }

    /// Number and print one planned action.
    pub fn record(
        &mut self,
        action: &str,
        title: &str,
        parameters: &str,
        condition: Option<StopCondition>,
    ) -> RunPlanEntry {
        let minutes = self.estimate(condition);
        self.counter += 1;
        self.total_minutes += minutes;

        let entry = RunPlanEntry {
            sequence: self.counter,
            action: action.to_string(),
            title: title.to_string(),
            parameters: parameters.to_string(),
            minutes,
            cumulative_minutes: self.total_minutes,
        };
        debug!(?entry, "Dry run estimate");

        if !self.header_printed {
            self.console.status(&plan_header());
            self.header_printed = true;
        }
        self.console.status(&entry.to_string());
        entry
    }

    /// Minutes estimated so far.
    pub fn total_minutes(&self) -> f64 {
        self.total_minutes
    }

    /// Actions recorded so far.
    pub fn count(&self) -> u32 {
        self.counter
    }

    /// Start a fresh script.
    pub fn reset(&mut self) {
        self.counter = 0;
        self.total_minutes = 0.0;
        self.header_printed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ScriptedConsole;
    use std::sync::Arc;

    #[test]
    fn default_rates() {
        let rates = EstimateRates::default();
        assert_eq!(rates.minutes(Some(StopCondition::Charge(40.0))), 60.0);
        assert_eq!(rates.minutes(Some(StopCondition::Time(60.0))), 1.0);
        assert_eq!(rates.minutes(Some(StopCondition::Frames(36000.0))), 1.0);
        assert_eq!(rates.minutes(None), 0.0);
    }

    #[test]
    fn header_once_and_running_total() {
        let console = Arc::new(ScriptedConsole::new(Vec::<String>::new()));
        let mut estimator = DryRunEstimator::new(EstimateRates::default(), console.clone());

        let first = estimator.record("run_angle", "Quartz", "0.7", Some(StopCondition::Charge(40.0)));
        let second = estimator.record("transmission", "Quartz", "", Some(StopCondition::Time(90.0)));

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.cumulative_minutes, 61.5);

        let lines = console.transcript();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("Duration"));
        assert!(lines[1].starts_with("status: 01 Dry run: run_angle"));
        assert!(lines[2].ends_with("-->| 01:01  hh:mm"));
    }

    #[test]
    fn long_fields_are_clipped() {
        let entry = RunPlanEntry {
            sequence: 3,
            action: "transmission_with_mirror".into(),
            title: "x".repeat(80),
            parameters: "p".repeat(40),
            minutes: 0.0,
            cumulative_minutes: 0.0,
        };
        let row = entry.to_string();
        assert!(row.starts_with("03 Dry run: transmission_wi  "));
        assert!(!row.contains(&"x".repeat(51)));
        assert!(!row.contains(&"p".repeat(16)));
    }

    #[test]
    fn reset_starts_numbering_again() {
        let console = Arc::new(ScriptedConsole::new(Vec::<String>::new()));
        let mut estimator = DryRunEstimator::new(EstimateRates::default(), console);
        estimator.record("run_angle", "a", "", None);
        estimator.reset();
        let entry = estimator.record("run_angle", "b", "", None);
        assert_eq!(entry.sequence, 1);
        assert_eq!(estimator.total_minutes(), 0.0);
    }
}
