//! Integration tests for dry runs and script execution

use std::sync::Arc;

use refl_daq::console::ScriptedConsole;
use refl_daq::experiment::{
    ActionOutcome, AngleRequest, Beamline, ConfiguredConstants, DryRunActions, EstimateRates,
    FootprintGapCalculator, LiveActions, Sample, ScriptSession, TransmissionRequest,
};
use refl_daq::hardware::{MockBeamline, StopCondition};
use refl_daq::interrupt::InterruptSignal;
use refl_daq::script::ScriptFile;
use refl_daq::ScriptError;

fn live_session(mock: &Arc<MockBeamline>, console: Arc<ScriptedConsole>) -> ScriptSession {
    let beamline = Beamline::new(
        mock.clone(),
        mock.clone(),
        console.clone(),
        InterruptSignal::new(),
    );
    let live = LiveActions::new(
        beamline,
        Arc::new(ConfiguredConstants::default()),
        Arc::new(FootprintGapCalculator),
    );
    ScriptSession::live(live, DryRunActions::new(EstimateRates::default(), console))
}

fn minutes(outcome: &ActionOutcome) -> f64 {
    outcome.plan_entry().map(|e| e.minutes).unwrap_or(f64::NAN)
}

// =============================================================================
// Estimates
// =============================================================================

#[tokio::test]
async fn test_estimates_per_condition() {
    let console = Arc::new(ScriptedConsole::new(Vec::<String>::new()));
    let mut session = ScriptSession::dry(DryRunActions::new(EstimateRates::default(), console.clone()));
    let sample = Sample::new("Quartz", "");

    let charge = session
        .run_angle(&AngleRequest::new(sample.clone(), 0.7).with_count(StopCondition::Charge(40.0)))
        .await
        .unwrap();
    let time = session
        .run_angle(&AngleRequest::new(sample.clone(), 0.7).with_count(StopCondition::Time(60.0)))
        .await
        .unwrap();
    let frames = session
        .transmission(
            &TransmissionRequest::new(sample, "T").with_count(StopCondition::Frames(36000.0)),
        )
        .await
        .unwrap();

    assert_eq!(minutes(&charge), 60.0);
    assert_eq!(minutes(&time), 1.0);
    assert_eq!(minutes(&frames), 1.0);
    assert_eq!(session.estimator().total_minutes(), 62.0);

    let lines = console.transcript();
    assert_eq!(lines.len(), 4);
    assert!(lines[3].starts_with("status: 03 Dry run: transmission"));
    assert!(lines[3].ends_with("-->| 01:02  hh:mm"));
}

#[tokio::test]
async fn test_zero_conditions_cost_nothing() {
    let console = Arc::new(ScriptedConsole::new(Vec::<String>::new()));
    let mut session = ScriptSession::dry(DryRunActions::new(EstimateRates::default(), console));

    let outcome = session
        .run_angle(
            &AngleRequest::new(Sample::new("Quartz", ""), 0.7).with_counts(
                Some(0.0),
                Some(0.0),
                Some(0.0),
            ),
        )
        .await
        .unwrap();

    assert_eq!(minutes(&outcome), 0.0);
    assert_eq!(session.estimator().count(), 1);
}

#[tokio::test]
async fn test_dry_request_in_live_session_touches_nothing() {
    let mock = Arc::new(MockBeamline::new());
    let console = Arc::new(ScriptedConsole::new(Vec::<String>::new()));
    let mut session = live_session(&mock, console.clone());

    let outcome = session
        .transmission(
            &TransmissionRequest::new(Sample::new("Quartz", ""), "T")
                .with_count(StopCondition::Time(600.0))
                .dry_run(true),
        )
        .await
        .unwrap();

    assert_eq!(minutes(&outcome), 10.0);
    assert!(mock.calls().is_empty());
    assert!(console
        .transcript()
        .iter()
        .all(|line| !line.contains("Running for real")));
}

// =============================================================================
// Scripts
// =============================================================================

const SCRIPT: &str = r#"
[samples.quartz]
title = "Quartz"
subtitle = "D2O"
hgaps = { S1HG = 40.0 }

[[actions]]
kind = "run_angle"
sample = "quartz"
angle = 0.7
count_uamps = 40.0

[[actions]]
kind = "transmission"
sample = "quartz"
title = "Quartz trans"
count_seconds = 120.0
"#;

#[tokio::test]
async fn test_script_dry_run_plan() {
    let script = ScriptFile::parse(SCRIPT).unwrap();
    let console = Arc::new(ScriptedConsole::new(Vec::<String>::new()));
    let mut session = ScriptSession::dry(DryRunActions::new(EstimateRates::default(), console));

    let outcomes = script.run(&mut session).await.unwrap();

    let entries: Vec<_> = outcomes.iter().filter_map(|o| o.plan_entry()).collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].action, "run_angle");
    assert_eq!(entries[1].action, "transmission");
    assert_eq!(entries[1].cumulative_minutes, 62.0);

    let json = serde_json::to_value(&entries).unwrap();
    assert_eq!(json[0]["title"], "Quartz");
}

#[tokio::test(start_paused = true)]
async fn test_script_live_run() {
    let script = ScriptFile::parse(SCRIPT).unwrap();
    let mock = Arc::new(MockBeamline::new());
    let console = Arc::new(ScriptedConsole::new(Vec::<String>::new()));
    let mut session = live_session(&mock, console);

    let outcomes = script.run(&mut session).await.unwrap();

    assert!(outcomes.iter().all(|o| *o == ActionOutcome::Executed));
    let calls = mock.calls();
    assert_eq!(calls.iter().filter(|c| c.as_str() == "begin").count(), 2);
    assert!(mock.title().starts_with("Quartz trans VG("));
    assert_eq!(mock.value("S1HG"), Some(40.0));
}

#[tokio::test]
async fn test_unknown_sample_moves_nothing() {
    let script = ScriptFile::parse(
        r#"
[samples.quartz]
title = "Quartz"

[[actions]]
kind = "run_angle"
sample = "quartz"
angle = 0.7

[[actions]]
kind = "run_angle"
sample = "silicon"
angle = 0.7
"#,
    )
    .unwrap();
    let mock = Arc::new(MockBeamline::new());
    let console = Arc::new(ScriptedConsole::new(Vec::<String>::new()));
    let mut session = live_session(&mock, console);

    let err = script.run(&mut session).await.unwrap_err();

    assert!(matches!(err, ScriptError::UnknownSample(ref name) if name == "silicon"));
    assert!(mock.calls().is_empty());
}
