//! Measurement orchestration.
//!
//! - **`setup`**: mode resolution and sample positioning
//! - **`movement`**: axis facade and the [`Beamline`] bundle
//! - **`guard`**: gap/height restore around transmissions, with interrupt recovery
//! - **`measurement`**: counting and slit oscillation
//! - **`estimator`**: dry-run duration estimates
//! - **`actions`**: `run_angle` / `transmission` and the live/dry strategies

pub mod actions;
pub mod axes;
pub mod constants;
pub mod estimator;
pub mod gaps;
pub mod guard;
pub mod measurement;
pub mod movement;
pub mod sample;
pub mod setup;

pub use actions::{
    ActionOutcome, AngleRequest, DryRunActions, LiveActions, ScriptActions, ScriptSession,
    TransmissionRequest,
};
pub use axes::AxisValueMap;
pub use constants::{ConfiguredConstants, ConstantsProvider, InstrumentConstants, ModeOverrides};
pub use estimator::{DryRunEstimator, EstimateRates, RunPlanEntry};
pub use gaps::{FootprintGapCalculator, SlitGapCalculator};
pub use guard::{ConfigurationSnapshot, ExitOutcome, GapHeightGuard, RecoveryChoice, RecoveryState};
pub use measurement::{run_measurement, Oscillation};
pub use movement::{Beamline, Movement};
pub use sample::Sample;
pub use setup::{auto_height, AutoHeight, MirrorRequest, MirrorState};
