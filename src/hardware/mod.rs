//! Beamline hardware abstractions.
//!
//! Capability traits consumed by the orchestration layer, plus a simulated
//! beamline used by tests and by the CLI when no control system is attached.

pub mod capabilities;
pub mod mock;

pub use capabilities::{AxisControl, RunControl, RunState, StopCondition};
pub use mock::{CallLog, InterruptPoint, MockBeamline};
