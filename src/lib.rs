//! # refl_daq
//!
//! Measurement orchestration for neutron reflectometry beamlines. The library
//! turns high-level actions ("measure this sample at this angle", "take a
//! transmission") into axis moves, slit gap settings, run-control commands and
//! operator prompts, or into a time estimate when dry-running.
//!
//! ## Crate Structure
//!
//! - **`experiment`**: the orchestration layer: sample setup, axis facade,
//!   gap/height guard, counting, dry-run estimates and the action entry points.
//! - **`hardware`**: capability traits the control system implements
//!   (`AxisControl`, `RunControl`) and a simulated beamline for tests and demos.
//! - **`console`**: operator status lines and the recovery prompt.
//! - **`interrupt`**: the operator interrupt (Ctrl-C) as an async signal.
//! - **`script`**: TOML measurement scripts.
//! - **`config`**: layered configuration (defaults, TOML, environment).
//! - **`tracing_config`**: `tracing-subscriber` setup.
//! - **`error`**: the `ScriptError` type shared by all of the above.

pub mod config;
pub mod console;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod interrupt;
pub mod script;
pub mod tracing_config;

pub use error::{ScriptError, ScriptResult};
