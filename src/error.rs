//! Custom error types for the orchestration layer.
//!
//! `ScriptError` is the single error type returned by every orchestration
//! call. Using `thiserror`, it separates the exceptional paths a measurement
//! script can take:
//!
//! - **`Interrupted`**: the operator interrupt. This is the only expected,
//!   handled exceptional path. It is resolved by the gap/height guard and then
//!   re-raised so the calling script terminates.
//! - **`Hardware`**: anything reported by the axis driver or the run-control
//!   system. Treated as fatal to the enclosing call; there are no retries.
//! - **`Console`**: the operator console went away (EOF or I/O failure).
//! - **`Config`** / **`Script`**: loading configuration or a script file failed.
//!
//! Capability traits in [`crate::hardware`] return `anyhow::Result`, so driver
//! errors convert into `ScriptError::Hardware` with `?`.

use thiserror::Error;

/// Convenience alias for results using the orchestration error type.
pub type ScriptResult<T> = std::result::Result<T, ScriptError>;

/// Everything that can end a measurement action early.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// The operator interrupted; raised again after recovery.
    #[error("Interrupted by operator")]
    Interrupted,

    /// Reported by the axis driver or run control.
    #[error("Hardware error: {0:#}")]
    Hardware(#[from] anyhow::Error),

    /// The operator console failed or closed.
    #[error("Console error: {0}")]
    Console(#[from] std::io::Error),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A script file is not valid TOML or has an unknown shape.
    #[error("Script parse error: {0}")]
    Script(#[from] toml::de::Error),

    /// A script action names a sample the script does not define.
    #[error("Unknown sample '{0}' referenced by script")]
    UnknownSample(String),

    /// Sample height alignment failed and the run was not told to continue.
    #[error("Auto-height failed: {0}")]
    AutoHeight(String),

    /// A live action reached a session built without hardware.
    #[error("No hardware attached to this session; only dry runs are possible")]
    NoHardware,
}

impl From<figment::Error> for ScriptError {
    fn from(value: figment::Error) -> Self {
        ScriptError::Config(Box::new(value))
    }
}

impl ScriptError {
    /// True for the operator interrupt.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, ScriptError::Interrupted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_errors_convert_with_question_mark() {
        fn failing() -> ScriptResult<()> {
            let driver: anyhow::Result<()> = Err(anyhow::anyhow!("S1HG limit switch"));
            driver?;
            Ok(())
        }

        let err = failing().unwrap_err();
        assert!(matches!(err, ScriptError::Hardware(_)));
        assert!(err.to_string().contains("S1HG limit switch"));
        assert!(!err.is_interrupt());
    }

    #[test]
    fn interrupt_is_recognised() {
        assert!(ScriptError::Interrupted.is_interrupt());
        assert_eq!(ScriptError::Interrupted.to_string(), "Interrupted by operator");
    }
}
