//! Custom error types for the application.
//!
//! This module defines the primary error type, `SweepError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the kinds of errors that can occur, from I/O and configuration issues to
//! instrument availability and result-file parsing.
//!
//! ## Error Hierarchy
//!
//! `SweepError` is an enum that consolidates various error sources:
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type
//!   mismatches in the configuration sources.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine but is
//!   logically wrong (e.g., a zero sweep speed). Caught during validation.
//! - **`Io`** / **`Csv`**: File I/O and tab-separated codec failures.
//! - **`DeviceUnavailable`**: An instrument could not be connected or identified. The
//!   bench logs this once and continues with a degraded device that yields sentinels.
//! - **`SweepTimeout`**: Sweep-start detection gave up waiting. Logged, never fatal.
//! - **`MalformedResultFile`**: A result file failed to parse. Loading aborts without
//!   touching the previous-session store.
//! - **`InvalidTransition`**: A controller action was requested in a state that does not
//!   accept it (e.g., starting a sweep while one is running).
//! - **`FeatureNotEnabled`**: Functionality compiled out via feature flags.
//!
//! Instrument drivers and capability traits use `anyhow::Result`; the controller turns
//! those failures into sentinel readings instead of surfacing them here.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SweepError>;

/// Errors surfaced by configuration, persistence and the sweep controller.
#[derive(Error, Debug)]
pub enum SweepError {
    /// A configuration source could not be read or deserialized.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration values that parsed but are not usable.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tab-separated reader or writer failure.
    #[cfg(feature = "storage_csv")]
    #[error("Result file codec error: {0}")]
    Csv(#[from] csv::Error),

    /// An instrument could not be connected or identified.
    #[error("{device} unavailable: {reason}")]
    DeviceUnavailable {
        /// Which instrument
        device: String,
        /// Underlying cause
        reason: String,
    },

    /// The laser never left the start wavelength.
    #[error("Sweep start not detected within {waited_s:.2} s")]
    SweepTimeout {
        /// Time waited before launching anyway
        waited_s: f64,
    },

    /// A result file did not parse.
    #[error("Malformed result file at line {line}: {reason}")]
    MalformedResultFile {
        /// 1-based line number
        line: usize,
        /// What was wrong
        reason: String,
    },

    /// The controller does not accept the action in its current state.
    #[error("Cannot {action} while controller is {from}")]
    InvalidTransition {
        /// Current state
        from: String,
        /// Rejected action
        action: String,
    },

    /// The functionality was compiled out.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for SweepError {
    fn from(err: figment::Error) -> Self {
        SweepError::Config(Box::new(err))
    }
}

impl SweepError {
    /// Shorthand for a result-file parse failure.
    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        SweepError::MalformedResultFile {
            line,
            reason: reason.into(),
        }
    }
}
