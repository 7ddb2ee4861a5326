//! Crate-wide error type.
//!
//! Every fallible operation returns [`SimResult`]. Errors are surfaced to the
//! caller of the operation that triggered them; nothing is retried.

use thiserror::Error;

use crate::config::ConfigError;

/// Result alias used throughout the crate.
pub type SimResult<T> = Result<T, SimError>;

/// Errors raised by the simulation engine and its input/output layers.
#[derive(Error, Debug)]
pub enum SimError {
    /// Missing or malformed static input, detected before time advances.
    #[error("configuration error: {}", join_errors(.0))]
    Configuration(Vec<ConfigError>),

    /// Malformed curve table.
    #[error("invalid curve: {0}")]
    InvalidCurve(String),

    /// A record was appended at or before the last recorded time.
    #[error("non-monotonic time: {time} is not after last recorded time {last}")]
    NonMonotonicTime {
        /// Rejected time.
        time: f64,
        /// Last recorded time.
        last: f64,
    },

    /// `update_until` was asked to rewind.
    #[error("cannot update to {target}s: current time is {current}s")]
    PastTime {
        /// Requested time.
        target: f64,
        /// Current simulation time.
        current: f64,
    },

    /// `update_until` was asked to go past the configured end time.
    #[error("cannot update to {target}s: end time is {end}s")]
    BeyondEndTime {
        /// Requested time.
        target: f64,
        /// Configured end time.
        end: f64,
    },

    /// A series was queried before its first record.
    #[error("no data at {time}s{}", first_hint(.first))]
    NoData {
        /// Query time.
        time: f64,
        /// First recorded time, if any record exists.
        first: Option<f64>,
    },

    /// The numerical solver could not satisfy its tolerance.
    #[error("integration failed at t={time}s: {message}")]
    Integration {
        /// Time at which the step was attempted.
        time: f64,
        /// What went wrong.
        message: String,
    },

    /// An operation needed an initialized engine.
    #[error("engine is not initialized")]
    NotInitialized,

    /// `initialize` was called twice.
    #[error("engine is already initialized")]
    AlreadyInitialized,

    /// An operation was attempted after an unrecoverable failure.
    #[error("engine failed earlier and must be reinitialized: {0}")]
    EngineFailed(String),

    /// Filesystem error in a loader or exporter.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed CSV input or output.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl SimError {
    /// Shorthand for a single configuration error.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        SimError::Configuration(vec![ConfigError {
            field: field.into(),
            message: message.into(),
        }])
    }
}

impl From<ConfigError> for SimError {
    fn from(e: ConfigError) -> Self {
        SimError::Configuration(vec![e])
    }
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn first_hint(first: &Option<f64>) -> String {
    match first {
        Some(t) => format!(" (first record at {t}s)"),
        None => " (series is empty)".to_string(),
    }
}
