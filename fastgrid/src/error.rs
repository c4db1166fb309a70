//! Error type of this crate.

use super::bin::BinningError;
use thiserror::Error;

/// Catch-all error for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value is missing or does not make sense. Raised when a table, binning or
    /// kernel is constructed.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The calibration data can not be used with the current binning.
    #[error("calibration data does not match the binning: {0}")]
    Mismatch(String),
    /// The calibration data deviates slightly from the current binning and strict checking was
    /// requested.
    #[error("calibration data deviates from the binning: {0}")]
    NearMismatch(String),
    /// An operation was requested that the table does not allow in its current state.
    #[error("`{operation}` is not allowed while the table is {state}")]
    InvalidState {
        /// The requested operation.
        operation: &'static str,
        /// The state the table was in.
        state: &'static str,
    },
    /// An internal consistency check failed.
    #[error("internal error: {0}")]
    Internal(String),
    /// The binning is malformed.
    #[error(transparent)]
    Binning(#[from] BinningError),
    /// An error that originates in this crate.
    #[error("{0}")]
    General(String),
    /// Error that does not originate from this crate.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Type for functions that return an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
