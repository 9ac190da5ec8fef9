//! Custom error types for the workcell.
//!
//! This module defines the primary error type, `TransferError`, for the whole crate.
//! Using the `thiserror` crate, it provides one consistent error surface for the
//! state store, the labware model, the command interpreter and the run log.
//!
//! ## Error Taxonomy
//!
//! - **`NotFound`**: An expected absence. A missing command ends a runner's loop
//!   cleanly; a missing plate or journal is reported to the caller.
//! - **`InvalidOperation`**: Fatal to the job. Stacker full or empty, wrong plate
//!   kind, LIFO violation, carousel index out of range, unrecognised verb.
//! - **`Cancelled`**: The operator stopped the job. Not an error condition for
//!   logging purposes; the runner still persists its snapshot.
//! - **`Timeout`** / **`Actuation`**: The driver behind an actuation failed or did
//!   not finish in time. No retry happens at this layer.
//! - **`Io`**, **`Serialization`**, **`Config`**: Infrastructure failures from the
//!   run log and configuration loading.
//!
//! By using `#[from]`, `TransferError` can be created from the underlying error
//! types with the `?` operator.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, TransferError>;

/// Error type shared by every layer of the workcell.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Command, plate or journal absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request the workcell cannot carry out; fails the job
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Operator stop
    #[error("Operation cancelled")]
    Cancelled,

    /// Driver did not report back within the configured timeout
    #[error("Actuation '{action}' timed out after {after:?}")]
    Timeout {
        /// Display form of the action that was running
        action: String,
        /// Timeout that elapsed
        after: Duration,
    },

    /// Driver reported a failure
    #[error("Actuation failed: {0}")]
    Actuation(String),

    /// Run log file access
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Run log record encoding
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TransferError {
    /// Shorthand for an [`TransferError::InvalidOperation`] with a formatted message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Shorthand for a [`TransferError::NotFound`] with a formatted message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// True for an operator stop.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for an expected absence.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
