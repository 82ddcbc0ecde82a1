//! Error types for dqr-sync
//!
//! Every variant is recoverable: the engine keeps running and the caller
//! decides what to show the reviewer.

use dqr_common::QueueName;
use thiserror::Error;

use crate::coordinator::ReviewAction;

/// Main error type for dqr-sync
#[derive(Error, Debug)]
pub enum Error {
    /// Bulk load of one queue failed; other queues are unaffected
    #[error("Fetch of {queue} queue failed: {message}")]
    FetchFailure { queue: QueueName, message: String },

    /// Remote approve/reject call failed; the optimistic move was undone
    /// unless a newer snapshot already placed the record
    #[error("{action} of {object_id} failed: {message}")]
    MutationFailure {
        action: ReviewAction,
        object_id: String,
        message: String,
    },

    /// Record is no longer in the queue the operation expected
    #[error("Stale target: {object_id} is not in the {expected} queue")]
    StaleTarget { object_id: String, expected: QueueName },

    /// Request rejected locally before any state change or network call
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Transport, HTTP status or response decoding failure
    #[error("Remote error: {0}")]
    Remote(String),

    /// Configuration or other shared-library error
    #[error(transparent)]
    Common(#[from] dqr_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_stale_target(&self) -> bool {
        matches!(self, Error::StaleTarget { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub fn is_mutation_failure(&self) -> bool {
        matches!(self, Error::MutationFailure { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Remote(e.to_string())
    }
}

/// Convenience Result type using dqr-sync Error
pub type Result<T> = std::result::Result<T, Error>;
