use std::time::Duration;

use thiserror::Error;

/// Errors from series allocation and the save path around it.
///
/// Every variant aborts the save of the entity; the caller's field value is
/// left exactly as it was before the attempt.
#[derive(Error, Debug)]
pub enum SeriesError {
    /// The suffix template cannot be resolved.
    #[error("invalid series template '{template}': {reason}")]
    InvalidTemplate { template: String, reason: String },

    /// The store could not answer the max-value lookup.
    #[error("series query failed: {0}")]
    QueryFailure(String),

    /// Another allocation held the series past the wait bound. Safe to retry.
    #[error("series '{key}' is locked (waited {waited:?})")]
    SeriesLocked { key: String, waited: Duration },

    /// The record carrying the new number could not be written.
    #[error("storage error: {0}")]
    Storage(String),
}

impl SeriesError {
    /// Whether retrying the same save may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SeriesError::SeriesLocked { .. })
    }
}
