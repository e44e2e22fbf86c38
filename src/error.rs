//! Service-level error taxonomy.

use thiserror::Error;
use validator::ValidationErrors;

use crate::dao::storage::StorageError;

/// Errors surfaced by [`LiveSessionStore`] operations.
///
/// Connection-level backend failures never appear here: the store recovers
/// them internally by switching to the in-process fallback. What remains is
/// caller-facing: invalid input, absent entities, and operation failures
/// against a reachable backend.
///
/// [`LiveSessionStore`]: crate::services::store::LiveSessionStore
#[derive(Debug, Error)]
pub enum StoreError {
    /// A single operation failed against a reachable backend.
    #[error("storage operation failed")]
    Backend(#[source] StorageError),
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The targeted entity does not exist (or its TTL elapsed).
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        StoreError::Backend(err)
    }
}

impl From<ValidationErrors> for StoreError {
    fn from(err: ValidationErrors) -> Self {
        StoreError::InvalidInput(format!("validation failed: {err}"))
    }
}
