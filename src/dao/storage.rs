use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by session backends regardless of the underlying store.
///
/// The two variants drive different recovery paths: `Unavailable` means the
/// backend itself cannot be reached and the store should fail over to the
/// in-process backend, while `Operation` means the backend was reachable but
/// a single call failed and the error belongs to the caller.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend connection is down or was lost mid-operation.
    #[error("backend unavailable: {message}")]
    Unavailable {
        /// Human readable description of the failure.
        message: String,
        /// Underlying backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A single operation failed against a reachable backend.
    #[error("operation failed: {message}")]
    Operation {
        /// Human readable description of the failure.
        message: String,
        /// Underlying backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct an operation error from any backend failure.
    pub fn operation(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Operation {
            message,
            source: Box::new(source),
        }
    }

    /// Whether this error indicates the whole backend is unreachable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StorageError::Unavailable { .. })
    }
}
