use thiserror::Error;

use crate::dao::storage::StorageError;

/// Result alias for Redis DAO operations.
pub type RedisResult<T> = Result<T, RedisDaoError>;

/// Errors raised by the Redis session backend.
#[derive(Debug, Error)]
pub enum RedisDaoError {
    /// The client could not be created or the connection manager failed
    /// to reach the server.
    #[error("failed to connect to `{url}`")]
    Connect {
        /// Candidate URL that failed.
        url: String,
        /// Driver error.
        #[source]
        source: redis::RedisError,
    },
    /// A single command failed for a session.
    #[error("`{command}` failed for session `{code}`")]
    Command {
        /// Redis command family that failed.
        command: &'static str,
        /// Session code the command targeted.
        code: String,
        /// Driver error.
        #[source]
        source: redis::RedisError,
    },
    /// A command with no session scope failed.
    #[error("`{command}` failed")]
    Global {
        /// Redis command family that failed.
        command: &'static str,
        /// Driver error.
        #[source]
        source: redis::RedisError,
    },
    /// A stored value could not be decoded as the expected JSON document.
    #[error("corrupt value under `{key}`")]
    Decode {
        /// Key holding the undecodable value.
        key: String,
        /// Serde error.
        #[source]
        source: serde_json::Error,
    },
    /// A value could not be encoded for storage.
    #[error("failed to encode value for `{key}`")]
    Encode {
        /// Destination key.
        key: String,
        /// Serde error.
        #[source]
        source: serde_json::Error,
    },
    /// The pub/sub driver task is not running.
    #[error("pub/sub driver unavailable")]
    PubSubClosed,
}

/// Whether a driver error means the connection itself is gone, as opposed
/// to a command-level failure against a healthy server.
fn connection_level(err: &redis::RedisError) -> bool {
    err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_unrecoverable_error()
}

impl From<RedisDaoError> for StorageError {
    fn from(err: RedisDaoError) -> Self {
        let message = err.to_string();
        match &err {
            RedisDaoError::Connect { .. } | RedisDaoError::PubSubClosed => {
                StorageError::unavailable(message, err)
            }
            RedisDaoError::Command { source, .. } | RedisDaoError::Global { source, .. } => {
                if connection_level(source) {
                    StorageError::unavailable(message, err)
                } else {
                    StorageError::operation(message, err)
                }
            }
            RedisDaoError::Decode { .. } | RedisDaoError::Encode { .. } => {
                StorageError::operation(message, err)
            }
        }
    }
}
