//! # Design
//!
//! - Errors here are deployment or storage conditions, never request
//!   outcomes; request outcomes use [`crate::ClassifiedError`].
//! - Messages stay constant while context fields carry the specifics.

use thiserror::Error;

use crate::storage::StorageError;

/// Result alias for session persistence and construction.
pub type SessionResult<T> = Result<T, SessionError>;

/// Session-layer error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No encryption key is configured, so nothing can be persisted.
    #[error("session encryption key is not configured")]
    KeyUnconfigured {
        /// Storage key the save targeted.
        storage_key: String,
    },
    /// Sealing the envelope failed.
    #[error("failed to encrypt session envelope")]
    Encrypt {
        /// Storage key the save targeted.
        storage_key: String,
    },
    /// Session state could not be serialized.
    #[error("failed to serialize session state")]
    Serialize {
        /// Source serde error.
        source: serde_json::Error,
    },
    /// The key-value surface rejected an operation.
    #[error("session storage operation failed")]
    Storage {
        /// Operation identifier.
        operation: &'static str,
        /// Source storage error.
        source: StorageError,
    },
    /// The HTTP transport could not be constructed.
    #[error("failed to build http transport")]
    TransportBuild {
        /// Source HTTP client error.
        source: reqwest::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn messages_are_constant_and_sources_preserved() {
        let err = SessionError::KeyUnconfigured {
            storage_key: "quire.session.user".to_string(),
        };
        assert_eq!(err.to_string(), "session encryption key is not configured");
        assert!(err.source().is_none());

        let err = SessionError::Storage {
            operation: "save",
            source: StorageError::InvalidKey {
                key: "../etc".to_string(),
            },
        };
        assert_eq!(err.to_string(), "session storage operation failed");
        assert!(err.source().is_some());
    }
}
