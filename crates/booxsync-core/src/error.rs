//! Error types for booxsync-core

use thiserror::Error;

/// Result type alias using booxsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in booxsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Library file storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Transport-level HTTP failure
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("API error: {message}")]
    Api { status: u16, message: String },

    /// Credentials are missing or the refresh was rejected
    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    /// Realtime socket failure
    #[error("Realtime error: {0}")]
    Realtime(String),
}

/// Coarse classification used by callers to decide how to surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeouts, refused connections, 5xx. Retried on the next scheduled pass.
    TransientNetwork,
    /// The session can no longer be refreshed. Surface as sign-out.
    AuthFailure,
    /// The backend rejected the request for a non-transient reason.
    Remote,
    /// Disk or local database failure.
    StorageFailure,
    /// Malformed payload or bad caller input.
    InvalidData,
}

impl Error {
    /// Build an API error from a status code and raw response body.
    pub fn api(status: reqwest::StatusCode, body: &str) -> Self {
        Self::Api {
            status: status.as_u16(),
            message: crate::util::parse_api_error(status, body),
        }
    }

    /// Classify this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::Realtime(_) => ErrorKind::TransientNetwork,
            Self::Api { status, .. } => {
                if *status >= 500 || *status == 408 || *status == 429 {
                    ErrorKind::TransientNetwork
                } else {
                    ErrorKind::Remote
                }
            }
            Self::Unauthenticated(_) => ErrorKind::AuthFailure,
            Self::Io(_) | Self::Database(_) | Self::LibSql(_) | Self::Storage(_) => {
                ErrorKind::StorageFailure
            }
            Self::NotFound(_) | Self::InvalidInput(_) | Self::Serialization(_) => {
                ErrorKind::InvalidData
            }
        }
    }

    /// Whether the backend reported the target record as missing.
    pub const fn is_remote_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_split_between_transient_and_remote() {
        let unavailable = Error::Api {
            status: 503,
            message: "down".to_string(),
        };
        let rejected = Error::Api {
            status: 400,
            message: "bad".to_string(),
        };
        assert_eq!(unavailable.kind(), ErrorKind::TransientNetwork);
        assert_eq!(rejected.kind(), ErrorKind::Remote);
    }

    #[test]
    fn unauthenticated_is_auth_failure() {
        let error = Error::Unauthenticated("refresh rejected".to_string());
        assert_eq!(error.kind(), ErrorKind::AuthFailure);
    }

    #[test]
    fn io_is_storage_failure() {
        let error = Error::Io(std::io::Error::other("disk full"));
        assert_eq!(error.kind(), ErrorKind::StorageFailure);
    }
}
