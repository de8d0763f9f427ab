//! Download failure taxonomy

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a single download did not complete
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Could not open the connection or the server refused the request
    #[error("connection failed: {0}")]
    Connection(String),

    /// The server did not announce a positive content length
    #[error("content length unknown or not positive")]
    UnknownLength,

    /// Failure while reading the body or writing the file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The download directory is missing or unusable
    #[error("storage unavailable: {0}")]
    Storage(String),

    #[error("download cancelled")]
    Cancelled,
}

/// Failure cause carried on the `failed` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connection,
    UnknownLength,
    Io,
    Storage,
    /// The task stopped without reporting an outcome
    Aborted,
}

impl DownloadError {
    /// Failure kind, `None` for cancellation which is not a failure
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Connection(_) => Some(FailureKind::Connection),
            Self::UnknownLength => Some(FailureKind::UnknownLength),
            Self::Io(_) => Some(FailureKind::Io),
            Self::Storage(_) => Some(FailureKind::Storage),
            Self::Cancelled => None,
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        Self::Connection(err.to_string())
    }
}
