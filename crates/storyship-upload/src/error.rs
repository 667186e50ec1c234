//! Error types for storyship-upload

use thiserror::Error;

/// Failures of a single transfer attempt.
///
/// These are retried by the engine; once the retry budget is spent they
/// surface as [`storyship_core::PipelineError::TransferFailed`].
#[derive(Error, Debug)]
pub enum TransferError {
    /// Storage answered with a non-success status
    #[error("storage responded with status {0}")]
    Status(u16),

    /// Connection, TLS or timeout failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// Reading the local file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Writing the archive failed
    #[error("archive error: {0}")]
    Archive(String),
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => TransferError::Status(status.as_u16()),
            None => TransferError::Http(err.to_string()),
        }
    }
}

impl From<zip::result::ZipError> for TransferError {
    fn from(err: zip::result::ZipError) -> Self {
        TransferError::Archive(err.to_string())
    }
}
