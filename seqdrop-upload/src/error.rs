use thiserror::Error;

use crate::session::SessionState;

pub type Result<T> = std::result::Result<T, UploadError>;

/// Failures talking to the ingestion service's control plane.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Failures moving bytes into object storage.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage request failed: {0}")]
    Request(String),

    #[error("storage response is missing {0}")]
    Protocol(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer cancelled")]
    Cancelled,
}

/// Terminal failure of one upload attempt.
///
/// The `Display` text is meant to be shown to the user as is. A transfer
/// failure means nothing was stored; a confirmation failure means the bytes
/// are stored but the service was never told about them.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("could not initiate upload with service")]
    ParameterAcquisition(#[source] ServiceError),

    #[error("upload has failed; contact support if this persists")]
    Transfer(#[source] StorageError),

    #[error("upload confirmation has failed; contact support if this persists")]
    Confirmation(#[source] ServiceError),

    #[error("upload was cancelled")]
    Cancelled,
}

impl UploadError {
    /// State the session ends in after this failure.
    pub fn terminal_state(&self) -> SessionState {
        match self {
            UploadError::Confirmation(_) => SessionState::ConfirmFailed,
            UploadError::ParameterAcquisition(_)
            | UploadError::Transfer(_)
            | UploadError::Cancelled => SessionState::Failed,
        }
    }
}

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Cancelled => UploadError::Cancelled,
            other => UploadError::Transfer(other),
        }
    }
}
