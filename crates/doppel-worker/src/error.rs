//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Run failed: {0}")]
    RunFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Artifact error: {0}")]
    ArtifactError(String),

    #[error("Service request failed: {0}")]
    ServiceFailed(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Media error: {0}")]
    Media(#[from] doppel_media::MediaError),

    #[error("Model error: {0}")]
    Model(#[from] doppel_models::ModelError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn run_failed(msg: impl Into<String>) -> Self {
        Self::RunFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn artifact_error(msg: impl Into<String>) -> Self {
        Self::ArtifactError(msg.into())
    }

    pub fn service_failed(msg: impl Into<String>) -> Self {
        Self::ServiceFailed(msg.into())
    }

    /// Whether running the same job again may succeed.
    ///
    /// Incomplete runs leave their artifacts behind, so a retry resumes
    /// instead of starting over.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::RunFailed(_) | WorkerError::ServiceFailed(_) | WorkerError::Http(_) => true,
            WorkerError::Media(e) => e.is_segment_fatal() || matches!(e, doppel_media::MediaError::Timeout(_)),
            _ => false,
        }
    }
}
