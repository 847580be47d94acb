//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use doppel_models::ModelError;

use crate::generation::SynthesisError;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Segment {segment} cancelled at frame {frame}")]
    SegmentCancelled { segment: usize, frame: usize },

    #[error("Segment {segment} failed at frame {frame}: {source}")]
    SegmentFailed {
        segment: usize,
        frame: usize,
        #[source]
        source: SynthesisError,
    },

    #[error("Malformed segment plan: {0}")]
    MalformedSegments(String),

    #[error("Frame count mismatch: expected {expected}, got {actual}")]
    FrameCountMismatch { expected: usize, actual: usize },

    #[error("Singular transform: {0}")]
    SingularTransform(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Wrap an oracle failure with the segment and frame it happened at.
    pub fn segment_failed(segment: usize, frame: usize, source: SynthesisError) -> Self {
        Self::SegmentFailed {
            segment,
            frame,
            source,
        }
    }

    /// Create a malformed segment plan error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedSegments(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Errors confined to one segment. The rest of the run can continue.
    pub fn is_segment_fatal(&self) -> bool {
        matches!(
            self,
            MediaError::SegmentFailed { .. } | MediaError::SegmentCancelled { .. }
        )
    }

    /// Errors that mean the frame bookkeeping itself is wrong and nothing may be encoded.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            MediaError::MalformedSegments(_) | MediaError::FrameCountMismatch { .. }
        )
    }

    /// Segment and frame at which a segment-fatal error happened.
    pub fn failure_location(&self) -> Option<(usize, usize)> {
        match self {
            MediaError::SegmentFailed { segment, frame, .. }
            | MediaError::SegmentCancelled { segment, frame } => Some((*segment, *frame)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = MediaError::segment_failed(1, 71, SynthesisError::ResourceExhausted("oom".into()));
        assert!(err.is_segment_fatal());
        assert!(!err.is_structural());
        assert_eq!(err.failure_location(), Some((1, 71)));
        assert!(err.to_string().contains("Segment 1 failed at frame 71"));

        let err = MediaError::FrameCountMismatch {
            expected: 150,
            actual: 149,
        };
        assert!(err.is_structural());
        assert!(!err.is_segment_fatal());
        assert_eq!(err.failure_location(), None);
    }
}
