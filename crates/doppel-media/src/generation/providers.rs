//! Collaborator seams: person detection and frame synthesis.
//!
//! Both are supplied by the host. Implementations backed by remote models
//! live in the worker crate; tests use in-process fakes.

use doppel_models::PoseKeypoints;
use image::RgbImage;
use thiserror::Error;

use super::controls::ControlSignals;
use crate::frame::{Frame, Mask};

/// What the detector found in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    /// Subject mask; `None` when no person was found
    pub mask: Option<Mask>,
    /// Body keypoints; `None` when pose estimation failed
    pub keypoints: Option<PoseKeypoints>,
}

impl Detection {
    /// No person found.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(mask: Mask, keypoints: Option<PoseKeypoints>) -> Self {
        Self {
            mask: Some(mask),
            keypoints,
        }
    }

    /// True when the detection carries no usable mask.
    pub fn is_miss(&self) -> bool {
        self.mask.as_ref().map_or(true, Mask::is_empty)
    }
}

/// Finds the replaced person in a frame.
///
/// Failures are reported as a miss, never as an error; the caller decides
/// how to carry on without a detection.
#[cfg_attr(test, mockall::automock)]
pub trait PersonDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Detection;
}

/// Errors from the synthesis oracle.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SynthesisError {
    /// The oracle ran out of memory or capacity
    #[error("Synthesis resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Synthesis failed: {0}")]
    Failed(String),

    /// The oracle returned something that is not a usable frame
    #[error("Invalid synthesis output: {0}")]
    InvalidOutput(String),
}

impl SynthesisError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            SynthesisError::ResourceExhausted(_) => "resource_exhausted",
            SynthesisError::Failed(_) => "failed",
            SynthesisError::InvalidOutput(_) => "invalid_output",
        }
    }
}

/// Generates a replacement frame conditioned on control signals.
///
/// Called synchronously, one frame at a time.
#[cfg_attr(test, mockall::automock)]
pub trait FrameSynthesizer: Send + Sync {
    fn synthesize(
        &self,
        frame: &Frame,
        controls: &ControlSignals,
        style: &str,
    ) -> Result<RgbImage, SynthesisError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_miss() {
        assert!(Detection::none().is_miss());
        assert!(Detection::new(Mask::empty(4, 4), None).is_miss());
        let hit = Detection::new(Mask::from_fn(4, 4, |x, _| x < 2), None);
        assert!(!hit.is_miss());
    }

    #[test]
    fn test_error_reasons() {
        assert_eq!(
            SynthesisError::ResourceExhausted("gpu".into()).reason(),
            "resource_exhausted"
        );
        assert_eq!(SynthesisError::Failed("x".into()).reason(), "failed");
    }
}
