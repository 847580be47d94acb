#![deny(unreachable_patterns)]
//! Frame processing core for subject replacement.
//!
//! This crate provides:
//! - FFmpeg decode/encode of raw RGB frame sequences
//! - Camera motion tracking, stabilization and re-shake
//! - Motion-aware segmentation with overlap blending
//! - Background plate reconstruction
//! - Per-segment generation with temporal consistency and compositing
//! - Foot contact locking
//! - The end-to-end replacement pipeline

pub mod background;
pub mod cancel;
pub mod codec;
pub mod error;
pub mod foot_lock;
pub mod frame;
pub mod generation;
pub mod imaging;
pub mod metrics;
pub mod motion;
pub mod pipeline;
pub mod segmentation;
pub mod stabilization;

#[cfg(test)]
mod test_support;

pub use background::{BackgroundPlate, BackgroundReconstructor};
pub use cancel::CancellationFlag;
pub use codec::{decode_frames, encode_frames, probe_video, EncodeSettings, VideoInfo};
pub use error::{MediaError, MediaResult};
pub use foot_lock::{FootLockResult, FootLocker};
pub use frame::{Frame, Mask};
pub use generation::{
    Detection, FrameSynthesizer, PersonDetector, SegmentOutput, SegmentProcessor, SegmentStats,
    SynthesisError,
};
pub use motion::{subject_motion_magnitudes, MotionTracker};
pub use pipeline::{
    NoopObserver, PipelineObserver, PipelineReport, ReplacementPipeline, ResumeState,
    SegmentOutcome,
};
pub use segmentation::{validate_segments, OverlapBlender, Segmenter};
pub use stabilization::{Stabilization, Stabilizer};
