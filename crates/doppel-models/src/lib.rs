//! Shared data models for the doppel replacement pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Camera motion transforms and per-frame motion records
//! - Temporal segments and segmentation plans
//! - Pose keypoints and foot contact records
//! - Run manifests used for persistence and resume
//! - Pipeline configuration with validation

pub mod config;
pub mod contact;
pub mod error;
pub mod pose;
pub mod run;
pub mod segment;
pub mod transform;

// Re-export common types
pub use config::{
    BackgroundConfig, BackgroundMode, ConsistencyConfig, FootLockConfig, ReplacementConfig,
    SegmentationConfig, SmoothingMode, StabilizationConfig,
};
pub use contact::{ContactPhase, ContactRecord, ContactState};
pub use error::{ModelError, ModelResult};
pub use pose::{JointId, Keypoint, Point2, PoseKeypoints, SKELETON_CONNECTIONS};
pub use run::{RunId, RunManifest, SegmentRunState, SegmentStatus};
pub use segment::{CutPoint, CutStrategy, Segment, SegmentPlan};
pub use transform::{MotionRecord, MotionTransform};
