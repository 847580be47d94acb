//! Camera motion tracking.
//!
//! Corners are selected per frame, matched into the next frame by patch
//! search, and a similarity transform is fitted to the matches with RANSAC.

pub mod estimate;
pub mod features;
pub mod magnitude;
pub mod tracker;
pub mod tracking;

pub use magnitude::{moving_average, subject_motion_magnitudes};
pub use tracker::{FrameMotion, MotionTracker};
