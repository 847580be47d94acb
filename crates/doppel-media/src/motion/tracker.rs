//! Inter-frame camera motion estimation.

use doppel_models::{MotionTransform, Point2, StabilizationConfig};
use ndarray::Array2;
use tracing::{debug, warn};

use super::estimate::estimate_similarity;
use super::features::detect_corners;
use super::tracking::track_features;
use crate::frame::Frame;
use crate::imaging::luma;
use crate::metrics;

/// Estimated motion between a frame and its predecessor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMotion {
    /// Maps the frame's coordinates into the previous frame's coordinates
    pub transform: MotionTransform,
    /// Features matched between the two frames
    pub tracked_points: usize,
    /// Matches consistent with `transform`
    pub inliers: usize,
    /// True when identity was assumed for lack of reliable features
    pub degraded: bool,
}

impl FrameMotion {
    pub fn identity() -> Self {
        Self {
            transform: MotionTransform::identity(),
            tracked_points: 0,
            inliers: 0,
            degraded: false,
        }
    }

    fn degraded(tracked_points: usize) -> Self {
        Self {
            transform: MotionTransform::identity(),
            tracked_points,
            inliers: 0,
            degraded: true,
        }
    }
}

/// Tracks corner features between consecutive frames and fits a similarity
/// transform per frame pair.
#[derive(Debug, Clone)]
pub struct MotionTracker {
    config: StabilizationConfig,
}

impl MotionTracker {
    pub fn new(config: StabilizationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StabilizationConfig {
        &self.config
    }

    /// One [`FrameMotion`] per frame; the first frame is always identity.
    ///
    /// Only two luma planes are held at a time.
    pub fn compute_motion(&self, frames: &[Frame]) -> Vec<FrameMotion> {
        let mut motions = Vec::with_capacity(frames.len());
        let mut previous: Option<Array2<f32>> = None;
        for frame in frames {
            let gray = luma(&frame.image);
            let motion = match &previous {
                None => FrameMotion::identity(),
                Some(prev) => self.estimate_pair(prev, &gray, frame.index),
            };
            if motion.degraded {
                metrics::record_degraded_motion();
            }
            motions.push(motion);
            previous = Some(gray);
        }
        motions
    }

    /// Motion mapping `current` coordinates into `previous` coordinates.
    pub fn estimate_pair(
        &self,
        previous: &Array2<f32>,
        current: &Array2<f32>,
        frame_index: usize,
    ) -> FrameMotion {
        let cfg = &self.config;
        let border = cfg.patch_radius + 1;
        let features = detect_corners(
            previous,
            cfg.max_features,
            cfg.feature_quality,
            cfg.feature_min_distance,
            border,
        );
        let matches = track_features(
            previous,
            current,
            &features,
            cfg.patch_radius,
            cfg.search_radius,
        );

        if matches.len() < cfg.min_tracked_points {
            warn!(
                frame = frame_index,
                features = features.len(),
                tracked = matches.len(),
                "Too few tracked features, assuming no camera motion"
            );
            return FrameMotion::degraded(matches.len());
        }

        let src: Vec<Point2> = matches.iter().map(|m| m.current).collect();
        let dst: Vec<Point2> = matches.iter().map(|m| m.previous).collect();
        let fit = estimate_similarity(
            &src,
            &dst,
            cfg.ransac_iterations,
            cfg.ransac_threshold,
            frame_index as u64,
        );

        match fit {
            Some(fit) if fit.inliers >= cfg.min_tracked_points => {
                debug!(
                    frame = frame_index,
                    tracked = matches.len(),
                    inliers = fit.inliers,
                    "Estimated inter-frame motion"
                );
                FrameMotion {
                    transform: fit.transform,
                    tracked_points: matches.len(),
                    inliers: fit.inliers,
                    degraded: false,
                }
            }
            _ => {
                warn!(
                    frame = frame_index,
                    tracked = matches.len(),
                    "No consistent camera motion found, assuming identity"
                );
                FrameMotion::degraded(matches.len())
            }
        }
    }
}
