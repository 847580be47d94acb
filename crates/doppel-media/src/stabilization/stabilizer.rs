//! Camera path smoothing and frame stabilization.

use std::path::Path;

use doppel_models::{MotionRecord, MotionTransform, SmoothingMode, StabilizationConfig};
use tracing::{info, warn};

use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::imaging::warp_affine;
use crate::metrics;
use crate::motion::{FrameMotion, MotionTracker};

/// Stabilized frames plus the per-frame motion needed to undo stabilization.
#[derive(Debug, Clone)]
pub struct Stabilization {
    pub frames: Vec<Frame>,
    pub records: Vec<MotionRecord>,
}

impl Stabilization {
    /// Per-frame transforms that restore the original camera motion.
    pub fn inverse_transforms(&self) -> Vec<MotionTransform> {
        self.records.iter().map(|r| r.inverse).collect()
    }

    pub fn degraded_frames(&self) -> usize {
        self.records.iter().filter(|r| r.degraded).count()
    }
}

/// Removes camera shake by warping each frame onto a smoothed camera path.
#[derive(Debug, Clone)]
pub struct Stabilizer {
    config: StabilizationConfig,
    tracker: MotionTracker,
}

impl Stabilizer {
    pub fn new(config: StabilizationConfig) -> Self {
        Self {
            tracker: MotionTracker::new(config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &StabilizationConfig {
        &self.config
    }

    /// Estimate camera motion, smooth it and warp every frame.
    ///
    /// Output frames keep the input's count, order, indices and timestamps.
    pub fn stabilize(&self, frames: &[Frame]) -> MediaResult<Stabilization> {
        if frames.is_empty() {
            return Ok(Stabilization {
                frames: Vec::new(),
                records: Vec::new(),
            });
        }

        let motions = self.tracker.compute_motion(frames);
        let mut records = self.smooth_path(&motions);
        for (record, frame) in records.iter_mut().zip(frames) {
            record.frame_index = frame.index;
        }

        let stabilized = Self::apply(frames, &records)?;
        let degraded = records.iter().filter(|r| r.degraded).count();
        info!(
            frames = frames.len(),
            degraded,
            window = self.config.smoothing_window,
            "Stabilized frames"
        );
        metrics::record_stabilized_frames(frames.len());

        Ok(Stabilization {
            frames: stabilized,
            records,
        })
    }

    /// Turn inter-frame motion into cumulative, smoothed and compensating
    /// transforms. Record `i` gets `frame_index = i`.
    pub fn smooth_path(&self, motions: &[FrameMotion]) -> Vec<MotionRecord> {
        let n = motions.len();
        let mut cumulative = Vec::with_capacity(n);
        let mut acc = MotionTransform::identity();
        for (i, motion) in motions.iter().enumerate() {
            if i > 0 {
                acc = acc.compose(&motion.transform);
            }
            cumulative.push(acc);
        }

        let window = self.config.smoothing_window.max(1);
        (0..n)
            .map(|i| {
                let (lo, hi) = match self.config.smoothing_mode {
                    SmoothingMode::Centered => {
                        (i.saturating_sub(window / 2), (i + window - window / 2).min(n))
                    }
                    SmoothingMode::Trailing => ((i + 1).saturating_sub(window), i + 1),
                };
                let smoothed = MotionTransform::average(&cumulative[lo..hi]);
                let mut degraded = motions[i].degraded;

                let compensating = match smoothed.inverse() {
                    Some(inv) => inv.compose(&cumulative[i]),
                    None => {
                        warn!(frame = i, "Smoothed camera path is singular, leaving frame unwarped");
                        degraded = true;
                        MotionTransform::identity()
                    }
                };
                let (compensating, inverse) = match compensating.inverse() {
                    Some(inverse) => (compensating, inverse),
                    None => {
                        warn!(frame = i, "Compensating transform is singular, leaving frame unwarped");
                        degraded = true;
                        (MotionTransform::identity(), MotionTransform::identity())
                    }
                };

                MotionRecord {
                    frame_index: i,
                    inter_frame: motions[i].transform,
                    cumulative: cumulative[i],
                    smoothed,
                    compensating,
                    inverse,
                    tracked_points: motions[i].tracked_points,
                    degraded,
                }
            })
            .collect()
    }

    /// Warp frames with previously computed records (used when resuming).
    pub fn apply(frames: &[Frame], records: &[MotionRecord]) -> MediaResult<Vec<Frame>> {
        if frames.len() != records.len() {
            return Err(MediaError::FrameCountMismatch {
                expected: records.len(),
                actual: frames.len(),
            });
        }
        frames
            .iter()
            .zip(records)
            .map(|(frame, record)| {
                Ok(frame.with_image(warp_affine(&frame.image, &record.compensating)?))
            })
            .collect()
    }
}

/// Write motion records as pretty JSON.
pub fn save_motion_records(path: impl AsRef<Path>, records: &[MotionRecord]) -> MediaResult<()> {
    let json = serde_json::to_vec_pretty(records)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Read motion records written by [`save_motion_records`].
pub fn load_motion_records(path: impl AsRef<Path>) -> MediaResult<Vec<MotionRecord>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
