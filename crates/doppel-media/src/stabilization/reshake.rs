//! Restoring the original camera motion after generation.

use std::collections::BTreeMap;

use doppel_models::{MotionRecord, MotionTransform};
use tracing::debug;

use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::imaging::warp_affine;

/// Warp each frame by its own inverse stabilization transform.
///
/// Frames are matched to records by frame index, so every frame is
/// re-shaken exactly once with the transform computed for it.
pub fn apply(frames: Vec<Frame>, records: &[MotionRecord]) -> MediaResult<Vec<Frame>> {
    if frames.len() != records.len() {
        return Err(MediaError::FrameCountMismatch {
            expected: records.len(),
            actual: frames.len(),
        });
    }
    let inverses: BTreeMap<usize, &MotionTransform> =
        records.iter().map(|r| (r.frame_index, &r.inverse)).collect();

    let mut out = Vec::with_capacity(frames.len());
    for frame in frames {
        let inverse = inverses.get(&frame.index).ok_or_else(|| {
            MediaError::internal(format!("no motion record for frame {}", frame.index))
        })?;
        out.push(frame.with_image(warp_affine(&frame.image, inverse)?));
    }
    debug!(frames = out.len(), "Restored camera motion");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stabilization::Stabilizer;
    use crate::test_support::{mean_abs_error_interior, scene};
    use doppel_models::{SmoothingMode, StabilizationConfig};

    fn record(frame_index: usize, tx: f64) -> MotionRecord {
        let compensating = MotionTransform::translation(tx, 0.0);
        MotionRecord {
            compensating,
            inverse: compensating.inverse().unwrap(),
            ..MotionRecord::identity(frame_index)
        }
    }

    #[test]
    fn test_each_frame_uses_its_own_transform() {
        let base = scene(40, 30, 0.0, 0.0);
        let frames = vec![
            Frame::new(10, 0.4, base.clone()),
            Frame::new(11, 0.44, base.clone()),
        ];
        // records deliberately listed out of order
        let records = vec![record(11, -3.0), record(10, 2.0)];
        let out = apply(frames, &records).unwrap();

        // frame 10: inverse of +2 shifts content left by 2
        assert_eq!(out[0].image.get_pixel(10, 10), base.get_pixel(12, 10));
        // frame 11: inverse of -3 shifts content right by 3
        assert_eq!(out[1].image.get_pixel(10, 10), base.get_pixel(7, 10));
        assert_eq!(out[0].index, 10);
        assert_eq!(out[1].index, 11);
    }

    #[test]
    fn test_count_mismatch_is_rejected() {
        let frames = vec![Frame::new(0, 0.0, scene(8, 8, 0.0, 0.0))];
        assert!(matches!(
            apply(frames, &[]),
            Err(MediaError::FrameCountMismatch { expected: 0, actual: 1 })
        ));
    }

    #[test]
    fn test_stabilize_then_reshake_round_trip() {
        let offsets = [0.0, 2.0, -3.0, 5.0, 1.0, -2.0, 3.0, 0.0, -4.0, 2.0];
        let frames: Vec<Frame> = offsets
            .iter()
            .enumerate()
            .map(|(i, &ox)| Frame::new(i, i as f64 / 30.0, scene(128, 96, ox, ox * 0.5)))
            .collect();
        let stabilizer = Stabilizer::new(StabilizationConfig {
            smoothing_window: 5,
            smoothing_mode: SmoothingMode::Centered,
            feature_min_distance: 8,
            min_tracked_points: 6,
            search_radius: 8,
            ..Default::default()
        });
        let stabilized = stabilizer.stabilize(&frames).unwrap();
        let restored = apply(stabilized.frames.clone(), &stabilized.records).unwrap();

        assert_eq!(restored.len(), frames.len());
        for (orig, back) in frames.iter().zip(&restored) {
            let err = mean_abs_error_interior(&orig.image, &back.image, 12);
            assert!(err < 4.0, "frame {} error {}", orig.index, err);
        }
    }
}
