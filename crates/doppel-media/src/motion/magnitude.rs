//! Subject motion signal used to place segment cuts.

use crate::frame::Frame;
use crate::imaging::ops::{downsampled_luma, mean_abs_diff};

/// Frames are compared at roughly this width.
const SIGNAL_WIDTH: u32 = 64;

/// Per-frame motion magnitude of stabilized frames.
///
/// Camera motion has been removed by stabilization, so the mean absolute
/// luma difference between consecutive frames is dominated by the subject.
/// The first frame repeats the second frame's value.
pub fn subject_motion_magnitudes(frames: &[Frame]) -> Vec<f64> {
    let Some(first) = frames.first() else {
        return Vec::new();
    };
    let factor = (first.width() / SIGNAL_WIDTH).max(1);

    let mut magnitudes = Vec::with_capacity(frames.len());
    let mut previous = downsampled_luma(&first.image, factor);
    magnitudes.push(0.0);
    for frame in &frames[1..] {
        let current = downsampled_luma(&frame.image, factor);
        magnitudes.push(mean_abs_diff(&previous, &current));
        previous = current;
    }
    if magnitudes.len() > 1 {
        magnitudes[0] = magnitudes[1];
    }
    magnitudes
}

/// Centered moving average with a window shrinking at the ends.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    if values.is_empty() || window <= 1 {
        return values.to_vec();
    }
    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            let slice = &values[lo..hi];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}
