//! Feature tracking between consecutive frames by patch matching.

use doppel_models::Point2;
use ndarray::Array2;
use rayon::prelude::*;

use crate::imaging::ops::clamped;

/// Root-mean-square patch error above which a match is discarded.
const MAX_MATCH_RMS: f32 = 24.0;

/// A feature seen in two frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub previous: Point2,
    pub current: Point2,
}

/// Find each `previous` feature in `current` within `search_radius` pixels.
///
/// Matches minimize the sum of squared differences over a
/// `(2 * patch_radius + 1)²` patch and are refined to subpixel precision
/// with a parabola through the neighboring costs.
pub fn track_features(
    previous: &Array2<f32>,
    current: &Array2<f32>,
    features: &[Point2],
    patch_radius: u32,
    search_radius: u32,
) -> Vec<Correspondence> {
    if previous.dim() != current.dim() {
        return Vec::new();
    }
    let pr = patch_radius as i64;
    let sr = search_radius as i64;
    let patch_len = ((2 * pr + 1) * (2 * pr + 1)) as f32;

    features
        .par_iter()
        .filter_map(|feature| {
            let (fx, fy) = (feature.x.round() as i64, feature.y.round() as i64);
            let ssd = |dx: i64, dy: i64| -> f32 {
                let mut total = 0.0;
                for py in -pr..=pr {
                    for px in -pr..=pr {
                        let a = clamped(previous, fx + px, fy + py);
                        let b = clamped(current, fx + px + dx, fy + py + dy);
                        total += (a - b) * (a - b);
                    }
                }
                total
            };

            let side = (2 * sr + 1) as usize;
            let mut costs = vec![0.0f32; side * side];
            let mut best = (0i64, 0i64, f32::INFINITY);
            for dy in -sr..=sr {
                for dx in -sr..=sr {
                    let cost = ssd(dx, dy);
                    costs[((dy + sr) as usize) * side + (dx + sr) as usize] = cost;
                    let better = cost < best.2
                        || (cost == best.2 && dx.abs() + dy.abs() < best.0.abs() + best.1.abs());
                    if better {
                        best = (dx, dy, cost);
                    }
                }
            }

            let (bx, by, best_cost) = best;
            if (best_cost / patch_len).sqrt() > MAX_MATCH_RMS {
                return None;
            }

            let at = |dx: i64, dy: i64| -> Option<f32> {
                if dx.abs() > sr || dy.abs() > sr {
                    return None;
                }
                Some(costs[((dy + sr) as usize) * side + (dx + sr) as usize])
            };
            let refine = |minus: Option<f32>, center: f32, plus: Option<f32>| -> f64 {
                match (minus, plus) {
                    (Some(m), Some(p)) => {
                        let denom = m - 2.0 * center + p;
                        if denom > f32::EPSILON {
                            ((m - p) / (2.0 * denom)).clamp(-0.5, 0.5) as f64
                        } else {
                            0.0
                        }
                    }
                    _ => 0.0,
                }
            };
            // an exact match needs no refinement
            let (sub_x, sub_y) = if best_cost <= f32::EPSILON {
                (0.0, 0.0)
            } else {
                (
                    refine(at(bx - 1, by), best_cost, at(bx + 1, by)),
                    refine(at(bx, by - 1), best_cost, at(bx, by + 1)),
                )
            };

            Some(Correspondence {
                previous: Point2::new(fx as f64, fy as f64),
                current: Point2::new(
                    (fx + bx) as f64 + sub_x,
                    (fy + by) as f64 + sub_y,
                ),
            })
        })
        .collect()
}
