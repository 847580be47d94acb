//! Corner feature selection (minimum eigenvalue of the structure tensor).

use doppel_models::Point2;
use ndarray::Array2;

use crate::imaging::sobel;

/// Window radius for summing the structure tensor.
const TENSOR_RADIUS: usize = 2;

/// Select up to `max_features` well-separated corners.
///
/// Corners weaker than `quality` times the strongest response are dropped,
/// as are corners within `border` pixels of the frame edge.
pub fn detect_corners(
    gray: &Array2<f32>,
    max_features: usize,
    quality: f64,
    min_distance: u32,
    border: u32,
) -> Vec<Point2> {
    let (h, w) = gray.dim();
    let border = border as usize;
    if max_features == 0 || w <= 2 * border + 2 || h <= 2 * border + 2 {
        return Vec::new();
    }

    let (gx, gy) = sobel(gray);
    let sxx = box_sum(&(&gx * &gx), TENSOR_RADIUS);
    let syy = box_sum(&(&gy * &gy), TENSOR_RADIUS);
    let sxy = box_sum(&(&gx * &gy), TENSOR_RADIUS);

    let response = Array2::from_shape_fn((h, w), |(y, x)| {
        let a = sxx[[y, x]];
        let c = syy[[y, x]];
        let b = sxy[[y, x]];
        let half_trace = (a + c) * 0.5;
        let root = (((a - c) * 0.5).powi(2) + b * b).sqrt();
        half_trace - root
    });

    let max_response = response.iter().cloned().fold(0.0f32, f32::max);
    if max_response <= 0.0 {
        return Vec::new();
    }
    let floor = (quality.max(0.0) as f32) * max_response;

    let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
    for y in border.max(1)..h - border.max(1) {
        for x in border.max(1)..w - border.max(1) {
            let r = response[[y, x]];
            if r <= floor || r <= 0.0 {
                continue;
            }
            let is_peak = (-1i64..=1).all(|dy| {
                (-1i64..=1).all(|dx| {
                    let ny = (y as i64 + dy) as usize;
                    let nx = (x as i64 + dx) as usize;
                    (dx == 0 && dy == 0) || response[[ny, nx]] <= r
                })
            });
            if is_peak {
                candidates.push((r, x, y));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    let min_d2 = (min_distance as f64).powi(2);
    let mut selected: Vec<Point2> = Vec::new();
    for (_, x, y) in candidates {
        let p = Point2::new(x as f64, y as f64);
        let far_enough = selected.iter().all(|q| {
            let dx = q.x - p.x;
            let dy = q.y - p.y;
            dx * dx + dy * dy >= min_d2
        });
        if far_enough {
            selected.push(p);
            if selected.len() >= max_features {
                break;
            }
        }
    }
    selected
}

/// Sum over a `(2r+1) x (2r+1)` window, truncated at the borders.
fn box_sum(arr: &Array2<f32>, r: usize) -> Array2<f32> {
    let (h, w) = arr.dim();
    let horizontal = Array2::from_shape_fn((h, w), |(y, x)| {
        let lo = x.saturating_sub(r);
        let hi = (x + r).min(w - 1);
        (lo..=hi).map(|xx| arr[[y, xx]]).sum::<f32>()
    });
    Array2::from_shape_fn((h, w), |(y, x)| {
        let lo = y.saturating_sub(r);
        let hi = (y + r).min(h - 1);
        (lo..=hi).map(|yy| horizontal[[yy, x]]).sum::<f32>()
    })
}
