//! Dense block-matching optical flow.
//!
//! For every block of the current frame, finds the displacement into the
//! previous frame with the lowest sum of absolute differences. Per-pixel
//! vectors are interpolated bilinearly between block centers.

use image::RgbImage;
use ndarray::Array2;
use rayon::prelude::*;

use super::ops::{clamped, sample_rgb, to_u8};

/// Displacement field from the current frame into the previous frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    /// Horizontal displacement per block
    pub u: Array2<f32>,
    /// Vertical displacement per block
    pub v: Array2<f32>,
    pub block_size: u32,
}

impl FlowField {
    /// Zero flow covering a `width x height` frame.
    pub fn zero(width: u32, height: u32, block_size: u32) -> Self {
        let block = block_size.max(1);
        let rows = height.div_ceil(block).max(1) as usize;
        let cols = width.div_ceil(block).max(1) as usize;
        Self {
            u: Array2::zeros((rows, cols)),
            v: Array2::zeros((rows, cols)),
            block_size: block,
        }
    }

    /// Estimate flow such that `current(p) ≈ previous(p + flow(p))`.
    pub fn estimate(
        current: &Array2<f32>,
        previous: &Array2<f32>,
        block_size: u32,
        search_radius: u32,
    ) -> Self {
        let (h, w) = current.dim();
        let mut field = Self::zero(w as u32, h as u32, block_size);
        if current.dim() != previous.dim() || current.is_empty() {
            return field;
        }
        let block = field.block_size as usize;
        let radius = search_radius as i64;
        let cols = field.u.ncols();

        let vectors: Vec<(f32, f32)> = (0..field.u.len())
            .into_par_iter()
            .map(|i| {
                let (by, bx) = (i / cols, i % cols);
                let (y0, x0) = (by * block, bx * block);
                let (y1, x1) = ((y0 + block).min(h), (x0 + block).min(w));
                let sad = |dx: i64, dy: i64| -> f32 {
                    let mut total = 0.0;
                    for y in y0..y1 {
                        for x in x0..x1 {
                            let p = clamped(previous, x as i64 + dx, y as i64 + dy);
                            total += (current[[y, x]] - p).abs();
                        }
                    }
                    total
                };
                let mut best = (0i64, 0i64);
                let mut best_cost = sad(0, 0);
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let cost = sad(dx, dy);
                        // strictly better, so flat regions keep zero motion
                        if cost < best_cost {
                            best_cost = cost;
                            best = (dx, dy);
                        }
                    }
                }
                (best.0 as f32, best.1 as f32)
            })
            .collect();

        for (i, (du, dv)) in vectors.into_iter().enumerate() {
            let (by, bx) = (i / cols, i % cols);
            field.u[[by, bx]] = du;
            field.v[[by, bx]] = dv;
        }
        field
    }

    /// Displacement at pixel `(x, y)`, interpolated between block centers.
    pub fn displacement_at(&self, x: f64, y: f64) -> (f32, f32) {
        let b = self.block_size as f64;
        let gx = (x + 0.5) / b - 0.5;
        let gy = (y + 0.5) / b - 0.5;
        (
            super::ops::sample_bilinear(&self.u, gx, gy),
            super::ops::sample_bilinear(&self.v, gx, gy),
        )
    }

    /// Mean displacement magnitude over all blocks.
    pub fn mean_magnitude(&self) -> f64 {
        if self.u.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .u
            .iter()
            .zip(self.v.iter())
            .map(|(u, v)| (u.hypot(*v)) as f64)
            .sum();
        sum / self.u.len() as f64
    }

    /// Resample `previous` into the current frame's geometry.
    pub fn warp(&self, previous: &RgbImage) -> RgbImage {
        let (w, h) = previous.dimensions();
        RgbImage::from_fn(w, h, |x, y| {
            let (du, dv) = self.displacement_at(x as f64, y as f64);
            let px = sample_rgb(previous, x as f64 + du as f64, y as f64 + dv as f64);
            image::Rgb([to_u8(px[0]), to_u8(px[1]), to_u8(px[2])])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::ops::luma;
    use image::Rgb;

    fn textured(w: u32, h: u32, shift_x: i64) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let sx = x as i64 - shift_x;
            let v = ((sx * 37 + y as i64 * 91) % 251).unsigned_abs() as u8;
            Rgb([v, v / 2, 255 - v])
        })
    }

    #[test]
    fn test_static_scene_has_zero_flow() {
        let img = textured(32, 32, 0);
        let g = luma(&img);
        let flow = FlowField::estimate(&g, &g, 8, 4);
        assert_eq!(flow.u.dim(), (4, 4));
        assert_eq!(flow.mean_magnitude(), 0.0);
    }

    #[test]
    fn test_detects_horizontal_shift() {
        let prev = textured(48, 48, 0);
        // content moved 3px right: current(p) = previous(p - 3)
        let cur = textured(48, 48, 3);
        let flow = FlowField::estimate(&luma(&cur), &luma(&prev), 8, 5);
        assert_eq!(flow.u[[2, 2]], -3.0);
        assert_eq!(flow.v[[2, 2]], 0.0);

        let warped = flow.warp(&prev);
        assert_eq!(warped.get_pixel(24, 24), cur.get_pixel(24, 24));
    }
}
