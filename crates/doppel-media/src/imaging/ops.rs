//! Pixel-level helpers shared by the pipeline stages.

use image::RgbImage;
use ndarray::Array2;

use crate::error::{MediaError, MediaResult};

/// BT.601 luma of an RGB image as a `(height, width)` array.
pub fn luma(image: &RgbImage) -> Array2<f32> {
    let (w, h) = image.dimensions();
    let raw = image.as_raw();
    Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
        let i = (y * w as usize + x) * 3;
        0.299 * raw[i] as f32 + 0.587 * raw[i + 1] as f32 + 0.114 * raw[i + 2] as f32
    })
}

/// Luma averaged over `factor x factor` blocks.
pub fn downsampled_luma(image: &RgbImage, factor: u32) -> Array2<f32> {
    let full = luma(image);
    let factor = factor.max(1) as usize;
    if factor == 1 {
        return full;
    }
    let (h, w) = full.dim();
    let (oh, ow) = ((h / factor).max(1), (w / factor).max(1));
    Array2::from_shape_fn((oh, ow), |(y, x)| {
        let mut sum = 0.0;
        let mut n = 0.0;
        for yy in y * factor..((y + 1) * factor).min(h) {
            for xx in x * factor..((x + 1) * factor).min(w) {
                sum += full[[yy, xx]];
                n += 1.0;
            }
        }
        if n > 0.0 {
            sum / n
        } else {
            0.0
        }
    })
}

/// Pixel of a 2D array with coordinates clamped to the border.
#[inline]
pub fn clamped(arr: &Array2<f32>, x: i64, y: i64) -> f32 {
    let (h, w) = arr.dim();
    let cx = x.clamp(0, w as i64 - 1) as usize;
    let cy = y.clamp(0, h as i64 - 1) as usize;
    arr[[cy, cx]]
}

/// Bilinear sample of a 2D array with border replication.
pub fn sample_bilinear(arr: &Array2<f32>, x: f64, y: f64) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = (x - x0) as f32;
    let fy = (y - y0) as f32;
    let (xi, yi) = (x0 as i64, y0 as i64);
    let top = clamped(arr, xi, yi) * (1.0 - fx) + clamped(arr, xi + 1, yi) * fx;
    let bottom = clamped(arr, xi, yi + 1) * (1.0 - fx) + clamped(arr, xi + 1, yi + 1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Bilinear sample of an RGB image with border replication.
pub fn sample_rgb(image: &RgbImage, x: f64, y: f64) -> [f32; 3] {
    let (w, h) = image.dimensions();
    let raw = image.as_raw();
    let max_x = w as i64 - 1;
    let max_y = h as i64 - 1;
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = (x - x0) as f32;
    let fy = (y - y0) as f32;
    let xa = (x0 as i64).clamp(0, max_x) as usize;
    let xb = (x0 as i64 + 1).clamp(0, max_x) as usize;
    let ya = (y0 as i64).clamp(0, max_y) as usize;
    let yb = (y0 as i64 + 1).clamp(0, max_y) as usize;
    let stride = w as usize * 3;

    let mut out = [0.0f32; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let p00 = raw[ya * stride + xa * 3 + c] as f32;
        let p10 = raw[ya * stride + xb * 3 + c] as f32;
        let p01 = raw[yb * stride + xa * 3 + c] as f32;
        let p11 = raw[yb * stride + xb * 3 + c] as f32;
        let top = p00 * (1.0 - fx) + p10 * fx;
        let bottom = p01 * (1.0 - fx) + p11 * fx;
        *value = top * (1.0 - fy) + bottom * fy;
    }
    out
}

#[inline]
pub fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// `weight * a + (1 - weight) * b`, per pixel.
pub fn blend(a: &RgbImage, b: &RgbImage, weight: f32) -> MediaResult<RgbImage> {
    if a.dimensions() != b.dimensions() {
        return Err(MediaError::internal(format!(
            "cannot blend {:?} with {:?}",
            a.dimensions(),
            b.dimensions()
        )));
    }
    let (w, h) = a.dimensions();
    let data: Vec<u8> = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&pa, &pb)| to_u8(weight * pa as f32 + (1.0 - weight) * pb as f32))
        .collect();
    RgbImage::from_raw(w, h, data).ok_or_else(|| MediaError::internal("blend buffer size"))
}

/// Mean absolute difference between two equally sized arrays.
pub fn mean_abs_diff(a: &Array2<f32>, b: &Array2<f32>) -> f64 {
    if a.dim() != b.dim() || a.is_empty() {
        return 0.0;
    }
    let sum: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs() as f64)
        .sum();
    sum / a.len() as f64
}

/// Sobel gradients `(gx, gy)` with border replication.
pub fn sobel(gray: &Array2<f32>) -> (Array2<f32>, Array2<f32>) {
    let (h, w) = gray.dim();
    let gx = Array2::from_shape_fn((h, w), |(y, x)| {
        let (x, y) = (x as i64, y as i64);
        (clamped(gray, x + 1, y - 1) + 2.0 * clamped(gray, x + 1, y) + clamped(gray, x + 1, y + 1))
            - (clamped(gray, x - 1, y - 1)
                + 2.0 * clamped(gray, x - 1, y)
                + clamped(gray, x - 1, y + 1))
    });
    let gy = Array2::from_shape_fn((h, w), |(y, x)| {
        let (x, y) = (x as i64, y as i64);
        (clamped(gray, x - 1, y + 1) + 2.0 * clamped(gray, x, y + 1) + clamped(gray, x + 1, y + 1))
            - (clamped(gray, x - 1, y - 1)
                + 2.0 * clamped(gray, x, y - 1)
                + clamped(gray, x + 1, y - 1))
    });
    (gx, gy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_luma_weights() {
        let img = RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]));
        let l = luma(&img);
        assert_eq!(l.dim(), (2, 2));
        assert!((l[[0, 0]] - 76.245).abs() < 1e-3);
    }

    #[test]
    fn test_sample_bilinear_midpoint_and_border() {
        let arr = Array2::from_shape_vec((1, 2), vec![0.0, 10.0]).unwrap();
        assert!((sample_bilinear(&arr, 0.5, 0.0) - 5.0).abs() < 1e-6);
        // replicate beyond the edges
        assert!((sample_bilinear(&arr, -3.0, 0.0) - 0.0).abs() < 1e-6);
        assert!((sample_bilinear(&arr, 7.0, 4.0) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_blend_weights() {
        let a = RgbImage::from_pixel(3, 3, Rgb([200, 100, 0]));
        let b = RgbImage::from_pixel(3, 3, Rgb([0, 0, 100]));
        let out = blend(&a, &b, 0.7).unwrap();
        assert_eq!(out.get_pixel(1, 1), &Rgb([140, 70, 30]));
        assert!(blend(&a, &RgbImage::new(2, 2), 0.5).is_err());
    }

    #[test]
    fn test_sobel_detects_vertical_edge() {
        let gray = Array2::from_shape_fn((5, 6), |(_, x)| if x < 3 { 0.0 } else { 100.0 });
        let (gx, gy) = sobel(&gray);
        assert!(gx[[2, 2]] > 0.0 && gx[[2, 3]] > 0.0);
        assert_eq!(gx[[2, 0]], 0.0);
        assert!(gy.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_downsampled_luma_dims() {
        let img = RgbImage::from_pixel(64, 32, Rgb([10, 10, 10]));
        let small = downsampled_luma(&img, 8);
        assert_eq!(small.dim(), (4, 8));
        assert!((small[[1, 1]] - 10.0).abs() < 1e-3);
    }
}
