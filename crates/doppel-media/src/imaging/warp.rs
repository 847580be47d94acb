//! Affine warping with bilinear sampling and border replication.

use doppel_models::{MotionTransform, Point2};
use image::RgbImage;
use rayon::prelude::*;

use super::ops::{sample_rgb, to_u8};
use crate::error::{MediaError, MediaResult};

/// Warp `image` so that the pixel at input position `p` lands at `forward(p)`.
///
/// Output pixels sample the input at `forward⁻¹(q)`; positions outside the
/// frame replicate the nearest border pixel.
pub fn warp_affine(image: &RgbImage, forward: &MotionTransform) -> MediaResult<RgbImage> {
    let inverse = forward
        .inverse()
        .ok_or_else(|| MediaError::SingularTransform(format!("{:?}", forward.m)))?;
    Ok(remap(image, &inverse))
}

/// Resample `image` where each output pixel `q` reads input position `map(q)`.
pub fn remap(image: &RgbImage, map: &MotionTransform) -> RgbImage {
    let (w, h) = image.dimensions();
    if *map == MotionTransform::identity() {
        return image.clone();
    }
    let stride = w as usize * 3;
    let mut data = vec![0u8; stride * h as usize];
    data.par_chunks_mut(stride.max(1))
        .enumerate()
        .for_each(|(y, row)| {
            for x in 0..w as usize {
                let (sx, sy) = map.apply(x as f64, y as f64);
                let px = sample_rgb(image, sx, sy);
                row[x * 3] = to_u8(px[0]);
                row[x * 3 + 1] = to_u8(px[1]);
                row[x * 3 + 2] = to_u8(px[2]);
            }
        });
    RgbImage::from_raw(w, h, data).unwrap_or_else(|| image.clone())
}

/// Feathered weight for a pixel at `distance` from the center of a region of `radius`.
///
/// Full weight in the inner half, cosine falloff to zero at the edge.
pub fn region_falloff(distance: f64, radius: f64) -> f64 {
    if radius <= 0.0 || distance >= radius {
        return 0.0;
    }
    let t = distance / radius;
    if t <= 0.5 {
        1.0
    } else {
        0.5 * (1.0 + (std::f64::consts::PI * (t - 0.5) / 0.5).cos())
    }
}

/// Warp a circular region of `image` by `forward` and blend it over the original.
///
/// Pixels inside the region mix `strength * falloff` of the warped image with
/// the original; pixels outside are left untouched.
pub fn warp_region(
    image: &RgbImage,
    forward: &MotionTransform,
    center: Point2,
    radius: f64,
    strength: f64,
) -> MediaResult<RgbImage> {
    let inverse = forward
        .inverse()
        .ok_or_else(|| MediaError::SingularTransform(format!("{:?}", forward.m)))?;
    let (w, h) = image.dimensions();
    let mut out = image.clone();
    let x0 = (center.x - radius).floor().max(0.0) as u32;
    let y0 = (center.y - radius).floor().max(0.0) as u32;
    let x1 = ((center.x + radius).ceil().max(0.0) as u32).min(w);
    let y1 = ((center.y + radius).ceil().max(0.0) as u32).min(h);

    for y in y0..y1 {
        for x in x0..x1 {
            let d = (x as f64 - center.x).hypot(y as f64 - center.y);
            let weight = (strength * region_falloff(d, radius)) as f32;
            if weight <= 0.0 {
                continue;
            }
            let (sx, sy) = inverse.apply(x as f64, y as f64);
            let warped = sample_rgb(image, sx, sy);
            let px = out.get_pixel_mut(x, y);
            for c in 0..3 {
                px[c] = to_u8(weight * warped[c] + (1.0 - weight) * px[c] as f32);
            }
        }
    }
    Ok(out)
}
