//! Filling masked regions of a frame from their surroundings.

use std::collections::VecDeque;

use image::{Rgb, RgbImage};
use thiserror::Error;

use crate::frame::Mask;
use crate::imaging::ops::to_u8;

/// Upper bound on onion-peel passes before giving up on a region.
pub const MAX_PASSES: usize = 256;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum InpaintError {
    #[error("Mask covers the whole frame, nothing to fill from")]
    NoSupport,

    #[error("Mask is {mask:?} but frame is {frame:?}")]
    SizeMismatch { mask: (u32, u32), frame: (u32, u32) },

    #[error("Fill stopped with {remaining} pixels left")]
    Incomplete { remaining: usize },
}

fn check(image: &RgbImage, mask: &Mask) -> Result<(), InpaintError> {
    if image.dimensions() != mask.dimensions() {
        return Err(InpaintError::SizeMismatch {
            mask: mask.dimensions(),
            frame: image.dimensions(),
        });
    }
    Ok(())
}

/// Onion-peel fill of the masked pixels.
///
/// Each pass fills the unknown pixels that have known pixels within
/// `radius`, using inverse squared distance weights. Known pixels from the
/// same or an adjacent peel level weigh more, which carries structure
/// inward along the boundary instead of smearing across it.
pub fn inpaint(image: &RgbImage, mask: &Mask, radius: u32) -> Result<RgbImage, InpaintError> {
    check(image, mask)?;
    let (w, h) = image.dimensions();
    let r = radius.max(1) as i64;

    // 0 = original, n = filled in pass n, None = unknown
    let mut level: Vec<Option<usize>> = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .map(|(x, y)| (!mask.is_subject(x, y)).then_some(0))
        .collect();
    let mut pending: Vec<(u32, u32)> = (0..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .filter(|&(x, y)| mask.is_subject(x, y))
        .collect();
    if pending.is_empty() {
        return Ok(image.clone());
    }
    if pending.len() == (w * h) as usize {
        return Err(InpaintError::NoSupport);
    }

    let mut out = image.clone();
    let idx = |x: i64, y: i64| (y * w as i64 + x) as usize;

    for pass in 1..=MAX_PASSES {
        let mut filled = Vec::new();
        pending.retain(|&(x, y)| {
            let (x, y) = (x as i64, y as i64);
            let mut acc = [0.0f32; 3];
            let mut total = 0.0f32;
            let mut nearest_level = usize::MAX;
            let mut neighbors = Vec::new();
            for ny in (y - r).max(0)..=(y + r).min(h as i64 - 1) {
                for nx in (x - r).max(0)..=(x + r).min(w as i64 - 1) {
                    if let Some(l) = level[idx(nx, ny)] {
                        let d2 = ((nx - x).pow(2) + (ny - y).pow(2)) as f32;
                        if d2 > (r * r) as f32 {
                            continue;
                        }
                        nearest_level = nearest_level.min(l);
                        neighbors.push((nx, ny, l, d2));
                    }
                }
            }
            if neighbors.is_empty() {
                return true;
            }
            for (nx, ny, l, d2) in neighbors {
                let structure = 1.0 / (1.0 + (l - nearest_level) as f32);
                let weight = structure / d2;
                let px = out.get_pixel(nx as u32, ny as u32);
                for c in 0..3 {
                    acc[c] += weight * px[c] as f32;
                }
                total += weight;
            }
            let value = Rgb([
                to_u8(acc[0] / total),
                to_u8(acc[1] / total),
                to_u8(acc[2] / total),
            ]);
            filled.push((x as u32, y as u32, value));
            false
        });

        // apply after the pass so a pass only reads earlier levels
        for (x, y, value) in filled {
            out.put_pixel(x, y, value);
            level[idx(x as i64, y as i64)] = Some(pass);
        }
        if pending.is_empty() {
            return Ok(out);
        }
    }
    Err(InpaintError::Incomplete {
        remaining: pending.len(),
    })
}

/// Last-resort fill: copy each masked pixel from its nearest unmasked pixel
/// (4-connected breadth-first distance).
pub fn nearest_fill(image: &RgbImage, mask: &Mask) -> Result<RgbImage, InpaintError> {
    check(image, mask)?;
    let (w, h) = image.dimensions();
    let mut out = image.clone();
    let mut seen = vec![false; (w * h) as usize];
    let mut queue = VecDeque::new();
    for y in 0..h {
        for x in 0..w {
            if !mask.is_subject(x, y) {
                seen[(y * w + x) as usize] = true;
                queue.push_back((x, y));
            }
        }
    }
    if queue.is_empty() {
        return Err(InpaintError::NoSupport);
    }
    while let Some((x, y)) = queue.pop_front() {
        let source = *out.get_pixel(x, y);
        let neighbors = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];
        for (nx, ny) in neighbors {
            if nx >= w || ny >= h {
                continue;
            }
            let i = (ny * w + nx) as usize;
            if !seen[i] {
                seen[i] = true;
                out.put_pixel(nx, ny, source);
                queue.push_back((nx, ny));
            }
        }
    }
    Ok(out)
}
