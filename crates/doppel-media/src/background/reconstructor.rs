//! Temporal-median background reconstruction.

use doppel_models::{BackgroundConfig, BackgroundMode};
use image::{Rgb, RgbImage};
use ndarray::Array2;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::inpaint::{inpaint, nearest_fill};
use super::plate::BackgroundPlate;
use crate::frame::{Frame, Mask};
use crate::metrics;

/// One inpainted frame and the pixels it actually saw.
struct Sample {
    frame_index: usize,
    image: RgbImage,
    /// Dilated person mask; `None` when the frame had no person
    occluded: Option<Mask>,
}

impl Sample {
    fn sees(&self, x: u32, y: u32) -> bool {
        self.occluded.as_ref().map_or(true, |m| !m.is_subject(x, y))
    }
}

/// Builds a [`BackgroundPlate`] from frames and person masks.
#[derive(Debug, Clone)]
pub struct BackgroundReconstructor {
    config: BackgroundConfig,
}

impl BackgroundReconstructor {
    pub fn new(config: BackgroundConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackgroundConfig {
        &self.config
    }

    /// Reconstruct a plate from `frames`, masking the person with `masks`.
    ///
    /// A `None` mask means no person was found and the whole frame is
    /// background. Returns `None` when nothing usable remains; callers then
    /// composite over the source pixels.
    pub fn reconstruct(&self, frames: &[Frame], masks: &[Option<Mask>]) -> Option<BackgroundPlate> {
        if frames.is_empty() {
            return None;
        }
        if frames.len() != masks.len() {
            warn!(
                frames = frames.len(),
                masks = masks.len(),
                "Frame and mask counts differ, skipping background reconstruction"
            );
            return None;
        }
        let dims = frames[0].dimensions();

        let samples: Vec<Sample> = frames
            .iter()
            .zip(masks)
            .filter_map(|(frame, mask)| self.prepare(frame, mask.as_ref(), dims))
            .collect();
        if samples.is_empty() {
            warn!("No usable frames for background reconstruction");
            return None;
        }

        let confidence = confidence_map(&samples, dims);
        let plate = match self.config.mode {
            BackgroundMode::Static => {
                let chosen = spread(samples.len(), self.config.median_window.max(1));
                let refs: Vec<&Sample> = chosen.iter().map(|&i| &samples[i]).collect();
                Some(BackgroundPlate::fixed(median_plate(&refs, dims), confidence))
            }
            BackgroundMode::Dynamic => {
                let window = self.config.median_window.max(1);
                let medians: Vec<RgbImage> = (0..samples.len())
                    .map(|i| {
                        let (lo, hi) = centered(i, window, samples.len());
                        let refs: Vec<&Sample> = samples[lo..hi].iter().collect();
                        median_plate(&refs, dims)
                    })
                    .collect();
                let smoothed = smooth_sequence(&medians, self.config.smoothing_window.max(1));
                let anchored = samples
                    .iter()
                    .map(|s| s.frame_index)
                    .zip(smoothed)
                    .collect();
                BackgroundPlate::sequence(anchored, confidence)
            }
        };

        if let Some(p) = &plate {
            info!(
                samples = samples.len(),
                plates = p.len(),
                coverage = p.coverage(),
                "Background plate reconstructed"
            );
        }
        plate
    }

    fn prepare(&self, frame: &Frame, mask: Option<&Mask>, dims: (u32, u32)) -> Option<Sample> {
        if frame.dimensions() != dims {
            warn!(frame = frame.index, "Frame size differs from first sample, skipping");
            return None;
        }
        let Some(mask) = mask.filter(|m| !m.is_empty()) else {
            return Some(Sample {
                frame_index: frame.index,
                image: frame.image.clone(),
                occluded: None,
            });
        };
        if mask.dimensions() != dims {
            warn!(frame = frame.index, "Mask size differs from frame, skipping");
            return None;
        }
        let occluded = mask.dilate(self.config.mask_dilation);
        let image = match inpaint(&frame.image, &occluded, self.config.inpaint_radius) {
            Ok(img) => img,
            Err(e) => {
                warn!(frame = frame.index, error = %e, "Inpainting failed, using nearest-pixel fill");
                metrics::record_inpaint_fallback("nearest");
                match nearest_fill(&frame.image, &occluded) {
                    Ok(img) => img,
                    Err(e) => {
                        warn!(frame = frame.index, error = %e, "Nearest-pixel fill failed, dropping frame");
                        metrics::record_inpaint_fallback("dropped");
                        return None;
                    }
                }
            }
        };
        debug!(frame = frame.index, coverage = occluded.coverage(), "Background sample ready");
        Some(Sample {
            frame_index: frame.index,
            image,
            occluded: Some(occluded),
        })
    }
}

/// Window `[lo, hi)` of `window` items centered on `i`, shifted to fit in `0..len`.
fn centered(i: usize, window: usize, len: usize) -> (usize, usize) {
    let window = window.min(len);
    let lo = i.saturating_sub(window / 2).min(len - window);
    (lo, lo + window)
}

/// Up to `count` indices spread evenly over `0..len`.
fn spread(len: usize, count: usize) -> Vec<usize> {
    if len <= count {
        return (0..len).collect();
    }
    (0..count)
        .map(|k| k * (len - 1) / (count - 1).max(1))
        .collect()
}

fn confidence_map(samples: &[Sample], (w, h): (u32, u32)) -> Array2<f32> {
    let n = samples.len() as f32;
    Array2::from_shape_fn((h as usize, w as usize), |(y, x)| {
        let seen = samples
            .iter()
            .filter(|s| s.sees(x as u32, y as u32))
            .count();
        seen as f32 / n
    })
}

fn median(values: &mut [u8]) -> u8 {
    values.sort_unstable();
    values[values.len() / 2]
}

/// Per-pixel median, preferring samples that saw the pixel unoccluded.
fn median_plate(samples: &[&Sample], (w, h): (u32, u32)) -> RgbImage {
    let rows: Vec<Vec<u8>> = (0..h)
        .into_par_iter()
        .map(|y| {
            let mut row = Vec::with_capacity(w as usize * 3);
            let mut channels: [Vec<u8>; 3] = Default::default();
            for x in 0..w {
                for ch in channels.iter_mut() {
                    ch.clear();
                }
                let visible = samples.iter().any(|s| s.sees(x, y));
                for s in samples.iter().filter(|s| !visible || s.sees(x, y)) {
                    let px = s.image.get_pixel(x, y);
                    for c in 0..3 {
                        channels[c].push(px[c]);
                    }
                }
                for ch in channels.iter_mut() {
                    row.push(if ch.is_empty() { 0 } else { median(ch) });
                }
            }
            row
        })
        .collect();
    let data: Vec<u8> = rows.into_iter().flatten().collect();
    RgbImage::from_raw(w, h, data).unwrap_or_else(|| RgbImage::new(w, h))
}

/// Average each plate with its neighbors over a centered window.
fn smooth_sequence(plates: &[RgbImage], window: usize) -> Vec<RgbImage> {
    if window <= 1 || plates.len() <= 1 {
        return plates.to_vec();
    }
    (0..plates.len())
        .map(|i| {
            let (lo, hi) = centered(i, window, plates.len());
            let group = &plates[lo..hi];
            let (w, h) = group[0].dimensions();
            RgbImage::from_fn(w, h, |x, y| {
                let mut acc = [0u32; 3];
                for p in group {
                    let px = p.get_pixel(x, y);
                    for c in 0..3 {
                        acc[c] += px[c] as u32;
                    }
                }
                let n = group.len() as u32;
                Rgb([
                    ((acc[0] + n / 2) / n) as u8,
                    ((acc[1] + n / 2) / n) as u8,
                    ((acc[2] + n / 2) / n) as u8,
                ])
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scene;

    /// Person box sliding right over a fixed background.
    fn walking(count: usize) -> (RgbImage, Vec<Frame>, Vec<Option<Mask>>) {
        let background = scene(60, 30, 0.0, 0.0);
        let mut frames = Vec::new();
        let mut masks = Vec::new();
        for i in 0..count {
            let x0 = 4 + i as u32 * 5;
            let inside = |x: u32, y: u32| (x0..x0 + 8).contains(&x) && (8..24).contains(&y);
            let mut img = background.clone();
            for y in 0..30 {
                for x in 0..60 {
                    if inside(x, y) {
                        img.put_pixel(x, y, Rgb([255, 0, 255]));
                    }
                }
            }
            frames.push(Frame::new(i, i as f64 / 25.0, img));
            masks.push(Some(Mask::from_fn(60, 30, inside)));
        }
        (background, frames, masks)
    }

    fn config(mode: BackgroundMode) -> BackgroundConfig {
        BackgroundConfig {
            enabled: true,
            mode,
            mask_dilation: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_static_plate_removes_moving_person() {
        let (background, frames, masks) = walking(9);
        let plate = BackgroundReconstructor::new(config(BackgroundMode::Static))
            .reconstruct(&frames, &masks)
            .unwrap();
        assert!(!plate.is_dynamic());
        let img = plate.image_for(4);
        // pixel covered in frame 0 but seen in later frames
        assert_eq!(img.get_pixel(6, 16), background.get_pixel(6, 16));
        assert!(plate.confidence_at(6, 16) > 0.5);
        assert_eq!(plate.confidence_at(0, 0), 1.0);
        assert!(img.pixels().all(|p| *p != Rgb([255, 0, 255])));
    }

    #[test]
    fn test_dynamic_plate_is_anchored_per_sample() {
        let (_, frames, masks) = walking(6);
        let plate = BackgroundReconstructor::new(config(BackgroundMode::Dynamic))
            .reconstruct(&frames, &masks)
            .unwrap();
        assert!(plate.is_dynamic());
        assert_eq!(plate.anchors(), &[0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_frame_without_person_counts_as_clean() {
        let (background, frames, _) = walking(1);
        let clean = Frame::new(1, 0.04, background.clone());
        let plate = BackgroundReconstructor::new(config(BackgroundMode::Static))
            .reconstruct(&[frames[0].clone(), clean], &[None, None])
            .unwrap();
        assert_eq!(plate.confidence_at(8, 10), 1.0);
    }

    #[test]
    fn test_fully_masked_frames_yield_no_plate() {
        let (_, frames, _) = walking(2);
        let full = vec![Some(Mask::from_fn(60, 30, |_, _| true)); 2];
        assert!(BackgroundReconstructor::new(config(BackgroundMode::Static))
            .reconstruct(&frames, &full)
            .is_none());
    }

    #[test]
    fn test_mismatched_counts_yield_no_plate() {
        let (_, frames, masks) = walking(3);
        assert!(BackgroundReconstructor::new(config(BackgroundMode::Static))
            .reconstruct(&frames, &masks[..2])
            .is_none());
    }

    #[test]
    fn test_window_helpers() {
        assert_eq!(centered(0, 3, 10), (0, 3));
        assert_eq!(centered(5, 3, 10), (4, 7));
        assert_eq!(centered(9, 3, 10), (7, 10));
        assert_eq!(centered(1, 15, 4), (0, 4));
        assert_eq!(spread(3, 15), vec![0, 1, 2]);
        assert_eq!(spread(10, 4), vec![0, 3, 6, 9]);
    }
}
