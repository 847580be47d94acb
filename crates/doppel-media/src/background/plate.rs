//! Reconstructed person-free background.

use image::RgbImage;
use ndarray::Array2;

/// Background plate shared read-only by every segment of a run.
///
/// A static plate holds one image. A dynamic plate holds a sequence of
/// images anchored at sampled frame indices; lookups pick the nearest
/// anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundPlate {
    images: Vec<RgbImage>,
    anchors: Vec<usize>,
    /// Fraction of sampled frames that saw each pixel unoccluded, (h, w)
    confidence: Array2<f32>,
}

impl BackgroundPlate {
    /// Single static plate.
    pub fn fixed(image: RgbImage, confidence: Array2<f32>) -> Self {
        Self {
            images: vec![image],
            anchors: vec![0],
            confidence,
        }
    }

    /// Plate sequence anchored at increasing frame indices.
    ///
    /// Returns `None` for an empty sequence or images of differing sizes.
    pub fn sequence(mut plates: Vec<(usize, RgbImage)>, confidence: Array2<f32>) -> Option<Self> {
        plates.sort_by_key(|(anchor, _)| *anchor);
        let first = plates.first()?.1.dimensions();
        if plates.iter().any(|(_, img)| img.dimensions() != first) {
            return None;
        }
        let (anchors, images) = plates.into_iter().unzip();
        Some(Self {
            images,
            anchors,
            confidence,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.images[0].dimensions()
    }

    pub fn is_dynamic(&self) -> bool {
        self.images.len() > 1
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn anchors(&self) -> &[usize] {
        &self.anchors
    }

    /// Plate image to composite `frame_index` over.
    pub fn image_for(&self, frame_index: usize) -> &RgbImage {
        let i = match self.anchors.binary_search(&frame_index) {
            Ok(i) => i,
            Err(0) => 0,
            Err(i) if i >= self.anchors.len() => self.anchors.len() - 1,
            Err(i) => {
                // nearest neighbor, ties go to the earlier anchor
                if frame_index - self.anchors[i - 1] <= self.anchors[i] - frame_index {
                    i - 1
                } else {
                    i
                }
            }
        };
        &self.images[i]
    }

    /// Confidence at a pixel, 0 outside the plate.
    pub fn confidence_at(&self, x: u32, y: u32) -> f32 {
        self.confidence
            .get((y as usize, x as usize))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn confidence(&self) -> &Array2<f32> {
        &self.confidence
    }

    /// Mean confidence over the plate.
    pub fn coverage(&self) -> f64 {
        self.confidence.mean().map_or(0.0, |m| m as f64)
    }
}
