//! Decoded frames and subject masks.

use image::{GrayImage, Luma, RgbImage};

/// Mask values above this are treated as subject pixels.
pub const MASK_THRESHOLD: u8 = 127;

/// A decoded video frame.
///
/// Stages never mutate a frame in place; each produces a new `Frame` that
/// keeps the source index and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Index of the frame in the source video
    pub index: usize,
    /// Presentation time in seconds
    pub timestamp: f64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: usize, timestamp: f64, image: RgbImage) -> Self {
        Self {
            index,
            timestamp,
            image,
        }
    }

    /// A new frame with the same identity and different pixels.
    pub fn with_image(&self, image: RgbImage) -> Self {
        Self {
            index: self.index,
            timestamp: self.timestamp,
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Per-pixel subject mask (0 = background, 255 = subject).
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    image: GrayImage,
}

impl Mask {
    pub fn new(image: GrayImage) -> Self {
        Self { image }
    }

    /// Mask with no subject pixels.
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            image: GrayImage::new(width, height),
        }
    }

    /// Build from a predicate over pixel coordinates.
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        Self {
            image: GrayImage::from_fn(width, height, |x, y| {
                if f(x, y) {
                    Luma([255])
                } else {
                    Luma([0])
                }
            }),
        }
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn into_image(self) -> GrayImage {
        self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn is_subject(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel(x, y)[0] > MASK_THRESHOLD
    }

    /// True when the mask marks no subject pixels.
    pub fn is_empty(&self) -> bool {
        !self.image.as_raw().iter().any(|&v| v > MASK_THRESHOLD)
    }

    /// Fraction of pixels marked as subject.
    pub fn coverage(&self) -> f64 {
        let total = self.image.as_raw().len();
        if total == 0 {
            return 0.0;
        }
        let covered = self
            .image
            .as_raw()
            .iter()
            .filter(|&&v| v > MASK_THRESHOLD)
            .count();
        covered as f64 / total as f64
    }

    /// Grow the mask by `iterations` passes of a 3x3 maximum filter.
    pub fn dilate(&self, iterations: u32) -> Mask {
        let (w, h) = self.image.dimensions();
        let mut current = self.image.clone();
        for _ in 0..iterations {
            let src = current.clone();
            for y in 0..h {
                for x in 0..w {
                    let mut max = 0u8;
                    for dy in -1i64..=1 {
                        for dx in -1i64..=1 {
                            let nx = x as i64 + dx;
                            let ny = y as i64 + dy;
                            if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                                continue;
                            }
                            max = max.max(src.get_pixel(nx as u32, ny as u32)[0]);
                        }
                    }
                    current.put_pixel(x, y, Luma([max]));
                }
            }
        }
        Mask { image: current }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_image_keeps_identity() {
        let frame = Frame::new(7, 0.25, RgbImage::new(4, 4));
        let next = frame.with_image(RgbImage::from_pixel(4, 4, image::Rgb([9, 9, 9])));
        assert_eq!(next.index, 7);
        assert_eq!(next.timestamp, 0.25);
        assert_ne!(next.image, frame.image);
    }

    #[test]
    fn test_empty_mask() {
        let mask = Mask::empty(8, 8);
        assert!(mask.is_empty());
        assert_eq!(mask.coverage(), 0.0);
    }

    #[test]
    fn test_dilate_grows_region() {
        let mask = Mask::from_fn(9, 9, |x, y| x == 4 && y == 4);
        assert!((mask.coverage() - 1.0 / 81.0).abs() < 1e-12);

        let once = mask.dilate(1);
        assert!(once.is_subject(3, 3) && once.is_subject(5, 5));
        assert!(!once.is_subject(2, 4));

        let twice = mask.dilate(2);
        assert!(twice.is_subject(2, 4));
        assert!((twice.coverage() - 25.0 / 81.0).abs() < 1e-12);
    }
}
