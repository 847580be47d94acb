//! Compositing generated subjects over the background.

use image::{imageops, GrayImage, RgbImage};
use tracing::warn;

use crate::background::BackgroundPlate;
use crate::error::{MediaError, MediaResult};
use crate::frame::{Frame, Mask};
use crate::imaging::ops::to_u8;

/// Feathered mask compositing.
#[derive(Debug, Clone)]
pub struct Compositor {
    feather_sigma: f32,
    min_plate_confidence: f64,
}

impl Compositor {
    pub fn new(feather_sigma: f32, min_plate_confidence: f64) -> Self {
        Self {
            feather_sigma,
            min_plate_confidence,
        }
    }

    /// Soft-edged version of the mask.
    pub fn feather(&self, mask: &Mask) -> GrayImage {
        if self.feather_sigma <= 0.0 {
            return mask.image().clone();
        }
        imageops::blur(mask.image(), self.feather_sigma)
    }

    /// Place the generated subject over the plate, or over the source frame
    /// where the plate is missing or unreliable.
    pub fn composite(
        &self,
        generated: &RgbImage,
        source: &Frame,
        mask: &Mask,
        plate: Option<&BackgroundPlate>,
    ) -> MediaResult<RgbImage> {
        let dims = source.dimensions();
        if generated.dimensions() != dims || mask.dimensions() != dims {
            return Err(MediaError::internal(format!(
                "composite inputs disagree on size: frame {:?}, generated {:?}, mask {:?}",
                dims,
                generated.dimensions(),
                mask.dimensions()
            )));
        }
        let plate = match plate {
            Some(p) if p.dimensions() != dims => {
                warn!(
                    frame = source.index,
                    plate = ?p.dimensions(),
                    "Background plate size differs from frame, ignoring plate"
                );
                None
            }
            other => other,
        };
        let plate_image = plate.map(|p| (p, p.image_for(source.index)));

        let soft = self.feather(mask);
        let (w, h) = dims;
        let mut out = RgbImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let m = soft.get_pixel(x, y)[0] as f32 / 255.0;
                let original = source.image.get_pixel(x, y);
                let background = match plate_image {
                    Some((p, img)) if p.confidence_at(x, y) as f64 >= self.min_plate_confidence => {
                        img.get_pixel(x, y)
                    }
                    _ => original,
                };
                let subject = generated.get_pixel(x, y);
                let px = out.get_pixel_mut(x, y);
                for c in 0..3 {
                    px[c] = to_u8(m * subject[c] as f32 + (1.0 - m) * background[c] as f32);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray::Array2;

    fn frame(value: u8) -> Frame {
        Frame::new(3, 0.1, RgbImage::from_pixel(40, 40, Rgb([value; 3])))
    }

    fn center_mask() -> Mask {
        Mask::from_fn(40, 40, |x, y| (10..30).contains(&x) && (10..30).contains(&y))
    }

    #[test]
    fn test_hard_mask_without_feather() {
        let c = Compositor::new(0.0, 0.3);
        let generated = RgbImage::from_pixel(40, 40, Rgb([200; 3]));
        let out = c.composite(&generated, &frame(20), &center_mask(), None).unwrap();
        assert_eq!(out.get_pixel(20, 20)[0], 200);
        assert_eq!(out.get_pixel(2, 2)[0], 20);
    }

    #[test]
    fn test_feathered_edge_mixes() {
        let c = Compositor::new(3.0, 0.3);
        let generated = RgbImage::from_pixel(40, 40, Rgb([200; 3]));
        let out = c.composite(&generated, &frame(0), &center_mask(), None).unwrap();
        let edge = out.get_pixel(10, 20)[0];
        assert!(edge > 20 && edge < 180, "edge = {}", edge);
        assert!(out.get_pixel(20, 20)[0] > 190);
        assert!(out.get_pixel(1, 1)[0] < 5);
    }

    #[test]
    fn test_plate_used_where_confident() {
        let c = Compositor::new(0.0, 0.5);
        let mut confidence = Array2::from_elem((40, 40), 1.0f32);
        for x in 0..40 {
            confidence[[0, x]] = 0.1;
        }
        let plate = BackgroundPlate::fixed(RgbImage::from_pixel(40, 40, Rgb([90; 3])), confidence);
        let generated = RgbImage::from_pixel(40, 40, Rgb([200; 3]));
        let out = c
            .composite(&generated, &frame(20), &center_mask(), Some(&plate))
            .unwrap();
        assert_eq!(out.get_pixel(5, 5)[0], 90);
        // low plate confidence keeps the source pixel
        assert_eq!(out.get_pixel(5, 0)[0], 20);
        assert_eq!(out.get_pixel(20, 20)[0], 200);
    }

    #[test]
    fn test_size_mismatch_is_an_error() {
        let c = Compositor::new(0.0, 0.3);
        let generated = RgbImage::new(10, 10);
        assert!(c.composite(&generated, &frame(0), &center_mask(), None).is_err());
    }
}
