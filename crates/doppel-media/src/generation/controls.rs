//! Control signals that condition frame synthesis.

use doppel_models::{JointId, PoseKeypoints, SKELETON_CONNECTIONS};
use image::{GrayImage, Luma, Rgb, RgbImage};

use crate::frame::{Frame, Mask};
use crate::imaging::{luma, sobel};

/// Pose, depth and edge images for one frame, all at frame resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlSignals {
    /// Skeleton rendered on black
    pub pose: RgbImage,
    /// Relative depth cue, brighter is nearer
    pub depth: GrayImage,
    /// Binary edge map
    pub edges: GrayImage,
}

/// Derives [`ControlSignals`] from a frame, its subject mask and keypoints.
#[derive(Debug, Clone)]
pub struct ControlExtractor {
    pose_min_confidence: f64,
    edge_threshold: f32,
}

impl ControlExtractor {
    pub fn new(pose_min_confidence: f64, edge_threshold: f32) -> Self {
        Self {
            pose_min_confidence,
            edge_threshold,
        }
    }

    pub fn extract(&self, frame: &Frame, mask: &Mask, keypoints: Option<&PoseKeypoints>) -> ControlSignals {
        let (w, h) = frame.dimensions();
        ControlSignals {
            pose: render_pose(w, h, keypoints, self.pose_min_confidence),
            depth: depth_cue(mask),
            edges: edge_map(&frame.image, self.edge_threshold),
        }
    }
}

/// Draw limbs and joints whose keypoints pass `min_confidence`.
///
/// Missing keypoints yield a black canvas.
pub fn render_pose(
    width: u32,
    height: u32,
    keypoints: Option<&PoseKeypoints>,
    min_confidence: f64,
) -> RgbImage {
    let mut canvas = RgbImage::new(width, height);
    let Some(pose) = keypoints else {
        return canvas;
    };
    let limb_radius = (height.min(width) as f64 / 200.0).max(2.0);
    let joint_radius = limb_radius * 1.6;

    for (i, (a, b)) in SKELETON_CONNECTIONS.iter().enumerate() {
        let (Some(pa), Some(pb)) = (
            pose.confident(*a, min_confidence),
            pose.confident(*b, min_confidence),
        ) else {
            continue;
        };
        let color = limb_color(i, SKELETON_CONNECTIONS.len());
        let length = pa.distance(&pb);
        let steps = (length * 2.0).ceil().max(1.0) as usize;
        for s in 0..=steps {
            let t = s as f64 / steps as f64;
            stamp_disc(
                &mut canvas,
                pa.x + (pb.x - pa.x) * t,
                pa.y + (pb.y - pa.y) * t,
                limb_radius,
                color,
            );
        }
    }

    for joint in JointId::ALL {
        if let Some(p) = pose.confident(joint, min_confidence) {
            stamp_disc(&mut canvas, p.x, p.y, joint_radius, Rgb([255, 255, 255]));
        }
    }
    canvas
}

fn limb_color(i: usize, n: usize) -> Rgb<u8> {
    // evenly spaced hues at full saturation
    let hue = i as f64 / n.max(1) as f64 * 6.0;
    let x = (1.0 - (hue % 2.0 - 1.0).abs()) * 255.0;
    let x = x as u8;
    match hue as u32 {
        0 => Rgb([255, x, 0]),
        1 => Rgb([x, 255, 0]),
        2 => Rgb([0, 255, x]),
        3 => Rgb([0, x, 255]),
        4 => Rgb([x, 0, 255]),
        _ => Rgb([255, 0, x]),
    }
}

fn stamp_disc(canvas: &mut RgbImage, cx: f64, cy: f64, radius: f64, color: Rgb<u8>) {
    let (w, h) = canvas.dimensions();
    let x0 = (cx - radius).floor().max(0.0) as u32;
    let y0 = (cy - radius).floor().max(0.0) as u32;
    let x1 = ((cx + radius).ceil().max(0.0) as u32).min(w.saturating_sub(1));
    let y1 = ((cy + radius).ceil().max(0.0) as u32).min(h.saturating_sub(1));
    if w == 0 || h == 0 || x0 > x1 || y0 > y1 {
        return;
    }
    let r2 = radius * radius;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            if dx * dx + dy * dy <= r2 {
                canvas.put_pixel(x, y, color);
            }
        }
    }
}

/// Heuristic depth: a floor-like vertical ramp with the subject in front.
pub fn depth_cue(mask: &Mask) -> GrayImage {
    let (w, h) = mask.dimensions();
    let span = h.saturating_sub(1).max(1) as f32;
    GrayImage::from_fn(w, h, |x, y| {
        if mask.is_subject(x, y) {
            Luma([255])
        } else {
            Luma([(40.0 + 140.0 * y as f32 / span) as u8])
        }
    })
}

/// Sobel gradient magnitude thresholded to 0/255.
pub fn edge_map(image: &RgbImage, threshold: f32) -> GrayImage {
    let gray = luma(image);
    let (gx, gy) = sobel(&gray);
    let (w, h) = image.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let (x, y) = (x as usize, y as usize);
        // Sobel kernels sum to 4x the central difference
        let magnitude = gx[[y, x]].hypot(gy[[y, x]]) / 4.0;
        if magnitude >= threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use doppel_models::Keypoint;

    #[test]
    fn test_missing_pose_is_blank() {
        let canvas = render_pose(32, 32, None, 0.5);
        assert!(canvas.as_raw().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_pose_draws_confident_limbs_only() {
        let pose = PoseKeypoints::new()
            .with_joint(JointId::LeftHip, Keypoint::new(10.0, 10.0, 0.9))
            .with_joint(JointId::LeftKnee, Keypoint::new(10.0, 40.0, 0.9))
            .with_joint(JointId::LeftAnkle, Keypoint::new(50.0, 60.0, 0.2));
        let canvas = render_pose(64, 64, Some(&pose), 0.5);
        // midpoint of hip-knee limb is drawn
        assert_ne!(canvas.get_pixel(10, 25), &Rgb([0, 0, 0]));
        // low-confidence ankle is not
        assert_eq!(canvas.get_pixel(50, 60), &Rgb([0, 0, 0]));
        // joints are white
        assert_eq!(canvas.get_pixel(10, 10), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_edge_map_marks_boundaries() {
        let image = RgbImage::from_fn(20, 20, |x, _| if x < 10 { Rgb([0, 0, 0]) } else { Rgb([200, 200, 200]) });
        let edges = edge_map(&image, 64.0);
        assert_eq!(edges.get_pixel(10, 5)[0], 255);
        assert_eq!(edges.get_pixel(3, 5)[0], 0);
        assert_eq!(edges.get_pixel(16, 5)[0], 0);
    }

    #[test]
    fn test_depth_puts_subject_in_front() {
        let mask = Mask::from_fn(10, 10, |x, y| x > 3 && x < 6 && y > 2);
        let depth = depth_cue(&mask);
        assert_eq!(depth.get_pixel(4, 5)[0], 255);
        assert!(depth.get_pixel(0, 0)[0] < depth.get_pixel(0, 9)[0]);
    }

    #[test]
    fn test_extract_matches_frame_size() {
        let frame = Frame::new(0, 0.0, RgbImage::new(24, 16));
        let controls = ControlExtractor::new(0.5, 64.0).extract(&frame, &Mask::empty(24, 16), None);
        assert_eq!(controls.pose.dimensions(), (24, 16));
        assert_eq!(controls.depth.dimensions(), (24, 16));
        assert_eq!(controls.edges.dimensions(), (24, 16));
    }
}
