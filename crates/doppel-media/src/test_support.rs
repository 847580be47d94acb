//! Synthetic frames and in-process collaborators for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use doppel_models::{JointId, Keypoint, Point2, PoseKeypoints};
use image::{Rgb, RgbImage};

use crate::frame::{Frame, Mask};
use crate::generation::{
    ControlSignals, Detection, FrameSynthesizer, PersonDetector, SynthesisError,
};

pub const PERSON_COLOR: Rgb<u8> = Rgb([180, 60, 40]);

/// Smooth grayscale texture with content shifted by `(ox, oy)`.
///
/// `scene(w, h, ox, oy)(x, y) == scene(w, h, 0, 0)(x - ox, y - oy)`.
pub fn scene(width: u32, height: u32, ox: f64, oy: f64) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        let sx = x as f64 - ox;
        let sy = y as f64 - oy;
        let v = 128.0
            + 50.0 * (sx * 0.21).sin() * (sy * 0.17).cos()
            + 40.0 * (sx * 0.09 + sy * 0.13).sin()
            + 20.0 * (sx * 0.05 - sy * 0.31).cos();
        let v = v.round().clamp(0.0, 255.0) as u8;
        Rgb([v, v, v])
    })
}

/// Mean absolute channel difference, ignoring a border of `margin` pixels.
pub fn mean_abs_error_interior(a: &RgbImage, b: &RgbImage, margin: u32) -> f64 {
    let (w, h) = a.dimensions();
    let mut total = 0.0;
    let mut count = 0usize;
    for y in margin..h.saturating_sub(margin) {
        for x in margin..w.saturating_sub(margin) {
            let (pa, pb) = (a.get_pixel(x, y), b.get_pixel(x, y));
            for c in 0..3 {
                total += (pa[c] as f64 - pb[c] as f64).abs();
                count += 1;
            }
        }
    }
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Bounding box `(x0, y0, x1, y1)` of the synthetic person.
pub fn person_box(width: u32, height: u32) -> (u32, u32, u32, u32) {
    (width / 4, height / 6, width * 3 / 4, height * 5 / 6)
}

/// Static textured background with a solid person box in the middle.
pub fn person_frames(count: usize, width: u32, height: u32) -> Vec<Frame> {
    let (x0, y0, x1, y1) = person_box(width, height);
    let mut base = scene(width, height, 0.0, 0.0);
    for y in y0..y1 {
        for x in x0..x1 {
            base.put_pixel(x, y, PERSON_COLOR);
        }
    }
    (0..count)
        .map(|i| Frame::new(i, i as f64 / 25.0, base.clone()))
        .collect()
}

/// Standing pose filling the person box, ankles on its bottom edge.
pub fn standing_pose(width: u32, height: u32) -> PoseKeypoints {
    let (x0, y0, x1, y1) = person_box(width, height);
    let (x0, y0, x1, y1) = (x0 as f64, y0 as f64, x1 as f64, y1 as f64);
    let bw = x1 - x0;
    let bh = y1 - y0;
    let at = |fx: f64, fy: f64| Keypoint::new(x0 + bw * fx, y0 + bh * fy, 0.9);
    let mut pose = PoseKeypoints::new();
    pose.insert(JointId::Nose, at(0.5, 0.08));
    pose.insert(JointId::LeftEye, at(0.45, 0.06));
    pose.insert(JointId::RightEye, at(0.55, 0.06));
    pose.insert(JointId::LeftEar, at(0.4, 0.07));
    pose.insert(JointId::RightEar, at(0.6, 0.07));
    pose.insert(JointId::LeftShoulder, at(0.3, 0.2));
    pose.insert(JointId::RightShoulder, at(0.7, 0.2));
    pose.insert(JointId::LeftElbow, at(0.2, 0.38));
    pose.insert(JointId::RightElbow, at(0.8, 0.38));
    pose.insert(JointId::LeftWrist, at(0.15, 0.52));
    pose.insert(JointId::RightWrist, at(0.85, 0.52));
    pose.insert(JointId::LeftHip, at(0.38, 0.55));
    pose.insert(JointId::RightHip, at(0.62, 0.55));
    pose.insert(JointId::LeftKnee, at(0.36, 0.78));
    pose.insert(JointId::RightKnee, at(0.64, 0.78));
    pose.insert(JointId::LeftAnkle, Keypoint::new(x0 + bw * 0.35, y1 - 1.0, 0.9));
    pose.insert(JointId::RightAnkle, Keypoint::new(x0 + bw * 0.65, y1 - 1.0, 0.9));
    pose
}

type AnklePath = Box<dyn Fn(usize) -> Option<(Point2, Point2)> + Send + Sync>;

/// Detector that finds the person box of [`person_frames`].
#[derive(Default)]
pub struct FakeDetector {
    missing: Vec<usize>,
    ankles: Option<AnklePath>,
}

impl FakeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report no person on these frame indices.
    pub fn missing_at(mut self, frames: &[usize]) -> Self {
        self.missing.extend_from_slice(frames);
        self
    }

    /// Override ankle positions per frame index. `None` drops both ankles.
    pub fn with_ankles(
        mut self,
        path: impl Fn(usize) -> Option<(Point2, Point2)> + Send + Sync + 'static,
    ) -> Self {
        self.ankles = Some(Box::new(path));
        self
    }
}

impl PersonDetector for FakeDetector {
    fn detect(&self, frame: &Frame) -> Detection {
        if self.missing.contains(&frame.index) {
            return Detection::none();
        }
        let (w, h) = frame.dimensions();
        let (x0, y0, x1, y1) = person_box(w, h);
        let mask = Mask::from_fn(w, h, |x, y| (x0..x1).contains(&x) && (y0..y1).contains(&y));
        let mut pose = standing_pose(w, h);
        if let Some(path) = &self.ankles {
            match path(frame.index) {
                Some((left, right)) => {
                    pose.insert(JointId::LeftAnkle, Keypoint::new(left.x, left.y, 0.9));
                    pose.insert(JointId::RightAnkle, Keypoint::new(right.x, right.y, 0.9));
                }
                None => {
                    pose.insert(JointId::LeftAnkle, Keypoint::new(0.0, 0.0, 0.0));
                    pose.insert(JointId::RightAnkle, Keypoint::new(0.0, 0.0, 0.0));
                }
            }
        }
        Detection::new(mask, Some(pose))
    }
}

/// Synthesizer that paints a solid color and can fail on chosen frames.
pub struct FakeSynthesizer {
    color: Rgb<u8>,
    failing: Vec<usize>,
    calls: AtomicUsize,
}

impl FakeSynthesizer {
    pub fn solid(color: Rgb<u8>) -> Self {
        Self {
            color,
            failing: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_at(mut self, frames: &[usize]) -> Self {
        self.failing.extend_from_slice(frames);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FrameSynthesizer for FakeSynthesizer {
    fn synthesize(
        &self,
        frame: &Frame,
        _controls: &ControlSignals,
        _style: &str,
    ) -> Result<RgbImage, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&frame.index) {
            return Err(SynthesisError::ResourceExhausted(format!(
                "out of memory at frame {}",
                frame.index
            )));
        }
        Ok(RgbImage::from_pixel(frame.width(), frame.height(), self.color))
    }
}
