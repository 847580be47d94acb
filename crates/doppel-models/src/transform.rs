//! Camera motion transforms.
//!
//! A [`MotionTransform`] is a 2x3 affine matrix `[[a, b, tx], [c, d, ty]]`
//! mapping `(x, y)` to `(a*x + b*y + tx, c*x + d*y + ty)`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Determinant magnitude below which a transform is treated as singular.
pub const SINGULAR_EPSILON: f64 = 1e-9;

/// 2D affine transform describing camera motion between frames.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct MotionTransform {
    /// Row-major 2x3 affine matrix.
    pub m: [[f64; 3]; 2],
}

impl Default for MotionTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl MotionTransform {
    pub const fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    /// Create from explicit rows.
    pub const fn from_rows(row0: [f64; 3], row1: [f64; 3]) -> Self {
        Self { m: [row0, row1] }
    }

    /// Pure translation.
    pub const fn translation(tx: f64, ty: f64) -> Self {
        Self {
            m: [[1.0, 0.0, tx], [0.0, 1.0, ty]],
        }
    }

    /// Rotation by `angle` radians with uniform `scale`, followed by a translation.
    pub fn similarity(scale: f64, angle: f64, tx: f64, ty: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            m: [
                [scale * cos, -scale * sin, tx],
                [scale * sin, scale * cos, ty],
            ],
        }
    }

    /// Map a point through the transform.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [r0, r1] = self.m;
        (
            r0[0] * x + r0[1] * y + r0[2],
            r1[0] * x + r1[1] * y + r1[2],
        )
    }

    /// Compose two transforms: the result applies `other` first, then `self`.
    pub fn compose(&self, other: &MotionTransform) -> MotionTransform {
        let [a0, a1] = self.m;
        let [b0, b1] = other.m;
        MotionTransform {
            m: [
                [
                    a0[0] * b0[0] + a0[1] * b1[0],
                    a0[0] * b0[1] + a0[1] * b1[1],
                    a0[0] * b0[2] + a0[1] * b1[2] + a0[2],
                ],
                [
                    a1[0] * b0[0] + a1[1] * b1[0],
                    a1[0] * b0[1] + a1[1] * b1[1],
                    a1[0] * b0[2] + a1[1] * b1[2] + a1[2],
                ],
            ],
        }
    }

    /// Determinant of the linear part.
    pub fn determinant(&self) -> f64 {
        self.m[0][0] * self.m[1][1] - self.m[0][1] * self.m[1][0]
    }

    pub fn is_invertible(&self) -> bool {
        let det = self.determinant();
        det.is_finite() && det.abs() > SINGULAR_EPSILON && self.is_finite()
    }

    pub fn is_finite(&self) -> bool {
        self.m.iter().flatten().all(|v| v.is_finite())
    }

    /// Inverse transform, or `None` when the matrix is singular.
    pub fn inverse(&self) -> Option<MotionTransform> {
        if !self.is_invertible() {
            return None;
        }
        let det = self.determinant();
        let [r0, r1] = self.m;
        let a = r1[1] / det;
        let b = -r0[1] / det;
        let c = -r1[0] / det;
        let d = r0[0] / det;
        Some(MotionTransform {
            m: [
                [a, b, -(a * r0[2] + b * r1[2])],
                [c, d, -(c * r0[2] + d * r1[2])],
            ],
        })
    }

    /// Translation component `(tx, ty)`.
    pub fn translation_part(&self) -> (f64, f64) {
        (self.m[0][2], self.m[1][2])
    }

    /// Uniform scale implied by the linear part.
    pub fn scale(&self) -> f64 {
        self.determinant().abs().sqrt()
    }

    /// Largest absolute elementwise difference to another transform.
    pub fn max_abs_diff(&self, other: &MotionTransform) -> f64 {
        self.m
            .iter()
            .flatten()
            .zip(other.m.iter().flatten())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }

    /// Elementwise mean of a set of transforms. Returns identity for an empty set.
    pub fn average<'a, I>(transforms: I) -> MotionTransform
    where
        I: IntoIterator<Item = &'a MotionTransform>,
    {
        let mut sum = [[0.0f64; 3]; 2];
        let mut count = 0usize;
        for t in transforms {
            for (row, src) in sum.iter_mut().zip(t.m.iter()) {
                for (acc, v) in row.iter_mut().zip(src.iter()) {
                    *acc += v;
                }
            }
            count += 1;
        }
        if count == 0 {
            return MotionTransform::identity();
        }
        let n = count as f64;
        for v in sum.iter_mut().flatten() {
            *v /= n;
        }
        MotionTransform { m: sum }
    }
}

/// Per-frame record of estimated and derived camera motion.
///
/// Produced by stabilization and persisted so that re-shake can restore the
/// original camera motion after generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MotionRecord {
    /// Frame index in the source video
    pub frame_index: usize,
    /// Maps this frame's coordinates into the previous frame's coordinates
    pub inter_frame: MotionTransform,
    /// Accumulated motion relative to the first frame
    pub cumulative: MotionTransform,
    /// Smoothed camera path at this frame
    pub smoothed: MotionTransform,
    /// Warp applied to the raw frame to stabilize it
    pub compensating: MotionTransform,
    /// Warp that restores the original motion (inverse of `compensating`)
    pub inverse: MotionTransform,
    /// Number of feature correspondences behind `inter_frame`
    #[serde(default)]
    pub tracked_points: usize,
    /// True when motion could not be estimated and identity was assumed
    #[serde(default)]
    pub degraded: bool,
}

impl MotionRecord {
    /// Record for a frame with no camera motion.
    pub fn identity(frame_index: usize) -> Self {
        Self {
            frame_index,
            inter_frame: MotionTransform::identity(),
            cumulative: MotionTransform::identity(),
            smoothed: MotionTransform::identity(),
            compensating: MotionTransform::identity(),
            inverse: MotionTransform::identity(),
            tracked_points: 0,
            degraded: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &MotionTransform, b: &MotionTransform) {
        assert!(a.max_abs_diff(b) < 1e-9, "{:?} != {:?}", a, b);
    }

    #[test]
    fn test_identity_apply() {
        let t = MotionTransform::identity();
        assert_eq!(t.apply(3.0, -4.0), (3.0, -4.0));
    }

    #[test]
    fn test_compose_order() {
        let translate = MotionTransform::translation(10.0, 0.0);
        let scale = MotionTransform::similarity(2.0, 0.0, 0.0, 0.0);
        // scale first, then translate
        let combined = translate.compose(&scale);
        assert_eq!(combined.apply(1.0, 1.0), (12.0, 2.0));
        // translate first, then scale
        let combined = scale.compose(&translate);
        assert_eq!(combined.apply(1.0, 1.0), (22.0, 2.0));
    }

    #[test]
    fn test_inverse_round_trip() {
        let t = MotionTransform::similarity(1.05, 0.1, 4.5, -2.25);
        let inv = t.inverse().unwrap();
        assert_close(&t.compose(&inv), &MotionTransform::identity());
        assert_close(&inv.compose(&t), &MotionTransform::identity());

        let (x, y) = t.apply(17.0, 9.0);
        let (bx, by) = inv.apply(x, y);
        assert!((bx - 17.0).abs() < 1e-9 && (by - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_singular_has_no_inverse() {
        let t = MotionTransform::from_rows([1.0, 2.0, 0.0], [2.0, 4.0, 0.0]);
        assert!(!t.is_invertible());
        assert!(t.inverse().is_none());
    }

    #[test]
    fn test_average() {
        let a = MotionTransform::translation(2.0, 0.0);
        let b = MotionTransform::translation(4.0, 6.0);
        let avg = MotionTransform::average([&a, &b]);
        assert_close(&avg, &MotionTransform::translation(3.0, 3.0));
        assert_close(
            &MotionTransform::average(std::iter::empty()),
            &MotionTransform::identity(),
        );
    }

    #[test]
    fn test_serialization_is_bare_matrix() {
        let t = MotionTransform::translation(1.5, -2.0);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "[[1.0,0.0,1.5],[0.0,1.0,-2.0]]");
        let back: MotionTransform = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
