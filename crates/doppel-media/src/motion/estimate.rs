//! Robust similarity (partial affine) fitting.

use doppel_models::{MotionTransform, Point2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A fitted transform and the number of correspondences that agree with it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fit {
    pub transform: MotionTransform,
    pub inliers: usize,
}

/// Least-squares similarity mapping each `src` point onto its `dst` point.
///
/// Returns `None` for fewer than two points or a degenerate point set.
pub fn fit_similarity(src: &[Point2], dst: &[Point2]) -> Option<MotionTransform> {
    if src.len() != dst.len() || src.len() < 2 {
        return None;
    }
    let n = src.len() as f64;
    let (sx, sy) = src.iter().fold((0.0, 0.0), |a, p| (a.0 + p.x, a.1 + p.y));
    let (dx, dy) = dst.iter().fold((0.0, 0.0), |a, p| (a.0 + p.x, a.1 + p.y));
    let (sx, sy, dx, dy) = (sx / n, sy / n, dx / n, dy / n);

    let mut norm = 0.0;
    let mut a_num = 0.0;
    let mut b_num = 0.0;
    for (s, d) in src.iter().zip(dst) {
        let (x, y) = (s.x - sx, s.y - sy);
        let (u, v) = (d.x - dx, d.y - dy);
        norm += x * x + y * y;
        a_num += x * u + y * v;
        b_num += x * v - y * u;
    }
    if norm < 1e-9 {
        return None;
    }
    let a = a_num / norm;
    let b = b_num / norm;
    let t = MotionTransform::from_rows(
        [a, -b, dx - a * sx + b * sy],
        [b, a, dy - b * sx - a * sy],
    );
    t.is_invertible().then_some(t)
}

/// RANSAC over two-point minimal samples, refit on the best consensus set.
///
/// The random generator is seeded so repeated runs give identical results.
pub fn estimate_similarity(
    src: &[Point2],
    dst: &[Point2],
    iterations: usize,
    threshold: f64,
    seed: u64,
) -> Option<Fit> {
    let n = src.len();
    if n != dst.len() || n < 2 {
        return None;
    }

    let count_inliers = |t: &MotionTransform| -> Vec<usize> {
        (0..n)
            .filter(|&i| {
                let (px, py) = t.apply(src[i].x, src[i].y);
                (px - dst[i].x).hypot(py - dst[i].y) <= threshold
            })
            .collect()
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Vec<usize> = Vec::new();
    for _ in 0..iterations.max(1) {
        let i = rng.random_range(0..n);
        let mut j = rng.random_range(0..n - 1);
        if j >= i {
            j += 1;
        }
        let Some(candidate) = fit_similarity(&[src[i], src[j]], &[dst[i], dst[j]]) else {
            continue;
        };
        let inliers = count_inliers(&candidate);
        if inliers.len() > best.len() {
            best = inliers;
            if best.len() == n {
                break;
            }
        }
    }

    if best.len() < 2 {
        return None;
    }
    let inlier_src: Vec<Point2> = best.iter().map(|&i| src[i]).collect();
    let inlier_dst: Vec<Point2> = best.iter().map(|&i| dst[i]).collect();
    let transform = fit_similarity(&inlier_src, &inlier_dst)?;
    Some(Fit {
        inliers: count_inliers(&transform).len(),
        transform,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<Point2> {
        (0..5)
            .flat_map(|y| (0..5).map(move |x| Point2::new(x as f64 * 20.0, y as f64 * 15.0)))
            .collect()
    }

    #[test]
    fn test_exact_similarity_recovered() {
        let truth = MotionTransform::similarity(1.02, 0.05, 3.0, -4.0);
        let src = grid();
        let dst: Vec<Point2> = src
            .iter()
            .map(|p| {
                let (x, y) = truth.apply(p.x, p.y);
                Point2::new(x, y)
            })
            .collect();
        let fit = fit_similarity(&src, &dst).unwrap();
        assert!(fit.max_abs_diff(&truth) < 1e-9);
    }

    #[test]
    fn test_ransac_ignores_outliers() {
        let truth = MotionTransform::translation(5.0, 2.0);
        let src = grid();
        let mut dst: Vec<Point2> = src
            .iter()
            .map(|p| Point2::new(p.x + 5.0, p.y + 2.0))
            .collect();
        // a few wild matches
        dst[0] = Point2::new(90.0, -40.0);
        dst[7] = Point2::new(-30.0, 12.0);
        dst[13] = Point2::new(0.0, 0.0);

        let fit = estimate_similarity(&src, &dst, 100, 1.0, 7).unwrap();
        assert_eq!(fit.inliers, 22);
        assert!(fit.transform.max_abs_diff(&truth) < 1e-6);
    }

    #[test]
    fn test_degenerate_input() {
        let p = Point2::new(1.0, 1.0);
        assert!(fit_similarity(&[p, p], &[p, p]).is_none());
        assert!(estimate_similarity(&[p], &[p], 10, 1.0, 0).is_none());
    }

    #[test]
    fn test_seeded_runs_are_identical() {
        let src = grid();
        let dst: Vec<Point2> = src.iter().map(|p| Point2::new(p.x * 0.5 + p.y * 0.01, p.y)).collect();
        let a = estimate_similarity(&src, &dst, 30, 2.0, 42);
        let b = estimate_similarity(&src, &dst, 30, 2.0, 42);
        assert_eq!(a, b);
    }
}
