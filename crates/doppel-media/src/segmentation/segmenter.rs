//! Splitting a video into overlapping temporal segments.

use doppel_models::{CutPoint, CutStrategy, Segment, SegmentPlan, SegmentationConfig};
use tracing::{info, warn};

use crate::error::{MediaError, MediaResult};
use crate::metrics;
use crate::motion::moving_average;

/// Plans segment boundaries, preferring low subject motion for cuts.
#[derive(Debug, Clone)]
pub struct Segmenter {
    config: SegmentationConfig,
}

impl Segmenter {
    pub fn new(config: SegmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Plan segments for `frame_count` frames.
    ///
    /// `motion` is the per-frame subject motion signal; when it is missing or
    /// has no clear minimum near a cut, the cut falls back to even spacing.
    /// If the video is too short for the requested count and overlap, the
    /// overlap is narrowed first and then the segment count is reduced.
    pub fn segment(&self, frame_count: usize, motion: &[f64]) -> MediaResult<SegmentPlan> {
        if frame_count == 0 {
            return Ok(SegmentPlan::default());
        }

        let requested_count = self.config.segment_count.max(1);
        let requested_overlap = self.config.overlap_frames;
        let mut adjustments = Vec::new();
        let (count, overlap) = fit_layout(frame_count, requested_count, requested_overlap);
        if count != requested_count {
            let note = format!(
                "segment count reduced from {} to {} for {} frames",
                requested_count, count, frame_count
            );
            warn!("{}", note);
            adjustments.push(note);
        }
        if count > 1 && overlap != requested_overlap {
            let note = format!(
                "overlap reduced from {} to {} frames for {} frames",
                requested_overlap, overlap, frame_count
            );
            warn!("{}", note);
            adjustments.push(note);
        }
        let overlap = if count > 1 { overlap } else { 0 };

        let use_motion = self.config.motion_based_cuts && motion.len() == frame_count;
        if self.config.motion_based_cuts && !use_motion && count > 1 {
            warn!(
                expected = frame_count,
                actual = motion.len(),
                "Motion signal unavailable, using uniform cuts"
            );
        }
        let smoothed = if use_motion {
            moving_average(motion, self.config.motion_smoothing_window)
        } else {
            Vec::new()
        };

        let cuts = self.place_cuts(frame_count, count, overlap, &smoothed);
        let segments = self.build_segments(frame_count, overlap, &cuts);
        let plan = SegmentPlan {
            frame_count,
            overlap,
            segments,
            cuts,
            adjustments,
        };
        validate_segments(&plan.segments, frame_count)?;

        info!(
            frames = frame_count,
            segments = plan.len(),
            overlap,
            motion_based = plan.is_motion_based(),
            "Planned segments"
        );
        metrics::record_segment_plan(plan.len());
        Ok(plan)
    }

    fn place_cuts(
        &self,
        frame_count: usize,
        count: usize,
        overlap: usize,
        smoothed: &[f64],
    ) -> Vec<CutPoint> {
        let min_span = (2 * overlap).max(1);
        let base = frame_count / count;
        let mut cuts = Vec::with_capacity(count.saturating_sub(1));
        let mut previous = 0usize;

        for j in 1..count {
            // keep room for this segment and all the ones after it
            let lower = previous + min_span;
            let upper = frame_count - (count - j) * min_span;
            let uniform = (j * frame_count / count).clamp(lower, upper);

            let mut cut = CutPoint {
                index: j,
                frame: uniform,
                strategy: CutStrategy::Uniform,
            };
            if !smoothed.is_empty() {
                let reach = base / 4;
                let lo = (j * frame_count / count).saturating_sub(reach).max(lower);
                let hi = (j * frame_count / count + reach).min(upper);
                if lo <= hi {
                    if let Some(frame) = clear_minimum(smoothed, lo, hi, self.config.min_cut_contrast) {
                        cut.frame = frame;
                        cut.strategy = CutStrategy::MotionBased;
                    }
                }
            }
            previous = cut.frame;
            cuts.push(cut);
        }
        cuts
    }

    fn build_segments(&self, frame_count: usize, overlap: usize, cuts: &[CutPoint]) -> Vec<Segment> {
        let before = overlap / 2;
        let after = overlap - before;
        let count = cuts.len() + 1;
        (0..count)
            .map(|j| {
                let first = j == 0;
                let last = j + 1 == count;
                let start = if first { 0 } else { cuts[j - 1].frame - before };
                let end = if last { frame_count } else { cuts[j].frame + after };
                Segment {
                    index: j,
                    start,
                    end,
                    overlap_with_prev: if first { 0 } else { overlap },
                    overlap_with_next: if last { 0 } else { overlap },
                    label: self.config.label_for(j),
                }
            })
            .collect()
    }
}

/// Largest `(count, overlap)` not exceeding the request that fits `frame_count`.
///
/// Every segment must span at least twice the overlap between cuts.
fn fit_layout(frame_count: usize, count: usize, overlap: usize) -> (usize, usize) {
    let mut count = count.min(frame_count).max(1);
    loop {
        if count == 1 {
            return (1, 0);
        }
        let base = frame_count / count;
        if base >= 2 * overlap.max(1) {
            return (count, overlap);
        }
        if base >= 2 {
            return (count, base / 2);
        }
        count -= 1;
    }
}

/// Frame in `[lo, hi]` with the lowest smoothed motion, if it sits clearly
/// below the region's mean.
fn clear_minimum(smoothed: &[f64], lo: usize, hi: usize, contrast: f64) -> Option<usize> {
    let region = &smoothed[lo..=hi];
    let mean = region.iter().sum::<f64>() / region.len() as f64;
    let (offset, min) = region
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    if mean <= 0.0 || *min > mean * (1.0 - contrast) {
        return None;
    }
    Some(lo + offset)
}

/// Check that segments cover `[0, frame_count)` in order with consistent overlaps.
///
/// Every frame must belong to one segment, or to exactly two inside an
/// overlap window.
pub fn validate_segments(segments: &[Segment], frame_count: usize) -> MediaResult<()> {
    if frame_count == 0 {
        return if segments.is_empty() {
            Ok(())
        } else {
            Err(MediaError::malformed("segments given for an empty video"))
        };
    }
    let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
        return Err(MediaError::malformed("no segments"));
    };
    if first.start != 0 || first.overlap_with_prev != 0 {
        return Err(MediaError::malformed("first segment must start at frame 0"));
    }
    if last.end != frame_count || last.overlap_with_next != 0 {
        return Err(MediaError::malformed(format!(
            "last segment ends at {} but video has {} frames",
            last.end, frame_count
        )));
    }

    for (i, seg) in segments.iter().enumerate() {
        if seg.index != i {
            return Err(MediaError::malformed(format!(
                "segment at position {} has index {}",
                i, seg.index
            )));
        }
        if seg.start >= seg.end {
            return Err(MediaError::malformed(format!("segment {} is empty", i)));
        }
        let widest = seg.overlap_with_prev.max(seg.overlap_with_next);
        if seg.len() < 2 * widest {
            return Err(MediaError::malformed(format!(
                "segment {} spans {} frames, less than twice its overlap of {}",
                i,
                seg.len(),
                widest
            )));
        }
        if seg.overlap_with_prev + seg.overlap_with_next > seg.len() {
            return Err(MediaError::malformed(format!(
                "segment {} overlap windows intersect",
                i
            )));
        }
    }

    for pair in segments.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if b.start <= a.start || b.end <= a.end {
            return Err(MediaError::malformed(format!(
                "segments {} and {} are out of order",
                a.index, b.index
            )));
        }
        if a.overlap_with_next != b.overlap_with_prev {
            return Err(MediaError::malformed(format!(
                "segments {} and {} disagree on overlap",
                a.index, b.index
            )));
        }
        if b.start > a.end || a.end - b.start != a.overlap_with_next {
            return Err(MediaError::malformed(format!(
                "segments {} and {} share {} frames, expected {}",
                a.index,
                b.index,
                a.end.saturating_sub(b.start),
                a.overlap_with_next
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter(count: usize, overlap: usize) -> Segmenter {
        Segmenter::new(SegmentationConfig {
            segment_count: count,
            overlap_frames: overlap,
            ..Default::default()
        })
    }

    fn coverage(plan: &SegmentPlan) -> Vec<usize> {
        let mut counts = vec![0; plan.frame_count];
        for s in &plan.segments {
            for f in s.frame_range() {
                counts[f] += 1;
            }
        }
        counts
    }

    #[test]
    fn test_uniform_plan_for_150_frames() {
        let plan = segmenter(3, 5).segment(150, &[]).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.overlap, 5);
        assert!(!plan.is_motion_based());

        let cuts: Vec<usize> = plan.cuts.iter().map(|c| c.frame).collect();
        assert_eq!(cuts, vec![50, 100]);

        let s = &plan.segments;
        assert_eq!((s[0].start, s[0].end), (0, 53));
        assert_eq!((s[1].start, s[1].end), (48, 103));
        assert_eq!((s[2].start, s[2].end), (98, 150));
        assert_eq!(s[1].label, "hold");

        let counts = coverage(&plan);
        assert!(counts.iter().all(|&c| c == 1 || c == 2));
        assert_eq!(counts.iter().filter(|&&c| c == 2).count(), 10);
    }

    #[test]
    fn test_cut_moves_to_motion_minimum() {
        // busy everywhere except a lull around frame 58
        let mut motion = vec![10.0; 150];
        for m in motion.iter_mut().take(62).skip(55) {
            *m = 0.5;
        }
        let plan = segmenter(3, 5).segment(150, &motion).unwrap();
        assert_eq!(plan.cuts[0].strategy, CutStrategy::MotionBased);
        assert!((54..=62).contains(&plan.cuts[0].frame), "{:?}", plan.cuts);
        // flat region around the second cut keeps the uniform position
        assert_eq!(plan.cuts[1].strategy, CutStrategy::Uniform);
        assert_eq!(plan.cuts[1].frame, 100);
        validate_segments(&plan.segments, 150).unwrap();
    }

    #[test]
    fn test_minimum_outside_search_region_is_ignored() {
        let mut motion = vec![10.0; 150];
        motion[5] = 0.0;
        let plan = segmenter(3, 5).segment(150, &motion).unwrap();
        assert_eq!(plan.cuts[0].frame, 50);
    }

    #[test]
    fn test_short_video_narrows_overlap_then_count() {
        // 3 segments of 6 frames cannot hold an overlap of 5
        let plan = segmenter(3, 5).segment(18, &[]).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.overlap, 3);
        assert_eq!(plan.adjustments.len(), 1);
        validate_segments(&plan.segments, 18).unwrap();

        let plan = segmenter(3, 5).segment(4, &[]).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.overlap, 1);
        validate_segments(&plan.segments, 4).unwrap();

        let plan = segmenter(3, 5).segment(1, &[]).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.overlap, 0);
        assert_eq!(plan.segments[0].frame_range(), 0..1);
    }

    #[test]
    fn test_zero_frames_gives_empty_plan() {
        let plan = segmenter(3, 5).segment(0, &[]).unwrap();
        assert!(plan.is_empty());
        validate_segments(&plan.segments, 0).unwrap();
    }

    #[test]
    fn test_single_segment_has_no_overlap() {
        let plan = segmenter(1, 5).segment(40, &[]).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.segments[0].overlap_with_next, 0);
        assert!(plan.adjustments.is_empty());
    }

    #[test]
    fn test_validate_rejects_gaps_and_bad_overlap() {
        let seg = |index, start, end, prev, next| Segment {
            index,
            start,
            end,
            overlap_with_prev: prev,
            overlap_with_next: next,
            label: String::new(),
        };
        // gap between 10 and 12
        let gap = vec![seg(0, 0, 10, 0, 0), seg(1, 12, 20, 0, 0)];
        assert!(validate_segments(&gap, 20).is_err());
        // overlap claimed as 4 but segments share 2 frames
        let bad = vec![seg(0, 0, 12, 0, 4), seg(1, 10, 20, 4, 0)];
        assert!(validate_segments(&bad, 20).is_err());
        // does not reach the end
        let short = vec![seg(0, 0, 18, 0, 0)];
        assert!(matches!(
            validate_segments(&short, 20),
            Err(MediaError::MalformedSegments(_))
        ));
        // valid
        let ok = vec![seg(0, 0, 12, 0, 4), seg(1, 8, 20, 4, 0)];
        assert!(validate_segments(&ok, 20).is_ok());
    }
}
