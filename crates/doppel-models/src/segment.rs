//! Temporal segments.

use std::ops::Range;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How a cut point between two segments was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CutStrategy {
    /// Placed at a clear minimum of subject motion
    MotionBased,
    /// Placed at an evenly spaced position
    Uniform,
}

impl CutStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CutStrategy::MotionBased => "motion_based",
            CutStrategy::Uniform => "uniform",
        }
    }
}

/// Boundary between segment `index - 1` and segment `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CutPoint {
    /// Index of the segment that starts at this cut
    pub index: usize,
    /// Frame at the center of the overlap window
    pub frame: usize,
    pub strategy: CutStrategy,
}

/// A contiguous range of frames processed as one unit.
///
/// `start` is inclusive and `end` is exclusive. The first `overlap_with_prev`
/// frames are shared with the previous segment, the last `overlap_with_next`
/// frames with the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Segment {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    #[serde(default)]
    pub overlap_with_prev: usize,
    #[serde(default)]
    pub overlap_with_next: usize,
    /// Human readable phase label (e.g. "approach", "hold", "exit")
    #[serde(default)]
    pub label: String,
}

impl Segment {
    /// Number of frames covered, overlaps included.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frame_range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn contains(&self, frame: usize) -> bool {
        self.frame_range().contains(&frame)
    }

    /// Frames owned by this segment alone.
    pub fn core_range(&self) -> Range<usize> {
        let lo = self.start + self.overlap_with_prev;
        let hi = self.end.saturating_sub(self.overlap_with_next).max(lo);
        lo..hi
    }

    /// Frames shared with the next segment.
    pub fn trailing_overlap(&self) -> Range<usize> {
        self.end - self.overlap_with_next..self.end
    }

    /// Position of a global frame index inside this segment.
    pub fn local_offset(&self, frame: usize) -> Option<usize> {
        self.contains(frame).then(|| frame - self.start)
    }
}

/// Ordered list of segments covering a whole video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SegmentPlan {
    /// Total number of frames the plan covers
    pub frame_count: usize,
    /// Overlap window width used between adjacent segments
    pub overlap: usize,
    pub segments: Vec<Segment>,
    pub cuts: Vec<CutPoint>,
    /// Adjustments made to the requested segment count or overlap
    #[serde(default)]
    pub adjustments: Vec<String>,
}

impl SegmentPlan {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segments that contain a given frame (one, or two inside an overlap).
    pub fn segments_for_frame(&self, frame: usize) -> Vec<&Segment> {
        self.segments.iter().filter(|s| s.contains(frame)).collect()
    }

    /// True when every cut landed on a motion minimum.
    pub fn is_motion_based(&self) -> bool {
        !self.cuts.is_empty()
            && self
                .cuts
                .iter()
                .all(|c| c.strategy == CutStrategy::MotionBased)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(index: usize, start: usize, end: usize, prev: usize, next: usize) -> Segment {
        Segment {
            index,
            start,
            end,
            overlap_with_prev: prev,
            overlap_with_next: next,
            label: String::new(),
        }
    }

    #[test]
    fn test_core_and_overlap_ranges() {
        let s = segment(1, 48, 102, 5, 5);
        assert_eq!(s.len(), 54);
        assert_eq!(s.core_range(), 53..97);
        assert_eq!(s.trailing_overlap(), 97..102);
        assert_eq!(s.local_offset(48), Some(0));
        assert_eq!(s.local_offset(102), None);
    }

    #[test]
    fn test_segments_for_frame() {
        let plan = SegmentPlan {
            frame_count: 20,
            overlap: 4,
            segments: vec![segment(0, 0, 12, 0, 4), segment(1, 8, 20, 4, 0)],
            cuts: vec![CutPoint {
                index: 1,
                frame: 10,
                strategy: CutStrategy::Uniform,
            }],
            adjustments: Vec::new(),
        };
        assert_eq!(plan.segments_for_frame(3).len(), 1);
        assert_eq!(plan.segments_for_frame(9).len(), 2);
        assert!(!plan.is_motion_based());
    }

    #[test]
    fn test_cut_strategy_serialization() {
        let json = serde_json::to_string(&CutStrategy::MotionBased).unwrap();
        assert_eq!(json, "\"motion_based\"");
        assert_eq!(CutStrategy::Uniform.as_str(), "uniform");
    }
}
