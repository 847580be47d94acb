//! Cross-fading processed segments back into one frame sequence.

use tracing::debug;

use super::segmenter::validate_segments;
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::generation::SegmentOutput;
use crate::imaging::blend;

/// Joins segment outputs, blending each overlap window linearly.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlapBlender;

impl OverlapBlender {
    pub fn new() -> Self {
        Self
    }

    /// Weight of the later segment at position `k` of an overlap of width `width`.
    ///
    /// Rises from near 0 to near 1 across the window and never reaches
    /// either end, so both sides always contribute.
    pub fn crossfade_weight(k: usize, width: usize) -> f32 {
        if width == 0 {
            return 1.0;
        }
        (k as f32 + 0.5) / width as f32
    }

    /// Assemble exactly `frame_count` frames, one per source index, in order.
    ///
    /// Outside overlaps each frame comes from its single segment. Inside an
    /// overlap window the earlier and later segment's frames are cross-faded.
    pub fn assemble(&self, frame_count: usize, outputs: &[SegmentOutput]) -> MediaResult<Vec<Frame>> {
        let mut ordered: Vec<&SegmentOutput> = outputs.iter().collect();
        ordered.sort_by_key(|o| o.segment.index);
        let segments: Vec<_> = ordered.iter().map(|o| o.segment.clone()).collect();
        validate_segments(&segments, frame_count)?;

        for output in &ordered {
            if output.frames.len() != output.segment.len() {
                return Err(MediaError::FrameCountMismatch {
                    expected: output.segment.len(),
                    actual: output.frames.len(),
                });
            }
        }

        let mut assembled = Vec::with_capacity(frame_count);
        for (i, output) in ordered.iter().enumerate() {
            let seg = &output.segment;
            for global in seg.core_range() {
                assembled.push(output.frames[global - seg.start].clone());
            }

            let Some(next) = ordered.get(i + 1) else {
                continue;
            };
            let width = seg.overlap_with_next;
            for k in 0..width {
                let global = next.segment.start + k;
                let earlier = &output.frames[global - seg.start];
                let later = &next.frames[k];
                if earlier.index != global || later.index != global {
                    return Err(MediaError::malformed(format!(
                        "overlap frame {} of segments {} and {} carries indices {} and {}",
                        global, seg.index, next.segment.index, earlier.index, later.index
                    )));
                }
                let w = Self::crossfade_weight(k, width);
                let image = blend(&later.image, &earlier.image, w)?;
                assembled.push(earlier.with_image(image));
            }
        }

        if assembled.len() != frame_count {
            return Err(MediaError::FrameCountMismatch {
                expected: frame_count,
                actual: assembled.len(),
            });
        }
        if let Some((pos, frame)) = assembled
            .iter()
            .enumerate()
            .find(|(pos, f)| f.index != *pos)
        {
            return Err(MediaError::malformed(format!(
                "assembled position {} holds frame {}",
                pos, frame.index
            )));
        }
        debug!(frames = assembled.len(), segments = ordered.len(), "Assembled segments");
        Ok(assembled)
    }
}
