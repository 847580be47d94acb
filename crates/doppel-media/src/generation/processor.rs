//! Per-segment generation: detect, condition, synthesize, stabilize, composite.

use std::collections::BTreeMap;
use std::time::Instant;

use doppel_models::{ContactRecord, PoseKeypoints, ReplacementConfig, Segment};
use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use super::compositor::Compositor;
use super::consistency::{PreviousOutput, TemporalBlender};
use super::controls::ControlExtractor;
use super::providers::{Detection, FrameSynthesizer, PersonDetector, SynthesisError};
use super::resources::{ResourceTracker, Scoped};
use crate::background::BackgroundPlate;
use crate::cancel::CancellationFlag;
use crate::error::{MediaError, MediaResult};
use crate::frame::{Frame, Mask};
use crate::imaging::luma;
use crate::metrics;

/// Frames of one segment plus the shared background plate.
#[derive(Debug, Clone, Copy)]
pub struct SegmentInput<'a> {
    pub segment: &'a Segment,
    /// Stabilized frames `segment.start..segment.end`
    pub frames: &'a [Frame],
    pub plate: Option<&'a BackgroundPlate>,
    /// Detections already made for some of these frames, by frame index
    pub detections: Option<&'a BTreeMap<usize, Detection>>,
}

/// Counters collected while processing a segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentStats {
    pub oracle_calls: usize,
    /// Frames emitted unchanged because no subject mask was available
    pub passthrough_frames: usize,
    /// Frames that reused an earlier mask after a detector miss
    pub reused_masks: usize,
    pub missing_keypoints: usize,
    /// Oracle outputs resized to frame resolution
    pub resized_outputs: usize,
    pub foot_corrections: usize,
    pub peak_scratch_bytes: usize,
}

/// Processed frames of one segment.
#[derive(Debug, Clone)]
pub struct SegmentOutput {
    pub segment: Segment,
    /// One frame per input frame, same indices and timestamps
    pub frames: Vec<Frame>,
    /// Detected keypoints per frame
    pub keypoints: Vec<Option<PoseKeypoints>>,
    /// Foot contact log, filled by the foot locker
    pub contacts: Vec<ContactRecord>,
    pub stats: SegmentStats,
}

/// Runs the generation loop over the frames of one segment.
///
/// Temporal state (previous output, last good mask) lives only for the
/// duration of one [`process`](Self::process) call, so segments never see
/// each other's frames.
pub struct SegmentProcessor<'a> {
    detector: &'a dyn PersonDetector,
    synthesizer: &'a dyn FrameSynthesizer,
    style: String,
    controls: ControlExtractor,
    temporal: TemporalBlender,
    compositor: Compositor,
    resources: ResourceTracker,
    cancel: CancellationFlag,
}

impl<'a> SegmentProcessor<'a> {
    pub fn new(
        config: &ReplacementConfig,
        detector: &'a dyn PersonDetector,
        synthesizer: &'a dyn FrameSynthesizer,
    ) -> Self {
        Self {
            detector,
            synthesizer,
            style: config.style_description.clone(),
            controls: ControlExtractor::new(config.pose_min_confidence, config.edge_threshold),
            temporal: TemporalBlender::new(config.consistency.clone()),
            compositor: Compositor::new(config.feather_sigma, config.background.min_confidence),
            resources: ResourceTracker::new(),
            cancel: CancellationFlag::new(),
        }
    }

    pub fn with_resources(mut self, resources: ResourceTracker) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn resources(&self) -> &ResourceTracker {
        &self.resources
    }

    /// Process every frame of the segment in order.
    ///
    /// An oracle failure aborts the segment with [`MediaError::SegmentFailed`];
    /// cancellation is honored before each frame.
    pub fn process(&self, input: SegmentInput<'_>) -> MediaResult<SegmentOutput> {
        let segment = input.segment;
        if input.frames.len() != segment.len() {
            return Err(MediaError::FrameCountMismatch {
                expected: segment.len(),
                actual: input.frames.len(),
            });
        }
        if let Some((offset, frame)) = input
            .frames
            .iter()
            .enumerate()
            .find(|(offset, f)| f.index != segment.start + offset)
        {
            return Err(MediaError::malformed(format!(
                "segment {} position {} holds frame {}",
                segment.index, offset, frame.index
            )));
        }

        let span = info_span!("segment", index = segment.index, label = %segment.label);
        let _guard = span.enter();
        info!(
            start = segment.start,
            end = segment.end,
            "Processing segment"
        );

        self.resources.reset_peak();
        let mut stats = SegmentStats::default();
        let mut frames = Vec::with_capacity(input.frames.len());
        let mut keypoints = Vec::with_capacity(input.frames.len());
        let mut last_mask: Option<Scoped<Mask>> = None;
        let mut previous: Option<Scoped<PreviousOutput>> = None;

        for frame in input.frames {
            if self.cancel.is_cancelled() {
                warn!(frame = frame.index, "Cancellation requested, abandoning segment");
                return Err(MediaError::SegmentCancelled {
                    segment: segment.index,
                    frame: frame.index,
                });
            }

            let detection = match input.detections.and_then(|d| d.get(&frame.index)) {
                Some(known) => known.clone(),
                None => self.detector.detect(frame),
            };
            if detection.keypoints.is_none() {
                stats.missing_keypoints += 1;
            }
            let fresh = detection
                .mask
                .filter(|m| !m.is_empty() && m.dimensions() == frame.dimensions());
            match fresh {
                Some(mask) => last_mask = Some(self.resources.track(mask)),
                None => {
                    metrics::record_detection_miss();
                    if last_mask.is_some() {
                        stats.reused_masks += 1;
                        warn!(frame = frame.index, "No person detected, reusing previous mask");
                    }
                }
            }

            let Some(mask) = last_mask.as_deref() else {
                warn!(
                    frame = frame.index,
                    "No person detected and no earlier mask in segment, passing frame through"
                );
                stats.passthrough_frames += 1;
                frames.push(frame.clone());
                keypoints.push(detection.keypoints);
                previous = None;
                continue;
            };

            let current_luma = self.resources.track(luma(&frame.image));
            let controls = self.resources.track(self.controls.extract(
                frame,
                mask,
                detection.keypoints.as_ref(),
            ));

            stats.oracle_calls += 1;
            let started = Instant::now();
            let generated = self
                .synthesizer
                .synthesize(frame, &controls, &self.style)
                .and_then(|img| {
                    if img.width() == 0 || img.height() == 0 {
                        Err(SynthesisError::InvalidOutput("empty image".to_string()))
                    } else {
                        Ok(img)
                    }
                })
                .map_err(|e| {
                    warn!(frame = frame.index, error = %e, "Synthesis failed");
                    MediaError::segment_failed(segment.index, frame.index, e)
                });
            metrics::record_oracle_call(started.elapsed().as_secs_f64());
            let generated = generated?;
            drop(controls);

            let generated = if generated.dimensions() != frame.dimensions() {
                stats.resized_outputs += 1;
                debug!(
                    frame = frame.index,
                    from = ?generated.dimensions(),
                    to = ?frame.dimensions(),
                    "Resizing synthesized frame"
                );
                imageops::resize(&generated, frame.width(), frame.height(), FilterType::Lanczos3)
            } else {
                generated
            };
            let generated = self.resources.track(generated);

            let blended = self.resources.track(self.temporal.blend(
                &generated,
                &current_luma,
                previous.as_deref(),
                &self.resources,
            )?);
            drop(generated);

            let composite = self
                .compositor
                .composite(&blended, frame, mask, input.plate)?;
            frames.push(frame.with_image(composite));
            keypoints.push(detection.keypoints);

            previous = Some(self.resources.track(PreviousOutput {
                source_luma: current_luma.into_inner(),
                image: blended.into_inner(),
            }));
        }

        stats.peak_scratch_bytes = self.resources.peak_bytes();
        metrics::record_scratch_peak(stats.peak_scratch_bytes);
        info!(
            frames = frames.len(),
            oracle_calls = stats.oracle_calls,
            passthrough = stats.passthrough_frames,
            reused_masks = stats.reused_masks,
            "Segment generated"
        );

        Ok(SegmentOutput {
            segment: segment.clone(),
            frames,
            keypoints,
            contacts: Vec::new(),
            stats,
        })
    }
}
