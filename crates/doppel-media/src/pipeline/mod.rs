//! End-to-end replacement run over a decoded clip.
//!
//! Stages run in order: stabilize, plan segments, optionally reconstruct
//! the background, process and foot-lock each segment, blend overlaps,
//! and re-apply the original camera motion. A segment that fails or is
//! cancelled does not stop the others; the run then reports which
//! segments are missing and produces no frames.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use doppel_models::{MotionRecord, ReplacementConfig, SegmentPlan, SegmentStatus};
use tracing::{error, info, info_span, warn};

use crate::background::{BackgroundPlate, BackgroundReconstructor};
use crate::cancel::CancellationFlag;
use crate::error::{MediaError, MediaResult};
use crate::foot_lock::FootLocker;
use crate::frame::Frame;
use crate::generation::{
    Detection, FrameSynthesizer, PersonDetector, ResourceTracker, SegmentInput, SegmentOutput,
    SegmentProcessor,
};
use crate::metrics;
use crate::motion::subject_motion_magnitudes;
use crate::segmentation::{validate_segments, OverlapBlender, Segmenter};
use crate::stabilization::{reshake, Stabilizer};


/// State carried over from an earlier, unfinished run.
#[derive(Debug, Clone, Default)]
pub struct ResumeState {
    /// Motion records of the earlier run; stabilization is skipped when present
    pub motion: Option<Vec<MotionRecord>>,
    /// Segment plan of the earlier run
    pub plan: Option<SegmentPlan>,
    /// Outputs of segments that already completed, by segment index
    pub completed: BTreeMap<usize, SegmentOutput>,
}

impl ResumeState {
    pub fn is_empty(&self) -> bool {
        self.motion.is_none() && self.plan.is_none() && self.completed.is_empty()
    }
}

/// What happened to one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentOutcome {
    pub index: usize,
    pub status: SegmentStatus,
    /// Frame the segment stopped at, for failed or cancelled segments
    pub failed_frame: Option<usize>,
    pub error: Option<String>,
    /// Output was taken from the resume state instead of being generated
    pub resumed: bool,
}

impl SegmentOutcome {
    fn completed(index: usize, resumed: bool) -> Self {
        Self {
            index,
            status: SegmentStatus::Completed,
            failed_frame: None,
            error: None,
            resumed,
        }
    }
}

/// Result of a run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub motion: Vec<MotionRecord>,
    pub plan: SegmentPlan,
    pub outcomes: Vec<SegmentOutcome>,
    /// Final frames, present only when every segment completed
    pub frames: Option<Vec<Frame>>,
    /// Completed segment outputs, kept when the run did not finish
    pub partial: BTreeMap<usize, SegmentOutput>,
    pub background_used: bool,
}

impl PipelineReport {
    pub fn is_complete(&self) -> bool {
        self.frames.is_some()
    }

    pub fn failed_segments(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| o.status == SegmentStatus::Failed)
            .map(|o| o.index)
            .collect()
    }

    pub fn cancelled_segments(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| o.status == SegmentStatus::Cancelled)
            .map(|o| o.index)
            .collect()
    }

    /// Resume state for retrying the segments that did not complete.
    pub fn into_resume_state(self) -> ResumeState {
        ResumeState {
            motion: Some(self.motion),
            plan: Some(self.plan),
            completed: self.partial,
        }
    }
}

/// Hooks called as stages finish, used to persist progress.
pub trait PipelineObserver {
    fn on_stabilized(&mut self, _records: &[MotionRecord]) -> MediaResult<()> {
        Ok(())
    }

    fn on_plan(&mut self, _plan: &SegmentPlan) -> MediaResult<()> {
        Ok(())
    }

    fn on_segment_complete(&mut self, _output: &SegmentOutput) -> MediaResult<()> {
        Ok(())
    }

    fn on_segment_failed(&mut self, _outcome: &SegmentOutcome) -> MediaResult<()> {
        Ok(())
    }
}

/// Observer that ignores every event.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Orchestrates a full subject replacement run.
pub struct ReplacementPipeline {
    config: ReplacementConfig,
    detector: Arc<dyn PersonDetector>,
    synthesizer: Arc<dyn FrameSynthesizer>,
    stabilizer: Stabilizer,
    segmenter: Segmenter,
    foot_locker: FootLocker,
    background: BackgroundReconstructor,
    resources: ResourceTracker,
    cancel: CancellationFlag,
}

impl ReplacementPipeline {
    pub fn new(
        config: ReplacementConfig,
        detector: Arc<dyn PersonDetector>,
        synthesizer: Arc<dyn FrameSynthesizer>,
    ) -> MediaResult<Self> {
        config.validate()?;
        Ok(Self {
            stabilizer: Stabilizer::new(config.stabilization.clone()),
            segmenter: Segmenter::new(config.segmentation.clone()),
            foot_locker: FootLocker::new(config.foot_lock.clone()),
            background: BackgroundReconstructor::new(config.background.clone()),
            resources: ResourceTracker::new(),
            cancel: CancellationFlag::new(),
            config,
            detector,
            synthesizer,
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ReplacementConfig {
        &self.config
    }

    /// Scratch memory accounting shared with the segment processor.
    pub fn resources(&self) -> &ResourceTracker {
        &self.resources
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    pub fn run(&self, frames: Vec<Frame>, resume: ResumeState) -> MediaResult<PipelineReport> {
        self.run_with_observer(frames, resume, &mut NoopObserver)
    }

    /// Run every stage over `frames`, which must be indexed `0..len` in order.
    ///
    /// Segment failures and cancellations are reported in the outcomes.
    /// Structural problems (bad segment plan, frame count drift) and I/O
    /// errors from the observer abort the run.
    pub fn run_with_observer(
        &self,
        frames: Vec<Frame>,
        resume: ResumeState,
        observer: &mut dyn PipelineObserver,
    ) -> MediaResult<PipelineReport> {
        let frame_count = frames.len();
        let span = info_span!("replacement_run", frames = frame_count);
        let _guard = span.enter();

        if let Some((pos, frame)) = frames.iter().enumerate().find(|(pos, f)| f.index != *pos) {
            return Err(MediaError::malformed(format!(
                "input position {} holds frame {}",
                pos, frame.index
            )));
        }

        let ResumeState {
            motion,
            plan,
            completed: resumed,
        } = resume;

        let (stabilized, records) = match motion {
            Some(records) if records.len() == frame_count => {
                info!("Reusing persisted motion records");
                (Stabilizer::apply(&frames, &records)?, records)
            }
            other => {
                if let Some(records) = other {
                    warn!(
                        records = records.len(),
                        frames = frame_count,
                        "Persisted motion records do not match the clip, recomputing"
                    );
                }
                let result = self.stabilizer.stabilize(&frames)?;
                (result.frames, result.records)
            }
        };
        drop(frames);
        observer.on_stabilized(&records)?;

        let plan = match plan {
            Some(plan) => {
                info!(segments = plan.len(), "Reusing persisted segment plan");
                plan
            }
            None => {
                let magnitudes = subject_motion_magnitudes(&stabilized);
                self.segmenter.segment(frame_count, &magnitudes)?
            }
        };
        validate_segments(&plan.segments, frame_count)?;
        metrics::record_segment_plan(plan.len());
        observer.on_plan(&plan)?;
        info!(
            segments = plan.len(),
            overlap = plan.overlap,
            motion_based = plan.is_motion_based(),
            "Segment plan ready"
        );

        // detections made for the plate are handed on so no frame is detected twice
        let (plate, sampled) = if self.config.background.enabled {
            self.build_plate(&stabilized)
        } else {
            (None, BTreeMap::new())
        };

        let processor =
            SegmentProcessor::new(&self.config, self.detector.as_ref(), self.synthesizer.as_ref())
                .with_resources(self.resources.clone())
                .with_cancellation(self.cancel.clone());

        let mut completed = BTreeMap::new();
        for (index, output) in resumed {
            match plan.segments.get(index) {
                Some(seg) if *seg == output.segment && output.frames.len() == seg.len() => {
                    completed.insert(index, output);
                }
                _ => warn!(segment = index, "Resumed output does not match the plan, regenerating"),
            }
        }

        let mut outcomes = Vec::with_capacity(plan.len());
        for segment in &plan.segments {
            if completed.contains_key(&segment.index) {
                info!(segment = segment.index, "Segment already completed, skipping");
                outcomes.push(SegmentOutcome::completed(segment.index, true));
                continue;
            }
            if self.cancel.is_cancelled() {
                let outcome = SegmentOutcome {
                    index: segment.index,
                    status: SegmentStatus::Cancelled,
                    failed_frame: None,
                    error: Some(MediaError::Cancelled.to_string()),
                    resumed: false,
                };
                observer.on_segment_failed(&outcome)?;
                outcomes.push(outcome);
                continue;
            }

            let started = Instant::now();
            let result = processor
                .process(SegmentInput {
                    segment,
                    frames: &stabilized[segment.frame_range()],
                    plate: plate.as_ref(),
                    detections: Some(&sampled),
                })
                .and_then(|output| self.lock_feet(output));

            match result {
                Ok(output) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    metrics::record_segment_completed(segment.index, elapsed);
                    info!(
                        segment = segment.index,
                        elapsed_secs = elapsed,
                        oracle_calls = output.stats.oracle_calls,
                        foot_corrections = output.stats.foot_corrections,
                        "Segment completed"
                    );
                    observer.on_segment_complete(&output)?;
                    outcomes.push(SegmentOutcome::completed(segment.index, false));
                    completed.insert(segment.index, output);
                }
                Err(e) if e.is_segment_fatal() => {
                    let (status, reason) = match &e {
                        MediaError::SegmentFailed { source, .. } => {
                            (SegmentStatus::Failed, source.reason())
                        }
                        _ => (SegmentStatus::Cancelled, "cancelled"),
                    };
                    error!(segment = segment.index, error = %e, "Segment did not complete");
                    metrics::record_segment_failed(segment.index, reason);
                    let outcome = SegmentOutcome {
                        index: segment.index,
                        status,
                        failed_frame: e.failure_location().map(|(_, frame)| frame),
                        error: Some(e.to_string()),
                        resumed: false,
                    };
                    observer.on_segment_failed(&outcome)?;
                    outcomes.push(outcome);
                }
                Err(e) => return Err(e),
            }
        }

        let background_used = plate.is_some();
        drop(plate);
        drop(stabilized);

        if completed.len() != plan.len() {
            warn!(
                completed = completed.len(),
                segments = plan.len(),
                "Run incomplete, skipping assembly"
            );
            return Ok(PipelineReport {
                motion: records,
                plan,
                outcomes,
                frames: None,
                partial: completed,
                background_used,
            });
        }

        let outputs: Vec<SegmentOutput> = completed.into_values().collect();
        let assembled = OverlapBlender::new().assemble(frame_count, &outputs)?;
        drop(outputs);
        let restored = reshake::apply(assembled, &records)?;
        if restored.len() != frame_count {
            return Err(MediaError::FrameCountMismatch {
                expected: frame_count,
                actual: restored.len(),
            });
        }
        info!(frames = restored.len(), "Run complete");

        Ok(PipelineReport {
            motion: records,
            plan,
            outcomes,
            frames: Some(restored),
            partial: BTreeMap::new(),
            background_used,
        })
    }

    fn lock_feet(&self, output: SegmentOutput) -> MediaResult<SegmentOutput> {
        let SegmentOutput {
            segment,
            frames,
            keypoints,
            mut stats,
            ..
        } = output;
        let locked = self.foot_locker.lock(&segment, frames, &keypoints)?;
        stats.foot_corrections = locked.corrections;
        Ok(SegmentOutput {
            segment,
            frames: locked.frames,
            keypoints,
            contacts: locked.records,
            stats,
        })
    }

    /// Detect the person on every `sample_stride`-th frame and build a plate.
    ///
    /// Returns the sampled detections too, keyed by frame index.
    fn build_plate(
        &self,
        frames: &[Frame],
    ) -> (Option<BackgroundPlate>, BTreeMap<usize, Detection>) {
        let stride = self.config.background.sample_stride.max(1);
        let sampled: Vec<Frame> = frames.iter().step_by(stride).cloned().collect();
        let detections: BTreeMap<usize, Detection> = sampled
            .iter()
            .map(|f| (f.index, self.detector.detect(f)))
            .collect();
        let masks: Vec<_> = sampled
            .iter()
            .map(|f| detections.get(&f.index).and_then(|d| d.mask.clone()))
            .collect();
        let plate = self.background.reconstruct(&sampled, &masks);
        if plate.is_none() {
            warn!("Background plate unavailable, compositing over source pixels");
        }
        (plate, detections)
    }
}
