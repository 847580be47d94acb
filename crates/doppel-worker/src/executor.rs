//! Run executor: decode, replace, encode.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use doppel_media::codec::{decode_frames, encode_frames, EncodeSettings, VideoInfo};
use doppel_media::frame::Frame;
use doppel_media::{
    CancellationFlag, FrameSynthesizer, MediaError, PersonDetector, PipelineReport,
    ReplacementPipeline, ResumeState,
};
use doppel_models::{ReplacementConfig, RunId, RunManifest};
use tracing::{info, warn, Instrument};

use crate::artifacts::{ArtifactObserver, RunArtifacts};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::RunLogger;
use crate::ml_client::{HttpFrameSynthesizer, HttpPersonDetector};

/// Source of the detector and synthesizer for a run.
///
/// `connect` is called on the blocking thread that runs the pipeline, and
/// the returned collaborators are dropped there as well.
pub trait Collaborators: Send + Sync {
    #[allow(clippy::type_complexity)]
    fn connect(&self) -> WorkerResult<(Arc<dyn PersonDetector>, Arc<dyn FrameSynthesizer>)>;
}

/// Collaborators backed by the detection and synthesis services.
#[derive(Debug, Clone)]
pub struct HttpCollaborators {
    config: WorkerConfig,
}

impl HttpCollaborators {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }
}

impl Collaborators for HttpCollaborators {
    fn connect(&self) -> WorkerResult<(Arc<dyn PersonDetector>, Arc<dyn FrameSynthesizer>)> {
        let detector = HttpPersonDetector::new(&self.config.detector_url, self.config.request_timeout)?;
        let synthesizer =
            HttpFrameSynthesizer::new(&self.config.synthesizer_url, self.config.request_timeout)?;
        Ok((Arc::new(detector), Arc::new(synthesizer)))
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: RunId,
    pub output: PathBuf,
    pub frame_count: usize,
    pub segments: usize,
    /// Segments taken from an earlier attempt
    pub resumed_segments: usize,
    pub background_used: bool,
}

/// Executes replacement runs end to end.
pub struct JobExecutor {
    config: WorkerConfig,
    pipeline_config: ReplacementConfig,
    collaborators: Arc<dyn Collaborators>,
    cancel: CancellationFlag,
}

impl JobExecutor {
    pub fn new(
        config: WorkerConfig,
        pipeline_config: ReplacementConfig,
        collaborators: Arc<dyn Collaborators>,
    ) -> WorkerResult<Self> {
        pipeline_config.validate()?;
        Ok(Self {
            config,
            pipeline_config,
            collaborators,
            cancel: CancellationFlag::new(),
        })
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    /// Replace the subject in `input` and write the result to `output`.
    ///
    /// Progress is persisted under the run directory. Executing the same
    /// run id again after a failure resumes from the completed segments.
    pub async fn execute(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        run_id: RunId,
    ) -> WorkerResult<RunSummary> {
        let logger = RunLogger::new(&run_id, "replacement");
        let span = logger.create_span();
        self.execute_inner(input.as_ref(), output.as_ref(), run_id, &logger)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        input: &Path,
        output: &Path,
        run_id: RunId,
        logger: &RunLogger,
    ) -> WorkerResult<RunSummary> {
        let started = Instant::now();
        logger.log_start(&format!("{} -> {}", input.display(), output.display()));

        let (info, frames) = decode_frames(input).await?;
        let frame_count = frames.len();
        logger.log_progress(&format!(
            "decoded {} frames at {}x{}, {:.3} fps",
            frame_count, info.width, info.height, info.fps
        ));

        let artifacts = RunArtifacts::create(self.config.run_dir(run_id.as_str()))?;
        let (manifest, resumable) =
            prepare_manifest(&artifacts, &run_id, input, &info, frame_count, &self.pipeline_config)?;
        artifacts.save_manifest(&manifest)?;
        if resumable {
            logger.log_progress("resuming from earlier attempt");
        }

        let pipeline_config = self.pipeline_config.clone();
        let collaborators = self.collaborators.clone();
        let cancel = self.cancel.clone();
        let (report, manifest) = tokio::task::spawn_blocking(move || {
            run_replacement(
                pipeline_config,
                collaborators.as_ref(),
                cancel,
                artifacts,
                manifest,
                frames,
                resumable,
            )
        })
        .await
        .map_err(|e| WorkerError::run_failed(format!("pipeline task panicked: {}", e)))??;

        let resumed_segments = report.outcomes.iter().filter(|o| o.resumed).count();
        let Some(frames) = report.frames else {
            let failed = report.failed_segments();
            let cancelled = report.cancelled_segments();
            if self.cancel.is_cancelled() {
                logger.log_warning(&format!(
                    "cancelled with segments {:?} unfinished; completed segments kept",
                    cancelled
                ));
                return Err(WorkerError::Cancelled);
            }
            let message = format!(
                "segments {:?} failed, {} of {} completed; run again with id {} to resume",
                failed,
                manifest.completed_segments().len(),
                report.plan.len(),
                run_id
            );
            logger.log_error(&message);
            return Err(WorkerError::run_failed(message));
        };

        if frames.len() != frame_count {
            return Err(MediaError::FrameCountMismatch {
                expected: frame_count,
                actual: frames.len(),
            }
            .into());
        }

        let settings = EncodeSettings {
            crf: self.config.output_crf,
            preset: self.config.output_preset.clone(),
            timeout_secs: Some(self.config.encode_timeout.as_secs()),
            ..EncodeSettings::default()
        }
        .with_fps(info.fps);
        encode_frames(&frames, output, &settings).await?;

        logger.log_completion(&format!(
            "{} frames, {} segments ({} resumed) in {:.1}s",
            frame_count,
            report.plan.len(),
            resumed_segments,
            started.elapsed().as_secs_f64()
        ));
        Ok(RunSummary {
            run_id,
            output: output.to_path_buf(),
            frame_count,
            segments: report.plan.len(),
            resumed_segments,
            background_used: report.background_used,
        })
    }
}

/// Reuse the run's manifest when it describes the same clip (source path,
/// frame count and size) and configuration, otherwise start a fresh one.
///
/// Returns the manifest and whether earlier artifacts may be resumed.
pub(crate) fn prepare_manifest(
    artifacts: &RunArtifacts,
    run_id: &RunId,
    input: &Path,
    info: &VideoInfo,
    frame_count: usize,
    config: &ReplacementConfig,
) -> WorkerResult<(RunManifest, bool)> {
    if let Some(existing) = artifacts.load_manifest()? {
        let same_clip = existing.input == input.to_string_lossy()
            && existing.frame_count == frame_count
            && existing.width == info.width
            && existing.height == info.height;
        if same_clip && existing.config == *config {
            info!(
                run_id = %run_id,
                completed = existing.completed_segments().len(),
                "Found earlier attempt of this run"
            );
            return Ok((existing, true));
        }
        warn!(
            run_id = %run_id,
            same_clip,
            "Existing run artifacts do not match this clip or configuration, starting over"
        );
    }
    let manifest = RunManifest::new(
        run_id.clone(),
        input.to_string_lossy(),
        frame_count,
        info.fps,
        info.width,
        info.height,
        config.clone(),
    );
    Ok((manifest, false))
}

/// Blocking part of a run: connect collaborators, run the pipeline and
/// persist progress through the run artifacts.
pub(crate) fn run_replacement(
    config: ReplacementConfig,
    collaborators: &dyn Collaborators,
    cancel: CancellationFlag,
    artifacts: RunArtifacts,
    manifest: RunManifest,
    frames: Vec<Frame>,
    resumable: bool,
) -> WorkerResult<(PipelineReport, RunManifest)> {
    let resume = if resumable {
        artifacts.load_resume_state()?
    } else {
        ResumeState::default()
    };
    let (detector, synthesizer) = collaborators.connect()?;
    let pipeline = ReplacementPipeline::new(config, detector, synthesizer)?.with_cancellation(cancel);
    let mut observer = ArtifactObserver::new(artifacts, manifest);
    let report = pipeline.run_with_observer(frames, resume, &mut observer)?;
    Ok((report, observer.into_manifest()))
}
