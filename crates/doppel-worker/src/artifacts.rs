//! Run directory layout, persistence and resume.
//!
//! ```text
//! <run_dir>/
//!   manifest.json         run metadata and per-segment status
//!   transforms.json       per-frame motion records
//!   segments.json         segment plan
//!   contacts/seg_001.json foot contact log per segment
//!   seg_001/              completed segment frames (PNG) and meta.json
//! ```
//!
//! JSON files are written to a temporary name and renamed into place so an
//! interrupted write never leaves a truncated file behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use doppel_media::frame::Frame;
use doppel_media::stabilization::{load_motion_records, save_motion_records};
use doppel_media::{
    MediaError, MediaResult, PipelineObserver, ResumeState, SegmentOutcome, SegmentOutput,
    SegmentStats,
};
use doppel_models::{
    ContactRecord, MotionRecord, PoseKeypoints, RunManifest, Segment, SegmentPlan, SegmentStatus,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{WorkerError, WorkerResult};

const MANIFEST_FILE: &str = "manifest.json";
const TRANSFORMS_FILE: &str = "transforms.json";
const SEGMENTS_FILE: &str = "segments.json";
const CONTACTS_DIR: &str = "contacts";
const SEGMENT_META_FILE: &str = "meta.json";

/// Per-frame metadata of a persisted segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrameMeta {
    index: usize,
    timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SegmentMeta {
    segment: Segment,
    frames: Vec<FrameMeta>,
    keypoints: Vec<Option<PoseKeypoints>>,
    stats: SegmentStats,
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> WorkerResult<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json_opt<T: DeserializeOwned>(path: &Path) -> WorkerResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Files of one run.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    root: PathBuf,
}

impl RunArtifacts {
    /// Create the run directory if needed.
    pub fn create(root: impl Into<PathBuf>) -> WorkerResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(CONTACTS_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn transforms_path(&self) -> PathBuf {
        self.root.join(TRANSFORMS_FILE)
    }

    pub fn segments_path(&self) -> PathBuf {
        self.root.join(SEGMENTS_FILE)
    }

    pub fn contacts_path(&self, segment: usize) -> PathBuf {
        self.root
            .join(CONTACTS_DIR)
            .join(format!("seg_{:03}.json", segment))
    }

    pub fn segment_dir(&self, segment: usize) -> PathBuf {
        self.root.join(format!("seg_{:03}", segment))
    }

    pub fn save_manifest(&self, manifest: &RunManifest) -> WorkerResult<()> {
        write_json_atomic(&self.manifest_path(), manifest)
    }

    pub fn load_manifest(&self) -> WorkerResult<Option<RunManifest>> {
        read_json_opt(&self.manifest_path())
    }

    pub fn save_transforms(&self, records: &[MotionRecord]) -> WorkerResult<()> {
        let path = self.transforms_path();
        let tmp = path.with_extension("json.tmp");
        save_motion_records(&tmp, records)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn load_transforms(&self) -> WorkerResult<Option<Vec<MotionRecord>>> {
        match load_motion_records(self.transforms_path()) {
            Ok(records) => Ok(Some(records)),
            Err(MediaError::FileNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save_plan(&self, plan: &SegmentPlan) -> WorkerResult<()> {
        write_json_atomic(&self.segments_path(), plan)
    }

    pub fn load_plan(&self) -> WorkerResult<Option<SegmentPlan>> {
        read_json_opt(&self.segments_path())
    }

    pub fn save_contacts(&self, segment: usize, records: &[ContactRecord]) -> WorkerResult<()> {
        write_json_atomic(&self.contacts_path(segment), records)
    }

    pub fn load_contacts(&self, segment: usize) -> WorkerResult<Vec<ContactRecord>> {
        Ok(read_json_opt(&self.contacts_path(segment))?.unwrap_or_default())
    }

    /// Persist a completed segment: one PNG per frame plus metadata.
    ///
    /// The metadata is written last; a directory without it is incomplete.
    pub fn save_segment_output(&self, output: &SegmentOutput) -> WorkerResult<()> {
        let dir = self.segment_dir(output.segment.index);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        for frame in &output.frames {
            frame
                .image
                .save_with_format(dir.join(format!("frame_{:06}.png", frame.index)), image::ImageFormat::Png)?;
        }
        self.save_contacts(output.segment.index, &output.contacts)?;
        let meta = SegmentMeta {
            segment: output.segment.clone(),
            frames: output
                .frames
                .iter()
                .map(|f| FrameMeta {
                    index: f.index,
                    timestamp: f.timestamp,
                })
                .collect(),
            keypoints: output.keypoints.clone(),
            stats: output.stats.clone(),
        };
        write_json_atomic(&dir.join(SEGMENT_META_FILE), &meta)?;
        debug!(
            segment = output.segment.index,
            frames = output.frames.len(),
            dir = %dir.display(),
            "Saved segment output"
        );
        Ok(())
    }

    /// Load a persisted segment if it matches `expected`.
    ///
    /// Returns `None` for missing, incomplete or mismatched segments.
    pub fn load_segment_output(&self, expected: &Segment) -> WorkerResult<Option<SegmentOutput>> {
        let dir = self.segment_dir(expected.index);
        let Some(meta) = read_json_opt::<SegmentMeta>(&dir.join(SEGMENT_META_FILE))? else {
            return Ok(None);
        };
        if meta.segment != *expected || meta.frames.len() != expected.len() {
            warn!(
                segment = expected.index,
                "Persisted segment does not match the plan, discarding"
            );
            return Ok(None);
        }
        let mut frames = Vec::with_capacity(meta.frames.len());
        for fm in &meta.frames {
            let path = dir.join(format!("frame_{:06}.png", fm.index));
            if !path.exists() {
                warn!(segment = expected.index, frame = fm.index, "Persisted frame missing");
                return Ok(None);
            }
            let image = image::open(&path)?.to_rgb8();
            frames.push(Frame::new(fm.index, fm.timestamp, image));
        }
        let keypoints = if meta.keypoints.len() == frames.len() {
            meta.keypoints
        } else {
            vec![None; frames.len()]
        };
        Ok(Some(SegmentOutput {
            segment: meta.segment,
            frames,
            keypoints,
            contacts: self.load_contacts(expected.index)?,
            stats: meta.stats,
        }))
    }

    /// Collect everything an earlier attempt of this run left behind.
    ///
    /// Completed segments are only taken when the manifest says so and
    /// their frames load back intact.
    pub fn load_resume_state(&self) -> WorkerResult<ResumeState> {
        let Some(manifest) = self.load_manifest()? else {
            return Ok(ResumeState::default());
        };
        let motion = self.load_transforms()?;
        let plan = self.load_plan()?;
        let mut completed = BTreeMap::new();
        if let Some(plan) = &plan {
            for index in manifest.completed_segments() {
                let Some(segment) = plan.segments.iter().find(|s| s.index == index) else {
                    continue;
                };
                if let Some(output) = self.load_segment_output(segment)? {
                    completed.insert(index, output);
                }
            }
        }
        info!(
            run_dir = %self.root.display(),
            motion = motion.is_some(),
            plan = plan.is_some(),
            completed = completed.len(),
            "Loaded resume state"
        );
        Ok(ResumeState {
            motion,
            plan,
            completed,
        })
    }
}

fn to_media(e: WorkerError) -> MediaError {
    match e {
        WorkerError::Media(e) => e,
        other => MediaError::internal(format!("artifact write failed: {}", other)),
    }
}

/// Persists pipeline progress as it happens and keeps the manifest current.
pub struct ArtifactObserver {
    artifacts: RunArtifacts,
    manifest: RunManifest,
}

impl ArtifactObserver {
    pub fn new(artifacts: RunArtifacts, manifest: RunManifest) -> Self {
        Self {
            artifacts,
            manifest,
        }
    }

    pub fn manifest(&self) -> &RunManifest {
        &self.manifest
    }

    pub fn into_manifest(self) -> RunManifest {
        self.manifest
    }
}

impl PipelineObserver for ArtifactObserver {
    fn on_stabilized(&mut self, records: &[MotionRecord]) -> MediaResult<()> {
        self.artifacts.save_transforms(records).map_err(to_media)
    }

    fn on_plan(&mut self, plan: &SegmentPlan) -> MediaResult<()> {
        self.artifacts.save_plan(plan).map_err(to_media)?;
        self.manifest.init_segments(plan.len());
        self.artifacts.save_manifest(&self.manifest).map_err(to_media)
    }

    fn on_segment_complete(&mut self, output: &SegmentOutput) -> MediaResult<()> {
        self.artifacts.save_segment_output(output).map_err(to_media)?;
        self.manifest
            .mark(output.segment.index, SegmentStatus::Completed, None, None);
        self.artifacts.save_manifest(&self.manifest).map_err(to_media)
    }

    fn on_segment_failed(&mut self, outcome: &SegmentOutcome) -> MediaResult<()> {
        self.manifest.mark(
            outcome.index,
            outcome.status,
            outcome.failed_frame,
            outcome.error.clone(),
        );
        self.artifacts.save_manifest(&self.manifest).map_err(to_media)
    }
}
