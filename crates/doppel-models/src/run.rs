//! Run identity and manifest.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ReplacementConfig;

/// Unique identifier for a pipeline run.
///
/// Sorts chronologically: a UTC timestamp followed by a random suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new run ID.
    pub fn new() -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &suffix[..8]
        ))
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processing status of a segment within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentStatus::Pending => "pending",
            SegmentStatus::Completed => "completed",
            SegmentStatus::Failed => "failed",
            SegmentStatus::Cancelled => "cancelled",
        }
    }

    /// Whether a resumed run must process this segment again.
    pub fn needs_processing(&self) -> bool {
        !matches!(self, SegmentStatus::Completed)
    }
}

/// Status of one segment in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SegmentRunState {
    pub index: usize,
    pub status: SegmentStatus,
    /// Frame at which processing stopped, for failed or cancelled segments
    #[serde(default)]
    pub failed_frame: Option<usize>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SegmentRunState {
    pub fn pending(index: usize) -> Self {
        Self {
            index,
            status: SegmentStatus::Pending,
            failed_frame: None,
            error: None,
            updated_at: None,
        }
    }
}

/// Durable description of a run, written next to its artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunManifest {
    pub run_id: RunId,
    /// Source video path
    pub input: String,
    pub frame_count: usize,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub config: ReplacementConfig,
    #[serde(default)]
    pub segments: Vec<SegmentRunState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunManifest {
    pub fn new(
        run_id: RunId,
        input: impl Into<String>,
        frame_count: usize,
        fps: f64,
        width: u32,
        height: u32,
        config: ReplacementConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            input: input.into(),
            frame_count,
            fps,
            width,
            height,
            config,
            segments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Reset segment states for a fresh plan of `count` segments.
    ///
    /// Existing states are kept when the plan size is unchanged.
    pub fn init_segments(&mut self, count: usize) {
        if self.segments.len() != count {
            self.segments = (0..count).map(SegmentRunState::pending).collect();
        }
        self.touch();
    }

    /// Update the status of one segment.
    pub fn mark(
        &mut self,
        index: usize,
        status: SegmentStatus,
        failed_frame: Option<usize>,
        error: Option<String>,
    ) {
        let now = Utc::now();
        if let Some(state) = self.segments.iter_mut().find(|s| s.index == index) {
            state.status = status;
            state.failed_frame = failed_frame;
            state.error = error;
            state.updated_at = Some(now);
        } else {
            self.segments.push(SegmentRunState {
                index,
                status,
                failed_frame,
                error,
                updated_at: Some(now),
            });
            self.segments.sort_by_key(|s| s.index);
        }
        self.updated_at = now;
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn completed_segments(&self) -> Vec<usize> {
        self.segments
            .iter()
            .filter(|s| s.status == SegmentStatus::Completed)
            .map(|s| s.index)
            .collect()
    }

    pub fn failed_segments(&self) -> Vec<usize> {
        self.segments
            .iter()
            .filter(|s| s.status == SegmentStatus::Failed)
            .map(|s| s.index)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        !self.segments.is_empty()
            && self
                .segments
                .iter()
                .all(|s| s.status == SegmentStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> RunManifest {
        RunManifest::new(
            RunId::from_string("run-1"),
            "/videos/in.mp4",
            150,
            30.0,
            640,
            360,
            ReplacementConfig::default(),
        )
    }

    #[test]
    fn test_run_id_format() {
        let id = RunId::new();
        // YYYYMMDD_HHMMSS_xxxxxxxx
        assert_eq!(id.as_str().len(), 24);
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn test_mark_and_query() {
        let mut m = manifest();
        m.init_segments(3);
        assert!(!m.is_complete());

        m.mark(0, SegmentStatus::Completed, None, None);
        m.mark(1, SegmentStatus::Failed, Some(71), Some("oracle out of memory".into()));
        m.mark(2, SegmentStatus::Completed, None, None);

        assert_eq!(m.completed_segments(), vec![0, 2]);
        assert_eq!(m.failed_segments(), vec![1]);
        assert_eq!(m.segments[1].failed_frame, Some(71));
        assert!(!m.is_complete());

        m.mark(1, SegmentStatus::Completed, None, None);
        assert!(m.is_complete());
    }

    #[test]
    fn test_init_segments_keeps_matching_plan() {
        let mut m = manifest();
        m.init_segments(2);
        m.mark(0, SegmentStatus::Completed, None, None);
        m.init_segments(2);
        assert_eq!(m.completed_segments(), vec![0]);
        m.init_segments(3);
        assert!(m.completed_segments().is_empty());
    }

    #[test]
    fn test_manifest_json_round_trip() {
        let mut m = manifest();
        m.init_segments(1);
        let json = serde_json::to_string_pretty(&m).unwrap();
        let back: RunManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
        assert!(SegmentStatus::Failed.needs_processing());
        assert!(!SegmentStatus::Completed.needs_processing());
    }
}
