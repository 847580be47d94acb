//! Pipeline configuration.
//!
//! Every section deserializes with defaults for missing fields so partial
//! configuration files can be merged over the built-in values.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Default smoothing window for the camera path (frames)
pub const DEFAULT_SMOOTHING_WINDOW: usize = 30;
/// Default number of temporal segments
pub const DEFAULT_SEGMENT_COUNT: usize = 3;
/// Default overlap window between adjacent segments (frames)
pub const DEFAULT_OVERLAP_FRAMES: usize = 5;
/// Default weight of the newly generated frame in the consistency blend
pub const DEFAULT_CONSISTENCY_ALPHA: f64 = 0.7;

/// Placement of the camera path smoothing window around each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingMode {
    /// Window spans frames before and after the current frame
    #[default]
    Centered,
    /// Window spans the current frame and frames before it
    Trailing,
}

/// Camera stabilization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct StabilizationConfig {
    /// Moving-average window over the cumulative camera path
    pub smoothing_window: usize,
    pub smoothing_mode: SmoothingMode,
    /// Maximum number of corner features tracked per frame
    pub max_features: usize,
    /// Minimum corner response relative to the strongest corner
    pub feature_quality: f64,
    /// Minimum spacing between selected corners (pixels)
    pub feature_min_distance: u32,
    /// Below this many correspondences the frame falls back to identity
    pub min_tracked_points: usize,
    /// Half-size of the matching patch (pixels)
    pub patch_radius: u32,
    /// Maximum feature displacement searched between frames (pixels)
    pub search_radius: u32,
    pub ransac_iterations: usize,
    /// Reprojection error (pixels) below which a correspondence is an inlier
    pub ransac_threshold: f64,
}

impl Default for StabilizationConfig {
    fn default() -> Self {
        Self {
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
            smoothing_mode: SmoothingMode::Centered,
            max_features: 200,
            feature_quality: 0.01,
            feature_min_distance: 30,
            min_tracked_points: 10,
            patch_radius: 5,
            search_radius: 16,
            ransac_iterations: 100,
            ransac_threshold: 3.0,
        }
    }
}

/// Temporal segmentation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Requested number of segments
    pub segment_count: usize,
    /// Frames shared by adjacent segments
    pub overlap_frames: usize,
    /// Place cuts at subject motion minima when one is clearly present
    pub motion_based_cuts: bool,
    /// Moving-average window applied to the motion signal
    pub motion_smoothing_window: usize,
    /// Relative depth a minimum must reach below its search region mean
    pub min_cut_contrast: f64,
    /// Phase labels assigned to segments in order
    pub labels: Vec<String>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            segment_count: DEFAULT_SEGMENT_COUNT,
            overlap_frames: DEFAULT_OVERLAP_FRAMES,
            motion_based_cuts: true,
            motion_smoothing_window: 15,
            min_cut_contrast: 0.15,
            labels: vec!["approach".into(), "hold".into(), "exit".into()],
        }
    }
}

impl SegmentationConfig {
    /// Label for the segment at `index`.
    pub fn label_for(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("segment_{}", index))
    }
}

/// Temporal consistency settings for generated frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ConsistencyConfig {
    /// Weight of the newly generated frame; `1 - alpha` goes to the warped previous output
    pub alpha: f64,
    /// Block size for dense flow estimation (pixels)
    pub flow_block_size: u32,
    /// Search radius for dense flow estimation (pixels)
    pub flow_search_radius: u32,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_CONSISTENCY_ALPHA,
            flow_block_size: 8,
            flow_search_radius: 8,
        }
    }
}

/// Foot contact locking settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FootLockConfig {
    pub enabled: bool,
    /// Maximum ankle displacement per frame (pixels) still counted as planted
    pub velocity_threshold: f64,
    /// Allowed height above the ground line as a fraction of frame height
    pub height_threshold: f64,
    /// Contact runs shorter than this are extended
    pub min_contact_frames: usize,
    /// Frames added on each side of a short contact run
    pub extension_frames: usize,
    /// Weight of the corrected region in the final blend
    pub blend_ratio: f64,
    /// Radius of the corrected region around the ankle (pixels)
    pub region_radius: u32,
    /// Keypoints below this confidence are treated as missing
    pub min_confidence: f64,
}

impl Default for FootLockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            velocity_threshold: 5.0,
            height_threshold: 0.1,
            min_contact_frames: 3,
            extension_frames: 1,
            blend_ratio: 0.7,
            region_radius: 40,
            min_confidence: 0.3,
        }
    }
}

/// Background plate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundMode {
    /// One plate for the whole video
    #[default]
    Static,
    /// A plate per sampled frame, for moving backgrounds
    Dynamic,
}

/// Background reconstruction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BackgroundConfig {
    pub enabled: bool,
    pub mode: BackgroundMode,
    /// Frames combined by the temporal median
    pub median_window: usize,
    /// Frames averaged when smoothing a dynamic plate sequence
    pub smoothing_window: usize,
    /// Every Nth frame is sampled for reconstruction
    pub sample_stride: usize,
    /// Mask dilation iterations (3x3 each)
    pub mask_dilation: u32,
    /// Neighborhood radius used by the inpainting fill (pixels)
    pub inpaint_radius: u32,
    /// Plate pixels seen unoccluded in fewer than this fraction of samples fall back to the source
    pub min_confidence: f64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: BackgroundMode::Static,
            median_window: 15,
            smoothing_window: 3,
            sample_stride: 5,
            mask_dilation: 2,
            inpaint_radius: 3,
            min_confidence: 0.3,
        }
    }
}

/// Full replacement pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReplacementConfig {
    pub stabilization: StabilizationConfig,
    pub segmentation: SegmentationConfig,
    pub consistency: ConsistencyConfig,
    pub foot_lock: FootLockConfig,
    pub background: BackgroundConfig,
    /// Appearance description passed to the synthesis oracle
    pub style_description: String,
    /// Gaussian sigma used to feather the subject mask when compositing
    pub feather_sigma: f32,
    /// Joints below this confidence are not drawn into the pose control image
    pub pose_min_confidence: f64,
    /// Gradient magnitude above which a pixel is marked in the edge map
    pub edge_threshold: f32,
}

impl Default for ReplacementConfig {
    fn default() -> Self {
        Self {
            stabilization: StabilizationConfig::default(),
            segmentation: SegmentationConfig::default(),
            consistency: ConsistencyConfig::default(),
            foot_lock: FootLockConfig::default(),
            background: BackgroundConfig::default(),
            style_description: String::new(),
            feather_sigma: 3.5,
            pose_min_confidence: 0.5,
            edge_threshold: 64.0,
        }
    }
}

impl ReplacementConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cheaper tracking and no background plate.
    pub fn fast() -> Self {
        Self {
            stabilization: StabilizationConfig {
                smoothing_window: 15,
                max_features: 100,
                ransac_iterations: 50,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Denser tracking and a reconstructed background plate.
    pub fn quality() -> Self {
        Self {
            stabilization: StabilizationConfig {
                max_features: 300,
                ransac_iterations: 200,
                ..Default::default()
            },
            background: BackgroundConfig {
                enabled: true,
                sample_stride: 3,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style_description = style.into();
        self
    }

    pub fn with_segments(mut self, count: usize, overlap: usize) -> Self {
        self.segmentation.segment_count = count;
        self.segmentation.overlap_frames = overlap;
        self
    }

    pub fn with_smoothing_window(mut self, window: usize) -> Self {
        self.stabilization.smoothing_window = window;
        self
    }

    pub fn with_background(mut self, mode: BackgroundMode) -> Self {
        self.background.enabled = true;
        self.background.mode = mode;
        self
    }

    pub fn with_consistency_alpha(mut self, alpha: f64) -> Self {
        self.consistency.alpha = alpha;
        self
    }

    pub fn without_foot_lock(mut self) -> Self {
        self.foot_lock.enabled = false;
        self
    }

    /// Check value ranges. Called before any frame is processed.
    pub fn validate(&self) -> ModelResult<()> {
        let s = &self.stabilization;
        if s.smoothing_window == 0 {
            return Err(ModelError::invalid_config(
                "stabilization.smoothing_window",
                "must be at least 1",
            ));
        }
        if s.min_tracked_points < 2 {
            return Err(ModelError::invalid_config(
                "stabilization.min_tracked_points",
                "at least 2 correspondences are needed to fit a transform",
            ));
        }
        if s.max_features < s.min_tracked_points {
            return Err(ModelError::invalid_config(
                "stabilization.max_features",
                "must not be smaller than min_tracked_points",
            ));
        }
        if s.patch_radius == 0 || s.search_radius == 0 {
            return Err(ModelError::invalid_config(
                "stabilization.search_radius",
                "patch and search radius must be positive",
            ));
        }
        if !(s.ransac_threshold > 0.0) || s.ransac_iterations == 0 {
            return Err(ModelError::invalid_config(
                "stabilization.ransac_threshold",
                "RANSAC needs a positive threshold and at least one iteration",
            ));
        }

        let seg = &self.segmentation;
        if seg.segment_count == 0 {
            return Err(ModelError::invalid_config(
                "segmentation.segment_count",
                "must be at least 1",
            ));
        }
        if seg.motion_smoothing_window == 0 {
            return Err(ModelError::invalid_config(
                "segmentation.motion_smoothing_window",
                "must be at least 1",
            ));
        }
        if !(0.0..1.0).contains(&seg.min_cut_contrast) {
            return Err(ModelError::invalid_config(
                "segmentation.min_cut_contrast",
                "must be in [0, 1)",
            ));
        }

        if !(0.0..=1.0).contains(&self.consistency.alpha) {
            return Err(ModelError::invalid_config(
                "consistency.alpha",
                "must be in [0, 1]",
            ));
        }
        if self.consistency.flow_block_size == 0 {
            return Err(ModelError::invalid_config(
                "consistency.flow_block_size",
                "must be positive",
            ));
        }

        let f = &self.foot_lock;
        if !(f.velocity_threshold > 0.0) {
            return Err(ModelError::invalid_config(
                "foot_lock.velocity_threshold",
                "must be positive",
            ));
        }
        if !(f.height_threshold > 0.0 && f.height_threshold <= 1.0) {
            return Err(ModelError::invalid_config(
                "foot_lock.height_threshold",
                "must be a fraction of frame height in (0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&f.blend_ratio) {
            return Err(ModelError::invalid_config(
                "foot_lock.blend_ratio",
                "must be in [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&f.min_confidence) {
            return Err(ModelError::invalid_config(
                "foot_lock.min_confidence",
                "must be in [0, 1]",
            ));
        }

        let b = &self.background;
        if b.sample_stride == 0 || b.median_window == 0 || b.smoothing_window == 0 {
            return Err(ModelError::invalid_config(
                "background.sample_stride",
                "stride and windows must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&b.min_confidence) {
            return Err(ModelError::invalid_config(
                "background.min_confidence",
                "must be in [0, 1]",
            ));
        }

        if !(self.feather_sigma >= 0.0) {
            return Err(ModelError::invalid_config(
                "feather_sigma",
                "must not be negative",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ReplacementConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stabilization.smoothing_window, 30);
        assert_eq!(config.segmentation.segment_count, 3);
        assert_eq!(config.segmentation.overlap_frames, 5);
        assert!((config.consistency.alpha - 0.7).abs() < f64::EPSILON);
        assert!(!config.background.enabled);
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(ReplacementConfig::fast().validate().is_ok());
        let quality = ReplacementConfig::quality();
        assert!(quality.validate().is_ok());
        assert!(quality.background.enabled);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let config = ReplacementConfig::default().with_consistency_alpha(1.5);
        assert!(matches!(
            config.validate(),
            Err(ModelError::InvalidConfig { ref field, .. }) if field == "consistency.alpha"
        ));

        let config = ReplacementConfig::default().with_smoothing_window(0);
        assert!(config.validate().is_err());

        let config = ReplacementConfig::default().with_segments(0, 5);
        assert!(config.validate().is_err());

        let mut config = ReplacementConfig::default();
        config.foot_lock.height_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "style_description": "astronaut in a white suit",
            "segmentation": { "segment_count": 4 },
            "background": { "enabled": true, "mode": "dynamic" }
        }"#;
        let config: ReplacementConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.segmentation.segment_count, 4);
        assert_eq!(config.segmentation.overlap_frames, DEFAULT_OVERLAP_FRAMES);
        assert_eq!(config.background.mode, BackgroundMode::Dynamic);
        assert_eq!(config.stabilization, StabilizationConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_labels() {
        let seg = SegmentationConfig::default();
        assert_eq!(seg.label_for(0), "approach");
        assert_eq!(seg.label_for(2), "exit");
        assert_eq!(seg.label_for(5), "segment_5");
    }
}
