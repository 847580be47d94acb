//! Worker configuration.
//!
//! Service endpoints and paths come from the environment. The pipeline
//! configuration is read from an optional JSON file and then overridden
//! option by option from `DOPPEL_*` variables.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use doppel_models::{BackgroundMode, ReplacementConfig, SmoothingMode};
use tracing::info;

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory holding one subdirectory per run
    pub run_root: PathBuf,
    /// Base URL of the person detection service
    pub detector_url: String,
    /// Base URL of the frame synthesis service
    pub synthesizer_url: String,
    /// Timeout for a single detector or synthesizer request
    pub request_timeout: Duration,
    /// Upper bound on the final encode
    pub encode_timeout: Duration,
    /// Prometheus exporter port; no exporter when unset
    pub metrics_port: Option<u16>,
    /// Output quality (x264 CRF)
    pub output_crf: u8,
    pub output_preset: String,
    /// Optional JSON file with a `ReplacementConfig`
    pub pipeline_config_path: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            run_root: PathBuf::from("/tmp/doppel/runs"),
            detector_url: "http://localhost:8001".to_string(),
            synthesizer_url: "http://localhost:8002".to_string(),
            request_timeout: Duration::from_secs(120),
            encode_timeout: Duration::from_secs(3600), // 1 hour
            metrics_port: None,
            output_crf: 18,
            output_preset: "medium".to_string(),
            pipeline_config_path: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            run_root: lookup("DOPPEL_RUN_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.run_root),
            detector_url: lookup("DETECTOR_URL").unwrap_or(defaults.detector_url),
            synthesizer_url: lookup("SYNTHESIZER_URL").unwrap_or(defaults.synthesizer_url),
            request_timeout: lookup("ML_REQUEST_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            encode_timeout: lookup("ENCODE_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.encode_timeout),
            metrics_port: lookup("METRICS_PORT").and_then(|s| s.parse().ok()),
            output_crf: lookup("OUTPUT_CRF")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.output_crf),
            output_preset: lookup("OUTPUT_PRESET").unwrap_or(defaults.output_preset),
            pipeline_config_path: lookup("DOPPEL_PIPELINE_CONFIG").map(PathBuf::from),
        }
    }

    /// Directory of one run.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.run_root.join(run_id)
    }
}

/// Load the pipeline configuration: built-in defaults, then the JSON file
/// (missing fields keep their defaults), then environment overrides.
///
/// The result is validated before it is returned.
pub fn load_pipeline_config(
    path: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> WorkerResult<ReplacementConfig> {
    let config = match path {
        Some(path) => {
            let json = std::fs::read_to_string(path).map_err(|e| {
                WorkerError::config_error(format!("Cannot read {}: {}", path.display(), e))
            })?;
            info!(path = %path.display(), "Loaded pipeline configuration file");
            serde_json::from_str(&json)?
        }
        None => ReplacementConfig::default(),
    };
    let config = apply_env_overrides(config, lookup)?;
    config.validate()?;
    Ok(config)
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> WorkerResult<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| WorkerError::config_error(format!("{} has invalid value '{}'", key, raw))),
    }
}

fn parse_bool(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> WorkerResult<Option<bool>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(WorkerError::config_error(format!(
                "{} has invalid value '{}'",
                key, raw
            ))),
        },
    }
}

/// Override individual options from `DOPPEL_*` variables.
pub fn apply_env_overrides(
    mut config: ReplacementConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> WorkerResult<ReplacementConfig> {
    if let Some(v) = parse_var(&lookup, "DOPPEL_STABILIZATION_WINDOW")? {
        config.stabilization.smoothing_window = v;
    }
    if let Some(raw) = lookup("DOPPEL_SMOOTHING_MODE") {
        config.stabilization.smoothing_mode = match raw.trim().to_lowercase().as_str() {
            "centered" => SmoothingMode::Centered,
            "trailing" => SmoothingMode::Trailing,
            _ => {
                return Err(WorkerError::config_error(format!(
                    "DOPPEL_SMOOTHING_MODE has invalid value '{}'",
                    raw
                )))
            }
        };
    }
    if let Some(v) = parse_var(&lookup, "DOPPEL_SEGMENT_COUNT")? {
        config.segmentation.segment_count = v;
    }
    if let Some(v) = parse_var(&lookup, "DOPPEL_OVERLAP_FRAMES")? {
        config.segmentation.overlap_frames = v;
    }
    if let Some(v) = parse_var(&lookup, "DOPPEL_CONSISTENCY_ALPHA")? {
        config.consistency.alpha = v;
    }
    if let Some(v) = parse_bool(&lookup, "DOPPEL_FOOT_LOCK_ENABLED")? {
        config.foot_lock.enabled = v;
    }
    if let Some(v) = parse_var(&lookup, "DOPPEL_FOOT_VELOCITY_THRESHOLD")? {
        config.foot_lock.velocity_threshold = v;
    }
    if let Some(v) = parse_var(&lookup, "DOPPEL_FOOT_HEIGHT_THRESHOLD")? {
        config.foot_lock.height_threshold = v;
    }
    if let Some(v) = parse_var(&lookup, "DOPPEL_MIN_CONTACT_FRAMES")? {
        config.foot_lock.min_contact_frames = v;
    }
    if let Some(v) = parse_bool(&lookup, "DOPPEL_BACKGROUND_ENABLED")? {
        config.background.enabled = v;
    }
    if let Some(raw) = lookup("DOPPEL_BACKGROUND_MODE") {
        config.background.mode = match raw.trim().to_lowercase().as_str() {
            "static" => BackgroundMode::Static,
            "dynamic" => BackgroundMode::Dynamic,
            _ => {
                return Err(WorkerError::config_error(format!(
                    "DOPPEL_BACKGROUND_MODE has invalid value '{}'",
                    raw
                )))
            }
        };
    }
    if let Some(v) = parse_var(&lookup, "DOPPEL_BACKGROUND_SMOOTHING_WINDOW")? {
        config.background.smoothing_window = v;
    }
    if let Some(style) = lookup("DOPPEL_STYLE") {
        config.style_description = style;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_worker_config_defaults() {
        let config = WorkerConfig::from_lookup(vars(&[]));
        assert_eq!(config.run_root, PathBuf::from("/tmp/doppel/runs"));
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.output_crf, 18);
        assert!(config.pipeline_config_path.is_none());
    }

    #[test]
    fn test_worker_config_from_vars() {
        let config = WorkerConfig::from_lookup(vars(&[
            ("DOPPEL_RUN_ROOT", "/data/runs"),
            ("SYNTHESIZER_URL", "http://gpu:9000"),
            ("ML_REQUEST_TIMEOUT_SECS", "30"),
            ("METRICS_PORT", "9100"),
            ("OUTPUT_CRF", "not-a-number"),
        ]));
        assert_eq!(config.run_dir("abc"), PathBuf::from("/data/runs/abc"));
        assert_eq!(config.synthesizer_url, "http://gpu:9000");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.metrics_port, Some(9100));
        // unparsable values keep the default
        assert_eq!(config.output_crf, 18);
    }

    #[test]
    fn test_env_overrides() {
        let config = apply_env_overrides(
            ReplacementConfig::default(),
            vars(&[
                ("DOPPEL_STABILIZATION_WINDOW", "45"),
                ("DOPPEL_SMOOTHING_MODE", "trailing"),
                ("DOPPEL_SEGMENT_COUNT", "4"),
                ("DOPPEL_OVERLAP_FRAMES", "8"),
                ("DOPPEL_CONSISTENCY_ALPHA", "0.5"),
                ("DOPPEL_FOOT_VELOCITY_THRESHOLD", "3.5"),
                ("DOPPEL_MIN_CONTACT_FRAMES", "4"),
                ("DOPPEL_BACKGROUND_ENABLED", "true"),
                ("DOPPEL_BACKGROUND_MODE", "dynamic"),
                ("DOPPEL_STYLE", "red jacket"),
            ]),
        )
        .unwrap();
        assert_eq!(config.stabilization.smoothing_window, 45);
        assert_eq!(config.stabilization.smoothing_mode, SmoothingMode::Trailing);
        assert_eq!(config.segmentation.segment_count, 4);
        assert_eq!(config.segmentation.overlap_frames, 8);
        assert!((config.consistency.alpha - 0.5).abs() < 1e-12);
        assert!((config.foot_lock.velocity_threshold - 3.5).abs() < 1e-12);
        assert_eq!(config.foot_lock.min_contact_frames, 4);
        assert!(config.background.enabled);
        assert_eq!(config.background.mode, BackgroundMode::Dynamic);
        assert_eq!(config.style_description, "red jacket");
    }

    #[test]
    fn test_invalid_override_names_the_variable() {
        let err = apply_env_overrides(
            ReplacementConfig::default(),
            vars(&[("DOPPEL_SEGMENT_COUNT", "three")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("DOPPEL_SEGMENT_COUNT"));
    }

    #[test]
    fn test_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(
            &path,
            r#"{"segmentation": {"segment_count": 5}, "style_description": "from file"}"#,
        )
        .unwrap();

        let config = load_pipeline_config(
            Some(&path),
            vars(&[("DOPPEL_STYLE", "from env")]),
        )
        .unwrap();
        assert_eq!(config.segmentation.segment_count, 5);
        // fields absent from the file keep their defaults
        assert_eq!(config.segmentation.overlap_frames, 5);
        assert_eq!(config.style_description, "from env");
    }

    #[test]
    fn test_loaded_config_is_validated() {
        let result = load_pipeline_config(None, vars(&[("DOPPEL_CONSISTENCY_ALPHA", "1.5")]));
        assert!(matches!(result, Err(WorkerError::Model(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_pipeline_config(Some(Path::new("/nonexistent/p.json")), vars(&[]));
        assert!(matches!(result, Err(WorkerError::ConfigError(_))));
    }
}
