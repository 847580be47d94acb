//! Replacement run worker.
//!
//! This crate provides:
//! - Environment and file based configuration
//! - HTTP clients for the detection and synthesis services
//! - Run directory persistence and resume
//! - The executor that decodes, runs the pipeline and encodes

pub mod artifacts;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod ml_client;
pub mod telemetry;

pub use artifacts::{ArtifactObserver, RunArtifacts};
pub use config::{apply_env_overrides, load_pipeline_config, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::{Collaborators, HttpCollaborators, JobExecutor, RunSummary};
pub use logging::RunLogger;
pub use ml_client::{HttpFrameSynthesizer, HttpPersonDetector};
