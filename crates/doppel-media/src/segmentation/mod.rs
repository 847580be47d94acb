//! Temporal segmentation and overlap blending.

pub mod blender;
pub mod segmenter;

pub use blender::OverlapBlender;
pub use segmenter::{validate_segments, Segmenter};
