//! Image primitives: luma conversion, sampling, warping and dense flow.

pub mod flow;
pub mod ops;
pub mod warp;

pub use flow::FlowField;
pub use ops::{blend, luma, mean_abs_diff, sample_bilinear, sample_rgb, sobel};
pub use warp::{remap, warp_affine, warp_region};
