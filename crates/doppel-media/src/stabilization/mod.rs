//! Camera stabilization and its inverse.

pub mod reshake;
pub mod stabilizer;

pub use stabilizer::{load_motion_records, save_motion_records, Stabilization, Stabilizer};
