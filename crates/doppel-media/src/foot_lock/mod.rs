//! Foot contact detection and locking.

mod contact;
mod locker;

pub use contact::{classify, extend_short_runs, ground_line};
pub use locker::{FootLockResult, FootLocker};
