//! Foot contact state and logs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::pose::{JointId, Point2};

/// Per-frame contact classification of a tracked joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContactPhase {
    /// Joint is planted on the ground
    InContact,
    /// Joint is moving or lifted
    Free,
    /// Joint was not detected confidently in this frame
    Unknown,
}

impl ContactPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactPhase::InContact => "in_contact",
            ContactPhase::Free => "free",
            ContactPhase::Unknown => "unknown",
        }
    }
}

/// Contact tracking state for one joint.
///
/// Never carried across segment boundaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContactState {
    pub in_contact: bool,
    pub contact_start_frame: Option<usize>,
    pub locked_position: Option<Point2>,
}

impl ContactState {
    /// Enter contact at `frame`, locking the joint at `position`.
    pub fn enter(&mut self, frame: usize, position: Point2) {
        self.in_contact = true;
        self.contact_start_frame = Some(frame);
        self.locked_position = Some(position);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One entry of the contact log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContactRecord {
    pub segment: usize,
    pub frame: usize,
    pub joint: JointId,
    pub phase: ContactPhase,
    /// Detected joint position, if any
    pub observed: Option<Point2>,
    /// Target position held while in contact
    pub locked: Option<Point2>,
    /// Joint position after correction
    pub corrected: Option<Point2>,
}

impl ContactRecord {
    /// Size of the applied correction in pixels.
    pub fn correction_distance(&self) -> f64 {
        match (self.observed, self.corrected) {
            (Some(o), Some(c)) => o.distance(&c),
            _ => 0.0,
        }
    }
}
