//! Subject replacement inside one segment.
//!
//! The host supplies a [`PersonDetector`] and a [`FrameSynthesizer`]; this
//! module turns their per-frame outputs into temporally smooth composites.

mod compositor;
mod consistency;
mod controls;
mod processor;
mod providers;
mod resources;

pub use compositor::Compositor;
pub use consistency::{PreviousOutput, TemporalBlender};
pub use controls::{depth_cue, edge_map, render_pose, ControlExtractor, ControlSignals};
pub use processor::{SegmentInput, SegmentOutput, SegmentProcessor, SegmentStats};
pub use providers::{Detection, FrameSynthesizer, PersonDetector, SynthesisError};
pub use resources::{BufferFootprint, ResourceTracker, Scoped};

#[cfg(test)]
pub use providers::{MockFrameSynthesizer, MockPersonDetector};
