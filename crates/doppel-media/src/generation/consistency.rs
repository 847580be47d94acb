//! Temporal consistency between consecutive generated frames.

use doppel_models::ConsistencyConfig;
use image::RgbImage;
use ndarray::Array2;

use super::resources::ResourceTracker;
use crate::error::MediaResult;
use crate::imaging::{blend, FlowField};

/// The last output of a segment, kept to stabilize the next frame.
#[derive(Debug, Clone)]
pub struct PreviousOutput {
    /// Luma of the source frame the output was generated from
    pub source_luma: Array2<f32>,
    /// Output after temporal blending
    pub image: RgbImage,
}

/// Blends each generated frame with the motion-aligned previous output.
#[derive(Debug, Clone)]
pub struct TemporalBlender {
    config: ConsistencyConfig,
}

impl TemporalBlender {
    pub fn new(config: ConsistencyConfig) -> Self {
        Self { config }
    }

    pub fn alpha(&self) -> f64 {
        self.config.alpha
    }

    /// Flow from the current source frame into the previous one.
    pub fn flow(&self, current_luma: &Array2<f32>, previous: &PreviousOutput) -> FlowField {
        FlowField::estimate(
            current_luma,
            &previous.source_luma,
            self.config.flow_block_size,
            self.config.flow_search_radius,
        )
    }

    /// `alpha * generated + (1 - alpha) * warp(previous)`.
    ///
    /// Without a previous output (first frame of a segment) the generated
    /// frame passes through unchanged. The flow field and the aligned
    /// previous image are accounted in `resources` until the blend returns.
    pub fn blend(
        &self,
        generated: &RgbImage,
        current_luma: &Array2<f32>,
        previous: Option<&PreviousOutput>,
        resources: &ResourceTracker,
    ) -> MediaResult<RgbImage> {
        let Some(previous) = previous else {
            return Ok(generated.clone());
        };
        if previous.image.dimensions() != generated.dimensions()
            || previous.source_luma.dim() != current_luma.dim()
        {
            return Ok(generated.clone());
        }
        let flow = resources.track(self.flow(current_luma, previous));
        let aligned = resources.track(flow.warp(&previous.image));
        blend(generated, &aligned, self.config.alpha as f32)
    }
}
