//! Top-k cross-entropy.
//!
//! Only the hardest `k` percent of voxels contribute: the per-voxel
//! cross-entropy is computed unreduced, the `⌊n · k / 100⌋` largest values are
//! kept and averaged.
//!
//! Reference: Wu et al., "Bridging Category-level and Instance-level Semantic
//! Image Segmentation", <https://arxiv.org/abs/1605.06885>.

use burn::module::{Content, DisplaySettings, ModuleDisplay};
use burn::prelude::*;
use burn::tensor::activation::log_softmax;

use crate::{
    cross_entropy::{flatten_logits, nll_no_reduction},
    error::{LossError, LossResult},
    one_hot::{to_labels, GroundTruth},
};

/// Configuration for creating a [top-k loss](TopKLoss).
#[derive(Config, Debug)]
pub struct TopKLossConfig {
    /// Percentage of voxels kept, in `(0, 100]`. Default: 10
    #[config(default = 10.0)]
    pub k: f64,
}

impl TopKLossConfig {
    /// Initialize [top-k loss](TopKLoss).
    pub fn init(&self) -> TopKLoss {
        assert!(
            self.k > 0.0 && self.k <= 100.0,
            "Percentage for TopKLoss must lie in (0, 100], got {}",
            self.k
        );
        TopKLoss { k: self.k }
    }
}

/// Mean cross-entropy of the hardest voxels.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct TopKLoss {
    /// Percentage of voxels kept.
    pub k: f64,
}

impl Default for TopKLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for TopKLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content.add("k", &self.k).optional()
    }
}

impl TopKLoss {
    /// Create a new loss keeping the hardest 10% of voxels.
    pub fn new() -> Self {
        TopKLossConfig::new().init()
    }

    /// Number of voxels kept out of `num_voxels`, at least one unless there are none.
    pub fn kept_voxels(&self, num_voxels: usize) -> usize {
        if num_voxels == 0 {
            return 0;
        }
        let count = (num_voxels as f64 * self.k / 100.0).floor() as usize;
        count.clamp(1, num_voxels)
    }

    /// Compute the mean of the largest per-voxel cross-entropies.
    ///
    /// # Shapes
    ///
    /// - x: raw logits `[batch_size, num_classes, ...spatial]`
    /// - y: label map `[batch_size, 1, ...spatial]` or one-hot like `x`
    /// - output: `[1]`
    ///
    /// # Errors
    /// [`LossError::ShapeMismatch`] when the prediction holds no voxel.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let shape = x.dims();
        if shape.iter().any(|&extent| extent == 0) {
            return Err(LossError::ShapeMismatch {
                context: "top-k prediction (no voxel to select)",
                expected: shape.iter().map(|&extent| extent.max(1)).collect(),
                actual: shape.to_vec(),
            });
        }

        let targets = to_labels(x.dims(), y.into())?;
        let per_voxel = nll_no_reduction(log_softmax(flatten_logits(x), 1), targets);

        let [num_voxels] = per_voxel.dims();
        let kept = self.kept_voxels(num_voxels);
        tracing::debug!(num_voxels, kept, k = self.k, "selecting hardest voxels");

        Ok(per_voxel.topk(kept, 0).mean())
    }
}
