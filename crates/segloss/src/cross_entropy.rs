//! Cross-entropy over N-dimensional predictions.
//!
//! The class axis is moved last and the prediction is viewed as
//! `[voxel_count, num_classes]` so that Burn's [`CrossEntropyLoss`] can score it
//! against the flattened labels from [`to_labels`]:
//! ```text
//! Loss = -mean_i log softmax(x_i)[y_i]
//! ```
//! [`WeightedCrossEntropyLoss`] additionally weights each voxel by the weight of
//! its target class and normalizes by the sum of those weights.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Module, ModuleDisplay},
    nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig},
    tensor::{activation::log_softmax, backend::Backend, Int, Tensor},
};

use crate::{
    confusion::class_last,
    error::LossResult,
    one_hot::{to_labels, GroundTruth},
};

/// View a `[batch_size, num_classes, ...spatial]` prediction as `[voxel_count, num_classes]`.
pub(crate) fn flatten_logits<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, 2> {
    let num_classes = x.dims()[1];
    class_last(x).reshape([-1, num_classes as i32])
}

/// Per-voxel negative log-likelihood, `[voxel_count]`.
pub(crate) fn nll_no_reduction<B: Backend>(
    log_probs: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    log_probs
        .gather(1, targets.unsqueeze_dim(1))
        .neg()
        .flatten::<1>(0, 1)
}

/// Negative log-likelihood of `targets` under `log_probs`, averaged over rows.
///
/// # Shapes
///
/// - log_probs: `[N, num_classes]`
/// - targets: `[N]`
/// - output: `[1]`
pub fn nll_loss<B: Backend>(log_probs: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    nll_no_reduction(log_probs, targets).mean()
}

/// Configuration for creating an [N-dimensional cross-entropy loss](CrossentropyNdLoss).
#[derive(Config, Debug)]
pub struct CrossentropyNdLossConfig {
    /// Label smoothing factor in `[0, 1]`. Default: none
    pub smoothing: Option<f32>,
}

impl CrossentropyNdLossConfig {
    /// Initialize [N-dimensional cross-entropy loss](CrossentropyNdLoss).
    pub fn init<B: Backend>(&self, device: &B::Device) -> CrossentropyNdLoss<B> {
        CrossentropyNdLoss {
            ce_loss: CrossEntropyLossConfig::new()
                .with_smoothing(self.smoothing)
                .init(device),
        }
    }
}

/// Cross-entropy for predictions with any number of spatial axes.
///
/// Expects raw logits; the softmax is part of the criterion.
#[derive(Module, Debug)]
#[module(custom_display)]
pub struct CrossentropyNdLoss<B: Backend> {
    /// Cross-entropy criterion on the flattened view.
    pub ce_loss: CrossEntropyLoss<B>,
}

impl<B: Backend> ModuleDisplay for CrossentropyNdLoss<B> {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content.add("ce_loss", &self.ce_loss).optional()
    }
}

impl<B: Backend> CrossentropyNdLoss<B> {
    /// Create a new cross-entropy loss with default configuration.
    pub fn new(device: &B::Device) -> Self {
        CrossentropyNdLossConfig::new().init(device)
    }

    /// Compute the mean cross-entropy over all voxels.
    ///
    /// # Shapes
    ///
    /// - x: `[batch_size, num_classes, ...spatial]`
    /// - y: label map `[batch_size, 1, ...spatial]` or one-hot like `x`
    /// - output: `[1]`
    pub fn forward<const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let targets = to_labels(x.dims(), y.into())?;
        Ok(self.ce_loss.forward(flatten_logits(x), targets))
    }

    /// Unweighted cross-entropy of every voxel, `[voxel_count]`.
    ///
    /// Voxels are ordered batch first, then spatial axes in row-major order.
    pub fn forward_no_reduction<const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let targets = to_labels(x.dims(), y.into())?;
        let log_probs = log_softmax(flatten_logits(x), 1);
        Ok(nll_no_reduction(log_probs, targets))
    }
}

/// Configuration for creating a [weighted cross-entropy loss](WeightedCrossEntropyLoss).
#[derive(Config, Debug)]
pub struct WeightedCrossEntropyLossConfig {
    /// Weight of every class. `None` weighs all classes equally. Default: none
    pub weights: Option<Vec<f32>>,
}

impl WeightedCrossEntropyLossConfig {
    /// Two-class weighting `[0.2, 0.8]` that emphasizes the foreground.
    pub fn binary() -> Self {
        Self::new().with_weights(Some(vec![0.2, 0.8]))
    }

    /// Initialize [weighted cross-entropy loss](WeightedCrossEntropyLoss).
    ///
    /// The weights are materialized on `device`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> WeightedCrossEntropyLoss<B> {
        if let Some(weights) = &self.weights {
            assert!(
                weights.iter().all(|w| *w > 0.0),
                "Class weights for WeightedCrossEntropyLoss must be positive, got {weights:?}"
            );
        }
        tracing::debug!(weights = ?self.weights, "initialized weighted cross-entropy");
        WeightedCrossEntropyLoss {
            ce_loss: CrossEntropyLossConfig::new()
                .with_weights(self.weights.clone())
                .init(device),
        }
    }
}

/// Class-weighted cross-entropy.
#[derive(Module, Debug)]
#[module(custom_display)]
pub struct WeightedCrossEntropyLoss<B: Backend> {
    /// Weighted cross-entropy criterion on the flattened view.
    pub ce_loss: CrossEntropyLoss<B>,
}

impl<B: Backend> ModuleDisplay for WeightedCrossEntropyLoss<B> {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content.add("ce_loss", &self.ce_loss).optional()
    }
}

impl<B: Backend> WeightedCrossEntropyLoss<B> {
    /// Create the two-class loss with weights `[0.2, 0.8]`.
    pub fn binary(device: &B::Device) -> Self {
        WeightedCrossEntropyLossConfig::binary().init(device)
    }

    /// Compute `Σ w[y_i] · ce_i / Σ w[y_i]` over all voxels.
    ///
    /// # Shapes
    ///
    /// - x: `[batch_size, num_classes, ...spatial]`
    /// - y: label map `[batch_size, 1, ...spatial]` or one-hot like `x`
    /// - output: `[1]`
    pub fn forward<const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let targets = to_labels(x.dims(), y.into())?;
        Ok(self.ce_loss.forward(flatten_logits(x), targets))
    }
}
