//! Soft Intersection over Union (IoU) loss.
//!
//! The loss is the negated mean soft Jaccard index:
//! ```text
//! IoU  = (tp + s) / (tp + fp + fn + s)
//! Loss = -mean(IoU)
//! ```
//! A perfect prediction therefore scores `-1`.

use burn::prelude::*;

use crate::{
    error::LossResult,
    nonlinearity::Nonlinearity,
    one_hot::GroundTruth,
    region::{iou_score, RegionOptions},
};

/// Configuration for creating an [IoU loss](IoULoss).
#[derive(Config, Debug)]
pub struct IoULossConfig {
    /// Transform applied to the raw prediction. Default: identity
    #[config(default = "Nonlinearity::Identity")]
    pub nonlinearity: Nonlinearity,
    /// Pool the batch into the counts. Default: false
    #[config(default = false)]
    pub batch_dice: bool,
    /// Include the background class in the mean. Default: true
    #[config(default = true)]
    pub do_bg: bool,
    /// Smoothing constant. Default: 1.0
    #[config(default = 1.0)]
    pub smooth: f64,
    /// Square pointwise counts before summation. Default: false
    #[config(default = false)]
    pub square: bool,
}

impl IoULossConfig {
    /// Initialize [IoU loss](IoULoss).
    pub fn init(&self) -> IoULoss {
        let options = RegionOptions {
            nonlinearity: self.nonlinearity,
            batch_dice: self.batch_dice,
            do_bg: self.do_bg,
            smooth: self.smooth,
            square: self.square,
        };
        options.assertions("IoULoss");
        IoULoss { options }
    }
}

/// Soft IoU loss over multi-class predictions.
#[derive(Debug, Clone)]
pub struct IoULoss {
    /// Region-loss hyperparameters.
    pub options: RegionOptions,
}

impl Default for IoULoss {
    fn default() -> Self {
        Self::new()
    }
}

impl IoULoss {
    /// Create a new IoU loss with default configuration.
    pub fn new() -> Self {
        IoULossConfig::new().init()
    }

    /// Compute the criterion.
    ///
    /// # Shapes
    ///
    /// - x: `[batch_size, num_classes, ...spatial]`
    /// - y: label map `[batch_size, 1, ...spatial]` or one-hot like `x`
    /// - output: `[1]`
    pub fn forward<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
        mask: Option<Tensor<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let iou = self.forward_no_reduction(x, y, mask)?;
        Ok(iou.mean().neg())
    }

    /// Per-class IoU before the mean, `[rows, C']`.
    pub fn forward_no_reduction<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
        mask: Option<Tensor<B, D>>,
    ) -> LossResult<Tensor<B, 2>> {
        self.options.scores(x, y.into(), mask, iou_score)
    }
}
