//! Soft Dice loss.
//!
//! Computes the soft Dice coefficient per class from soft confusion counts and
//! returns its complement:
//! ```text
//! dc   = (2·tp + s) / (2·tp + fp + fn + s)
//! Loss = 1 - mean(dc)
//! ```
//!
//! Reference: Milletari et al., "V-Net", <https://arxiv.org/abs/1606.04797>.

use burn::prelude::*;

use crate::{
    error::LossResult,
    nonlinearity::Nonlinearity,
    one_hot::GroundTruth,
    region::{dice_score, RegionOptions},
};

/// Configuration for creating a [Soft Dice loss](SoftDiceLoss).
#[derive(Config, Debug)]
pub struct SoftDiceLossConfig {
    /// Transform applied to the raw prediction. Default: identity
    #[config(default = "Nonlinearity::Identity")]
    pub nonlinearity: Nonlinearity,
    /// Pool the batch into the counts instead of scoring each sample. Default: false
    #[config(default = false)]
    pub batch_dice: bool,
    /// Include the background class (index 0) in the mean. Default: true
    #[config(default = true)]
    pub do_bg: bool,
    /// Smoothing constant added to numerator and denominator. Default: 1.0
    #[config(default = 1.0)]
    pub smooth: f64,
    /// Square pointwise counts before summation. Default: false
    #[config(default = false)]
    pub square: bool,
}

impl SoftDiceLossConfig {
    /// Initialize [Soft Dice loss](SoftDiceLoss).
    pub fn init(&self) -> SoftDiceLoss {
        let options = RegionOptions {
            nonlinearity: self.nonlinearity,
            batch_dice: self.batch_dice,
            do_bg: self.do_bg,
            smooth: self.smooth,
            square: self.square,
        };
        options.assertions("SoftDiceLoss");
        tracing::debug!(?options, "initialized soft dice loss");
        SoftDiceLoss { options }
    }
}

/// Soft Dice loss.
#[derive(Debug, Clone)]
pub struct SoftDiceLoss {
    /// Region-loss hyperparameters.
    pub options: RegionOptions,
}

impl Default for SoftDiceLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftDiceLoss {
    /// Create a new Soft Dice loss with default configuration.
    pub fn new() -> Self {
        SoftDiceLossConfig::new().init()
    }

    /// Compute the loss.
    ///
    /// # Shapes
    ///
    /// - x: `[batch_size, num_classes, ...spatial]`
    /// - y: label map `[batch_size, 1, ...spatial]` or one-hot like `x`
    /// - mask: `[batch_size, 1, ...spatial]`
    /// - output: `[1]`
    pub fn forward<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
        mask: Option<Tensor<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let dc = self.forward_no_reduction(x, y, mask)?;
        Ok(dc.mean().neg().add_scalar(1.0))
    }

    /// Per-class Dice coefficients before the final mean.
    ///
    /// # Shapes
    ///
    /// - output: `[1, C']` with `batch_dice`, `[batch_size, C']` otherwise, where
    ///   `C'` is `num_classes - 1` when the background is excluded
    pub fn forward_no_reduction<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
        mask: Option<Tensor<B, D>>,
    ) -> LossResult<Tensor<B, 2>> {
        self.options.scores(x, y.into(), mask, dice_score)
    }
}
