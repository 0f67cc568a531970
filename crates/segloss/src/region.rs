//! Shared scaffold of the region-overlap losses.
//!
//! Every region loss runs the same pipeline: apply the configured nonlinearity,
//! accumulate soft `(tp, fp, fn)` over the reduction axes, turn them into a
//! per-class score with a small formula, optionally drop the background column
//! and average. Only the formula differs between losses, so each one is a free
//! function of the [`Confusion`] counts.

use burn::prelude::*;

use crate::{
    confusion::{drop_background, reduction_axes, tp_fp_fn, Confusion},
    error::LossResult,
    nonlinearity::Nonlinearity,
    one_hot::GroundTruth,
};

/// Hyperparameters common to all region losses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionOptions {
    /// Transform applied to the raw prediction.
    pub nonlinearity: Nonlinearity,
    /// Pool the batch axis into the counts (one score per class).
    pub batch_dice: bool,
    /// Include class 0 in the final mean.
    pub do_bg: bool,
    /// Additive smoothing constant.
    pub smooth: f64,
    /// Square pointwise counts before summation.
    pub square: bool,
}

impl RegionOptions {
    /// Per-class scores, `[1, C']` with `batch_dice`, `[batch_size, C']` otherwise,
    /// where `C'` excludes the background class when `do_bg` is false.
    pub fn scores<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: GroundTruth<B, D>,
        mask: Option<Tensor<B, D>>,
        score: impl FnOnce(Confusion<B>, f64) -> Tensor<B, 2>,
    ) -> LossResult<Tensor<B, 2>> {
        let axes = reduction_axes::<D>(self.batch_dice);
        let x = self.nonlinearity.apply(x);
        let confusion = tp_fp_fn(x, y, Some(&axes), mask, self.square)?;
        Ok(drop_background(score(confusion, self.smooth), self.do_bg))
    }

    pub(crate) fn assertions(&self, loss: &str) {
        assert!(
            self.smooth > 0.0,
            "Smoothing for {loss} must be positive, got {}",
            self.smooth
        );
    }
}

/// Soft Dice coefficient: `(2tp + s) / (2tp + fp + fn + s)`.
pub fn dice_score<B: Backend>(c: Confusion<B>, smooth: f64) -> Tensor<B, 2> {
    let two_tp = c.tp.mul_scalar(2.0);
    let numerator = two_tp.clone().add_scalar(smooth);
    let denominator = (two_tp + c.fp + c.fn_).add_scalar(smooth);
    numerator / denominator
}

/// Jaccard index: `(tp + s) / (tp + fp + fn + s)`.
pub fn iou_score<B: Backend>(c: Confusion<B>, smooth: f64) -> Tensor<B, 2> {
    let numerator = c.tp.clone().add_scalar(smooth);
    let denominator = (c.tp + c.fp + c.fn_).add_scalar(smooth);
    numerator / denominator
}

/// Tversky index: `(tp + s) / (tp + alpha*fp + beta*fn + s)`.
pub fn tversky_score<B: Backend>(
    c: Confusion<B>,
    smooth: f64,
    alpha: f64,
    beta: f64,
) -> Tensor<B, 2> {
    let numerator = c.tp.clone().add_scalar(smooth);
    let denominator = (c.tp + c.fp.mul_scalar(alpha) + c.fn_.mul_scalar(beta)).add_scalar(smooth);
    numerator / denominator
}

/// Asymmetric similarity: Tversky with `w = beta^2 / (1 + beta^2)` on `fn`
/// and `1 - w` on `fp`.
pub fn asymmetric_score<B: Backend>(c: Confusion<B>, smooth: f64, beta: f64) -> Tensor<B, 2> {
    let weight = beta * beta / (1.0 + beta * beta);
    tversky_score(c, smooth, 1.0 - weight, weight)
}
