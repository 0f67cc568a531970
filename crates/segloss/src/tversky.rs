//! Tversky and Focal-Tversky losses.
//!
//! The Tversky index weighs false positives and false negatives separately,
//! trading precision for recall on small structures:
//! ```text
//! T    = (tp + s) / (tp + α·fp + β·fn + s)
//! Loss = -mean(T)
//! ```
//! Focal-Tversky raises the shifted loss to a power `γ`:
//! ```text
//! Loss = (1 + Tversky loss)^γ
//! ```
//!
//! References: Salehi et al., <https://arxiv.org/abs/1706.05721>;
//! Abraham & Khan, <https://arxiv.org/abs/1810.07842>.

use burn::prelude::*;

use crate::{
    confusion::Confusion,
    error::LossResult,
    nonlinearity::Nonlinearity,
    one_hot::GroundTruth,
    region::{tversky_score, RegionOptions},
};

/// Configuration for creating a [Tversky loss](TverskyLoss).
#[derive(Config, Debug)]
pub struct TverskyLossConfig {
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
    /// Weight of false positives. Default: 0.3
    #[config(default = 0.3)]
    pub alpha: f64,
    /// Weight of false negatives. Default: 0.7
    #[config(default = 0.7)]
    pub beta: f64,
}

impl TverskyLossConfig {
    /// Initialize [Tversky loss](TverskyLoss).
    pub fn init(&self) -> TverskyLoss {
        let options = RegionOptions {
            nonlinearity: self.nonlinearity,
            batch_dice: self.batch_dice,
            do_bg: self.do_bg,
            smooth: self.smooth,
            square: self.square,
        };
        options.assertions("TverskyLoss");
        assert!(
            self.alpha >= 0.0 && self.beta >= 0.0,
            "Weights for TverskyLoss must be non-negative, got alpha={} beta={}",
            self.alpha,
            self.beta
        );
        TverskyLoss {
            options,
            alpha: self.alpha,
            beta: self.beta,
        }
    }
}

/// Tversky loss.
#[derive(Debug, Clone)]
pub struct TverskyLoss {
    /// Region-loss hyperparameters.
    pub options: RegionOptions,
    /// Weight of false positives.
    pub alpha: f64,
    /// Weight of false negatives.
    pub beta: f64,
}

impl Default for TverskyLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl TverskyLoss {
    /// Create a new Tversky loss with `alpha = 0.3`, `beta = 0.7`.
    pub fn new() -> Self {
        TverskyLossConfig::new().init()
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
        let tversky = self.forward_no_reduction(x, y, mask)?;
        Ok(tversky.mean().neg())
    }

    /// Per-class Tversky index before the mean, `[rows, C']`.
    pub fn forward_no_reduction<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
        mask: Option<Tensor<B, D>>,
    ) -> LossResult<Tensor<B, 2>> {
        let (alpha, beta) = (self.alpha, self.beta);
        let score = |c: Confusion<B>, smooth| tversky_score(c, smooth, alpha, beta);
        self.options.scores(x, y.into(), mask, score)
    }
}

/// Configuration for creating a [Focal-Tversky loss](FocalTverskyLoss).
#[derive(Config, Debug)]
pub struct FocalTverskyLossConfig {
    /// Configuration of the wrapped Tversky loss.
    #[config(default = "TverskyLossConfig::new()")]
    pub tversky: TverskyLossConfig,
    /// Focusing exponent. Default: 0.75
    #[config(default = 0.75)]
    pub gamma: f64,
}

impl FocalTverskyLossConfig {
    /// Initialize [Focal-Tversky loss](FocalTverskyLoss).
    pub fn init(&self) -> FocalTverskyLoss {
        assert!(
            self.gamma > 0.0,
            "Gamma for FocalTverskyLoss must be positive, got {}",
            self.gamma
        );
        FocalTverskyLoss {
            tversky: self.tversky.init(),
            gamma: self.gamma,
        }
    }
}

/// Focal-Tversky loss.
#[derive(Debug, Clone)]
pub struct FocalTverskyLoss {
    /// Wrapped Tversky loss.
    pub tversky: TverskyLoss,
    /// Focusing exponent.
    pub gamma: f64,
}

impl Default for FocalTverskyLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl FocalTverskyLoss {
    /// Create a new Focal-Tversky loss with default configuration.
    pub fn new() -> Self {
        FocalTverskyLossConfig::new().init()
    }

    /// Compute `(1 + tversky_loss)^gamma`.
    ///
    /// # Shapes
    ///
    /// - x: `[batch_size, num_classes, ...spatial]`
    /// - output: `[1]`
    pub fn forward<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
        mask: Option<Tensor<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let tversky_loss = self.tversky.forward(x, y, mask)?.add_scalar(1.0);
        Ok(tversky_loss.powf_scalar(self.gamma))
    }
}
