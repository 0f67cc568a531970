//! Asymmetric similarity loss.
//!
//! A Tversky index whose weights come from a single `beta`:
//! `w = beta² / (1 + beta²)` on false negatives and `1 - w` on false positives.
//! With the default `beta = 1.5` recall is favoured over precision.
//!
//! Reference: Hashemi et al., <https://arxiv.org/abs/1803.11078>.

use burn::prelude::*;

use crate::{
    confusion::Confusion,
    error::LossResult,
    nonlinearity::Nonlinearity,
    one_hot::GroundTruth,
    region::{asymmetric_score, RegionOptions},
};

/// Configuration for creating an [asymmetric loss](AsymLoss).
#[derive(Config, Debug)]
pub struct AsymLossConfig {
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
    /// Recall emphasis. Default: 1.5
    #[config(default = 1.5)]
    pub beta: f64,
}

impl AsymLossConfig {
    /// Initialize [asymmetric loss](AsymLoss).
    pub fn init(&self) -> AsymLoss {
        let options = RegionOptions {
            nonlinearity: self.nonlinearity,
            batch_dice: self.batch_dice,
            do_bg: self.do_bg,
            smooth: self.smooth,
            square: self.square,
        };
        options.assertions("AsymLoss");
        AsymLoss {
            options,
            beta: self.beta,
        }
    }
}

/// Asymmetric similarity loss.
#[derive(Debug, Clone)]
pub struct AsymLoss {
    /// Region-loss hyperparameters.
    pub options: RegionOptions,
    /// Recall emphasis.
    pub beta: f64,
}

impl Default for AsymLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl AsymLoss {
    /// Create a new asymmetric loss with `beta = 1.5`.
    pub fn new() -> Self {
        AsymLossConfig::new().init()
    }

    /// Compute `-mean(asym)`.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
        mask: Option<Tensor<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let asym = self.forward_no_reduction(x, y, mask)?;
        Ok(asym.mean().neg())
    }

    /// Per-class asymmetric similarity, `[rows, C']`.
    pub fn forward_no_reduction<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
        mask: Option<Tensor<B, D>>,
    ) -> LossResult<Tensor<B, 2>> {
        let beta = self.beta;
        let score = |c: Confusion<B>, smooth| asymmetric_score(c, smooth, beta);
        self.options.scores(x, y.into(), mask, score)
    }
}
