//! Sensitivity-Specificity loss.
//!
//! Blends the squared error on the positive and negative voxels of every class:
//! ```text
//! e           = (y - x)²
//! specificity = Σ(e · y)     / (Σ y     + s)
//! sensitivity = Σ(e · (1-y)) / (Σ (1-y) + s)
//! ss          = r · specificity + (1 - r) · sensitivity
//! Loss        = mean(ss)
//! ```
//!
//! Reference: Brosch et al., "Deep Convolutional Encoder Networks for Multiple
//! Sclerosis Lesion Segmentation", MICCAI 2015.

use burn::prelude::*;

use crate::{
    confusion::{drop_background, reduction_axes, sum_to_rows},
    error::LossResult,
    nonlinearity::Nonlinearity,
    one_hot::{to_one_hot, GroundTruth},
};

/// Configuration for creating a [Sensitivity-Specificity loss](SSLoss).
#[derive(Config, Debug)]
pub struct SSLossConfig {
    /// Transform applied to the raw prediction. Default: identity
    #[config(default = "Nonlinearity::Identity")]
    pub nonlinearity: Nonlinearity,
    /// Pool the batch into the sums. Default: false
    #[config(default = false)]
    pub batch_dice: bool,
    /// Include the background class in the mean. Default: true
    #[config(default = true)]
    pub do_bg: bool,
    /// Smoothing constant. Default: 1.0
    #[config(default = 1.0)]
    pub smooth: f64,
    /// Weight of the specificity term. Default: 0.1
    #[config(default = 0.1)]
    pub r: f64,
}

impl SSLossConfig {
    /// Initialize [Sensitivity-Specificity loss](SSLoss).
    pub fn init(&self) -> SSLoss {
        assert!(
            self.smooth > 0.0,
            "Smoothing for SSLoss must be positive, got {}",
            self.smooth
        );
        assert!(
            (0.0..=1.0).contains(&self.r),
            "Blend factor for SSLoss must lie in [0, 1], got {}",
            self.r
        );
        SSLoss {
            nonlinearity: self.nonlinearity,
            batch_dice: self.batch_dice,
            do_bg: self.do_bg,
            smooth: self.smooth,
            r: self.r,
        }
    }
}

/// Sensitivity-Specificity loss.
#[derive(Debug, Clone)]
pub struct SSLoss {
    /// Transform applied to the raw prediction.
    pub nonlinearity: Nonlinearity,
    /// Pool the batch axis into the sums.
    pub batch_dice: bool,
    /// Include class 0 in the final mean.
    pub do_bg: bool,
    /// Smoothing constant.
    pub smooth: f64,
    /// Weight of the specificity term.
    pub r: f64,
}

impl Default for SSLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl SSLoss {
    /// Create a new loss with `r = 0.1`.
    pub fn new() -> Self {
        SSLossConfig::new().init()
    }

    /// Compute `mean(ss)`.
    ///
    /// # Shapes
    ///
    /// - x: `[batch_size, num_classes, ...spatial]`
    /// - output: `[1]`
    pub fn forward<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        Ok(self.forward_no_reduction(x, y)?.mean())
    }

    /// Per-class blend before the mean, `[rows, C']`.
    pub fn forward_no_reduction<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
    ) -> LossResult<Tensor<B, 2>> {
        let shape = x.dims();
        let y_onehot = to_one_hot(shape, y.into(), &x.device())?;
        let x = self.nonlinearity.apply(x);
        let axes = reduction_axes::<D>(self.batch_dice);

        let background = y_onehot.clone().neg().add_scalar(1.0);
        let squared_error = (y_onehot.clone() - x).powi_scalar(2);

        let specificity_part = sum_to_rows(squared_error.clone() * y_onehot.clone(), &axes)
            / sum_to_rows(y_onehot, &axes).add_scalar(self.smooth);
        let sensitivity_part = sum_to_rows(squared_error * background.clone(), &axes)
            / sum_to_rows(background, &axes).add_scalar(self.smooth);

        let ss = specificity_part.mul_scalar(self.r) + sensitivity_part.mul_scalar(1.0 - self.r);
        Ok(drop_background(ss, self.do_bg))
    }
}
