//! Variational threshold loss.
//!
//! The decision threshold of a binary segmentation is treated as a latent
//! scalar with posterior `N(mu1, std1²)` and prior `N(mu2, std2²)`. The loss is
//! the closed-form KL divergence between the two 1-D Gaussians,
//! ```text
//! KL = ln(std2) - ln(std1) + (std1² + (mu1 - mu2)²) / (2 std2²) - 1/2
//! ```
//! summed over the last axis and averaged over the batch. Every parameter is
//! resolved by a selectable strategy, see [`PosteriorMean`], [`PosteriorStd`],
//! [`PriorMean`] and [`PriorStd`]. The prior is resolved before the posterior.
//!
//! Besides the loss, one threshold sample `mu1 + std1 · ε` is drawn with the
//! reparameterization trick and returned as its batch mean.

use burn::prelude::*;
use burn::tensor::{activation, Distribution};

use crate::error::{LossError, LossResult};

/// Floor for standard deviations before their logarithm is taken.
const STD_FLOOR: f64 = 1e-12;

/// Strategy for the posterior mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PosteriorMean {
    /// `relu(mu1)` of the supplied mean.
    Direct,
    /// Mean of `sigmoid(raw_output)`.
    SigmoidMean,
    /// Equal to the resolved prior mean.
    Prior,
}

/// Strategy for the posterior standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PosteriorStd {
    /// `exp(logvar1 / 2)` of the supplied log-variance.
    Direct,
    /// Largest std keeping `mu1 ± 2·std1` inside `[0, 1]`.
    Bounded,
    /// Equal to the resolved prior std.
    Prior,
}

/// Strategy for the prior mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriorMean {
    /// The configured constant.
    Fixed,
    /// Mean of `sigmoid(raw_output)`.
    SigmoidMean,
}

/// Strategy for the prior standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriorStd {
    /// The configured constant.
    Fixed,
    /// Largest std keeping `mu2 ± 2·std2` inside `[0, 1]`.
    Bounded,
}

impl TryFrom<u8> for PosteriorMean {
    type Error = LossError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Direct),
            1 => Ok(Self::SigmoidMean),
            2 => Ok(Self::Prior),
            value => Err(LossError::UnsupportedFlag {
                flag: "flag_mu1",
                value,
                allowed: "0, 1, 2",
            }),
        }
    }
}

impl TryFrom<u8> for PosteriorStd {
    type Error = LossError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Direct),
            1 => Ok(Self::Bounded),
            2 => Ok(Self::Prior),
            value => Err(LossError::UnsupportedFlag {
                flag: "flag_std1",
                value,
                allowed: "0, 1, 2",
            }),
        }
    }
}

impl TryFrom<u8> for PriorMean {
    type Error = LossError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Fixed),
            1 => Ok(Self::SigmoidMean),
            value => Err(LossError::UnsupportedFlag {
                flag: "flag_mu2",
                value,
                allowed: "0, 1",
            }),
        }
    }
}

impl TryFrom<u8> for PriorStd {
    type Error = LossError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Fixed),
            1 => Ok(Self::Bounded),
            value => Err(LossError::UnsupportedFlag {
                flag: "flag_std2",
                value,
                allowed: "0, 1",
            }),
        }
    }
}

/// Configuration for creating a [KL threshold loss](KldLoss).
#[derive(Config, Debug)]
pub struct KldLossConfig {
    /// Prior mean used by [`PriorMean::Fixed`]. Default: 0.5
    #[config(default = 0.5)]
    pub mu2: f64,
    /// Prior std used by [`PriorStd::Fixed`]. Default: 0.125
    #[config(default = 0.125)]
    pub std2: f64,
    /// Posterior mean strategy, see [`PosteriorMean`]. Default: 0
    #[config(default = 0)]
    pub flag_mu1: u8,
    /// Posterior std strategy, see [`PosteriorStd`]. Default: 0
    #[config(default = 0)]
    pub flag_std1: u8,
    /// Prior mean strategy, see [`PriorMean`]. Default: 0
    #[config(default = 0)]
    pub flag_mu2: u8,
    /// Prior std strategy, see [`PriorStd`]. Default: 1
    #[config(default = 1)]
    pub flag_std2: u8,
}

impl KldLossConfig {
    /// Initialize [KL threshold loss](KldLoss).
    ///
    /// # Errors
    /// [`LossError::UnsupportedFlag`] when a flag lies outside its set.
    pub fn init(&self) -> LossResult<KldLoss> {
        assert!(
            self.std2 > 0.0,
            "Prior std for KldLoss must be positive, got {}",
            self.std2
        );
        let loss = KldLoss {
            mu2: self.mu2,
            std2: self.std2,
            posterior_mean: self.flag_mu1.try_into()?,
            posterior_std: self.flag_std1.try_into()?,
            prior_mean: self.flag_mu2.try_into()?,
            prior_std: self.flag_std2.try_into()?,
        };
        if loss.prior_mean == PriorMean::Fixed && loss.prior_std == PriorStd::Bounded {
            assert!(
                self.mu2 > 0.0 && self.mu2 < 1.0,
                "Prior mean for KldLoss with a bounded prior std must lie in (0, 1), got {}",
                self.mu2
            );
        }
        tracing::debug!(?loss, "initialized kl threshold loss");
        Ok(loss)
    }
}

/// KL divergence between a threshold posterior and its prior.
#[derive(Debug, Clone)]
pub struct KldLoss {
    /// Fixed prior mean.
    pub mu2: f64,
    /// Fixed prior std.
    pub std2: f64,
    /// Strategy for the posterior mean.
    pub posterior_mean: PosteriorMean,
    /// Strategy for the posterior std.
    pub posterior_std: PosteriorStd,
    /// Strategy for the prior mean.
    pub prior_mean: PriorMean,
    /// Strategy for the prior std.
    pub prior_std: PriorStd,
}

impl Default for KldLoss {
    fn default() -> Self {
        Self {
            mu2: 0.5,
            std2: 0.125,
            posterior_mean: PosteriorMean::Direct,
            posterior_std: PosteriorStd::Direct,
            prior_mean: PriorMean::Fixed,
            prior_std: PriorStd::Bounded,
        }
    }
}

/// Output of [`KldLoss::forward`].
#[derive(Debug, Clone)]
pub struct KldOutput<B: Backend> {
    /// KL divergence, `[1]`.
    pub loss: Tensor<B, 1>,
    /// Batch mean of one reparameterized threshold sample, `[1]`. Detached.
    pub threshold: Tensor<B, 1>,
}

impl KldLoss {
    /// Compute the KL divergence and draw a threshold sample.
    ///
    /// # Shapes
    ///
    /// - raw_output: raw network scores of any shape
    /// - mu1: `[batch_size, n]`
    /// - logvar1: `[batch_size, n]`
    ///
    /// # Errors
    /// [`LossError::ShapeMismatch`] when `mu1` and `logvar1` disagree.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        raw_output: Tensor<B, D>,
        mu1: Tensor<B, 2>,
        logvar1: Tensor<B, 2>,
    ) -> LossResult<KldOutput<B>> {
        if mu1.dims() != logvar1.dims() {
            return Err(LossError::ShapeMismatch {
                context: "posterior log-variance",
                expected: mu1.dims().to_vec(),
                actual: logvar1.dims().to_vec(),
            });
        }

        let ones = mu1.ones_like();
        let sigmoid_mean = || {
            activation::sigmoid(raw_output.clone())
                .mean()
                .reshape([1, 1])
                .mul(ones.clone())
        };

        let mu2 = match self.prior_mean {
            PriorMean::Fixed => ones.clone().mul_scalar(self.mu2),
            PriorMean::SigmoidMean => sigmoid_mean(),
        };
        let std2 = match self.prior_std {
            PriorStd::Fixed => ones.clone().mul_scalar(self.std2),
            PriorStd::Bounded => bounded_std(mu2.clone()),
        };
        let mu1 = match self.posterior_mean {
            PosteriorMean::Direct => activation::relu(mu1),
            PosteriorMean::SigmoidMean => sigmoid_mean(),
            PosteriorMean::Prior => mu2.clone(),
        };
        let std1 = match self.posterior_std {
            PosteriorStd::Direct => logvar1.mul_scalar(0.5).exp(),
            PosteriorStd::Bounded => bounded_std(mu1.clone()),
            PosteriorStd::Prior => std2.clone(),
        };
        tracing::debug!(
            posterior_mean = ?self.posterior_mean,
            posterior_std = ?self.posterior_std,
            prior_mean = ?self.prior_mean,
            prior_std = ?self.prior_std,
            "resolved threshold distribution parameters"
        );

        let threshold = {
            let eps = std1.random_like(Distribution::Normal(0.0, 1.0));
            (mu1.clone() + std1.clone() * eps).mean().detach()
        };

        let var1 = std1.clone().powi_scalar(2);
        let var2 = std2.clone().powi_scalar(2);
        let spread = (var1 + (mu1 - mu2).powi_scalar(2)).div(var2);
        let kl = std2.clamp_min(STD_FLOOR).log() - std1.clamp_min(STD_FLOOR).log()
            + spread.mul_scalar(0.5)
            - 0.5;
        let loss = kl.sum_dim(1).mean();

        Ok(KldOutput { loss, threshold })
    }
}

/// `min((1 - mu) / 2, mu / 2)`, the largest std with `mu ± 2·std` inside `[0, 1]`.
fn bounded_std<B: Backend>(mu: Tensor<B, 2>) -> Tensor<B, 2> {
    let upper = mu.clone().neg().add_scalar(1.0).div_scalar(2.0);
    let lower = mu.div_scalar(2.0);
    let upper_is_tighter = upper.clone().lower(lower.clone());
    lower.mask_where(upper_is_tighter, upper)
}
