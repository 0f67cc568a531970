//! Output nonlinearities applied to raw network output before region losses.

use burn::prelude::*;
use burn::tensor::activation;

/// Transform applied to the raw prediction before confusion accumulation.
///
/// Region losses store this as part of their configuration. Transforms outside
/// this set are applied by the caller, who then passes [`Nonlinearity::Identity`].
#[derive(Config, Debug, Copy, PartialEq, Eq, Hash)]
pub enum Nonlinearity {
    /// Use the prediction as given.
    Identity,
    /// Classwise softmax over axis 1, see [`softmax_helper`].
    Softmax,
    /// Elementwise logistic sigmoid.
    Sigmoid,
}

impl Default for Nonlinearity {
    fn default() -> Self {
        Self::Identity
    }
}

impl Nonlinearity {
    /// Apply the transform to a `[batch_size, num_classes, ...spatial]` tensor.
    pub fn apply<B: Backend, const D: usize>(self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Identity => x,
            Self::Softmax => softmax_helper(x),
            Self::Sigmoid => activation::sigmoid(x),
        }
    }
}

/// Classwise softmax over axis 1.
///
/// The per-location maximum over classes is subtracted before exponentiation, so
/// large logits do not overflow. The shift is detached: it cancels in the ratio
/// and carries no gradient.
pub fn softmax_helper<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let x_max = x.clone().max_dim(1).detach();
    let e_x = (x - x_max).exp();
    let total = e_x.clone().sum_dim(1);
    e_x / total
}
