//! Composite losses built from a region term and a pixel term.
//!
//! The Dice term of every composite applies classwise softmax to the raw
//! logits, so all composites take the same logits as their cross-entropy term.
//!
//! - [`DcAndCeLoss`]: `dice_loss + ce_loss`
//! - [`DcAndTopKLoss`]: `dice_loss + topk_loss`
//! - [`ExpLogLoss`]: `0.8 · (-ln(max(1 - dice_loss, 1e-6)))^γ + 0.2 · wce_loss`
//!
//! Reference: Wong et al., "3D Segmentation with Exponential Logarithmic Loss",
//! <https://arxiv.org/abs/1809.00076>.

use core::str::FromStr;

use burn::prelude::*;

use crate::{
    cross_entropy::{
        CrossentropyNdLoss, CrossentropyNdLossConfig, WeightedCrossEntropyLoss,
        WeightedCrossEntropyLossConfig,
    },
    dice::{SoftDiceLoss, SoftDiceLossConfig},
    error::{LossError, LossResult},
    nonlinearity::Nonlinearity,
    one_hot::GroundTruth,
    topk::{TopKLoss, TopKLossConfig},
};

/// Lower bound of the Dice score before its logarithm is taken.
const DICE_SCORE_FLOOR: f64 = 1e-6;

/// How the terms of a composite loss are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Aggregation {
    /// Plain sum of the terms.
    #[default]
    Sum,
}

impl FromStr for Aggregation {
    type Err = LossError;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "sum" => Ok(Self::Sum),
            other => Err(LossError::UnsupportedAggregation {
                mode: other.to_string(),
            }),
        }
    }
}

impl Aggregation {
    fn combine<B: Backend>(self, region: Tensor<B, 1>, pixel: Tensor<B, 1>) -> Tensor<B, 1> {
        match self {
            Self::Sum => region + pixel,
        }
    }
}

fn softmax_dice(config: &SoftDiceLossConfig) -> SoftDiceLoss {
    config
        .clone()
        .with_nonlinearity(Nonlinearity::Softmax)
        .init()
}

/// Configuration for creating a [Dice + cross-entropy loss](DcAndCeLoss).
#[derive(Config, Debug)]
pub struct DcAndCeLossConfig {
    /// Dice term. Its nonlinearity is replaced by classwise softmax.
    #[config(default = "SoftDiceLossConfig::new()")]
    pub soft_dice: SoftDiceLossConfig,
    /// Cross-entropy term.
    #[config(default = "CrossentropyNdLossConfig::new()")]
    pub ce: CrossentropyNdLossConfig,
    /// Aggregation mode. Only `"sum"` is supported. Default: "sum"
    #[config(default = "String::from(\"sum\")")]
    pub aggregate: String,
}

impl DcAndCeLossConfig {
    /// Initialize [Dice + cross-entropy loss](DcAndCeLoss).
    ///
    /// # Errors
    /// [`LossError::UnsupportedAggregation`] for any mode other than `"sum"`.
    pub fn init<B: Backend>(&self, device: &B::Device) -> LossResult<DcAndCeLoss<B>> {
        let aggregate: Aggregation = self.aggregate.parse()?;
        tracing::debug!(?aggregate, "initialized dice + cross-entropy");
        Ok(DcAndCeLoss {
            dice: softmax_dice(&self.soft_dice),
            ce: self.ce.init(device),
            aggregate,
        })
    }
}

/// Sum of Soft Dice and cross-entropy.
#[derive(Debug, Clone)]
pub struct DcAndCeLoss<B: Backend> {
    /// Dice term with softmax.
    pub dice: SoftDiceLoss,
    /// Cross-entropy term.
    pub ce: CrossentropyNdLoss<B>,
    /// Aggregation mode.
    pub aggregate: Aggregation,
}

impl<B: Backend> DcAndCeLoss<B> {
    /// Compute `dice_loss + ce_loss`.
    ///
    /// # Shapes
    ///
    /// - x: raw logits `[batch_size, num_classes, ...spatial]`
    /// - y: label map `[batch_size, 1, ...spatial]` or one-hot like `x`
    /// - output: `[1]`
    pub fn forward<const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let y = y.into();
        let dc_loss = self.dice.forward(x.clone(), y.clone(), None)?;
        let ce_loss = self.ce.forward(x, y)?;
        Ok(self.aggregate.combine(dc_loss, ce_loss))
    }
}

/// Configuration for creating a [Dice + top-k loss](DcAndTopKLoss).
#[derive(Config, Debug)]
pub struct DcAndTopKLossConfig {
    /// Dice term. Its nonlinearity is replaced by classwise softmax.
    #[config(default = "SoftDiceLossConfig::new()")]
    pub soft_dice: SoftDiceLossConfig,
    /// Top-k cross-entropy term.
    #[config(default = "TopKLossConfig::new()")]
    pub topk: TopKLossConfig,
    /// Aggregation mode. Only `"sum"` is supported. Default: "sum"
    #[config(default = "String::from(\"sum\")")]
    pub aggregate: String,
}

impl DcAndTopKLossConfig {
    /// Initialize [Dice + top-k loss](DcAndTopKLoss).
    ///
    /// # Errors
    /// [`LossError::UnsupportedAggregation`] for any mode other than `"sum"`.
    pub fn init(&self) -> LossResult<DcAndTopKLoss> {
        let aggregate: Aggregation = self.aggregate.parse()?;
        Ok(DcAndTopKLoss {
            dice: softmax_dice(&self.soft_dice),
            topk: self.topk.init(),
            aggregate,
        })
    }
}

/// Sum of Soft Dice and top-k cross-entropy.
#[derive(Debug, Clone)]
pub struct DcAndTopKLoss {
    /// Dice term with softmax.
    pub dice: SoftDiceLoss,
    /// Top-k cross-entropy term.
    pub topk: TopKLoss,
    /// Aggregation mode.
    pub aggregate: Aggregation,
}

impl DcAndTopKLoss {
    /// Compute `dice_loss + topk_loss`.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let y = y.into();
        let dc_loss = self.dice.forward(x.clone(), y.clone(), None)?;
        let topk_loss = self.topk.forward(x, y)?;
        Ok(self.aggregate.combine(dc_loss, topk_loss))
    }
}

/// Configuration for creating an [exponential logarithmic loss](ExpLogLoss).
#[derive(Config, Debug)]
pub struct ExpLogLossConfig {
    /// Dice term. Its nonlinearity is replaced by classwise softmax.
    #[config(default = "SoftDiceLossConfig::new()")]
    pub soft_dice: SoftDiceLossConfig,
    /// Weighted cross-entropy term.
    #[config(default = "WeightedCrossEntropyLossConfig::new()")]
    pub wce: WeightedCrossEntropyLossConfig,
    /// Exponent of the logarithmic Dice term. Default: 0.3
    #[config(default = 0.3)]
    pub gamma: f64,
    /// Weight of the Dice term. Default: 0.8
    #[config(default = 0.8)]
    pub dice_weight: f64,
    /// Weight of the cross-entropy term. Default: 0.2
    #[config(default = 0.2)]
    pub wce_weight: f64,
}

impl ExpLogLossConfig {
    /// Initialize [exponential logarithmic loss](ExpLogLoss).
    pub fn init<B: Backend>(&self, device: &B::Device) -> ExpLogLoss<B> {
        assert!(
            self.gamma > 0.0,
            "Gamma for ExpLogLoss must be positive, got {}",
            self.gamma
        );
        ExpLogLoss {
            dice: softmax_dice(&self.soft_dice),
            wce: self.wce.init(device),
            gamma: self.gamma,
            dice_weight: self.dice_weight,
            wce_weight: self.wce_weight,
        }
    }
}

/// Exponential logarithmic loss.
#[derive(Debug, Clone)]
pub struct ExpLogLoss<B: Backend> {
    /// Dice term with softmax.
    pub dice: SoftDiceLoss,
    /// Weighted cross-entropy term.
    pub wce: WeightedCrossEntropyLoss<B>,
    /// Exponent of the logarithmic Dice term.
    pub gamma: f64,
    /// Weight of the Dice term.
    pub dice_weight: f64,
    /// Weight of the cross-entropy term.
    pub wce_weight: f64,
}

impl<B: Backend> ExpLogLoss<B> {
    /// Create a new loss with default configuration.
    pub fn new(device: &B::Device) -> Self {
        ExpLogLossConfig::new().init(device)
    }

    /// Compute `w_d · (-ln(max(dice_score, 1e-6)))^γ + w_c · wce_loss`.
    pub fn forward<const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let y = y.into();
        let dice_score = self
            .dice
            .forward(x.clone(), y.clone(), None)?
            .neg()
            .add_scalar(1.0);
        let wce_loss = self.wce.forward(x, y)?;

        let log_term = dice_score
            .clamp_min(DICE_SCORE_FLOOR)
            .log()
            .neg()
            .powf_scalar(self.gamma);
        Ok(log_term.mul_scalar(self.dice_weight) + wce_loss.mul_scalar(self.wce_weight))
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance, Transaction};

    use super::*;
    use crate::tests::{TestAutodiffBackend, TestBackend};

    fn sample() -> (Tensor<TestBackend, 3>, Tensor<TestBackend, 3, Int>) {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::from_data(
            TensorData::from([
                [[1.5, -0.3, 0.2, 2.0], [0.1, 1.2, 0.4, -1.0]],
                [[0.0, 0.7, -0.5, 0.3], [1.0, -0.2, 0.9, 0.8]],
            ]),
            &device,
        );
        let y = Tensor::<TestBackend, 3, Int>::from_data(
            TensorData::from([[[0, 1, 1, 0]], [[1, 0, 1, 1]]]),
            &device,
        );
        (x, y)
    }

    fn autodiff_sample() -> (Tensor<TestAutodiffBackend, 3>, Tensor<TestAutodiffBackend, 3, Int>) {
        let device = Default::default();
        let (x, y) = sample();
        let x = Tensor::<TestAutodiffBackend, 3>::from_data(x.into_data(), &device).require_grad();
        let y = Tensor::<TestAutodiffBackend, 3, Int>::from_data(y.into_data(), &device);
        (x, y)
    }

    fn assert_finite_nonzero_grad(
        x: &Tensor<TestAutodiffBackend, 3>,
        loss: Tensor<TestAutodiffBackend, 1>,
    ) {
        let grads = loss.backward();
        let grad = x.grad(&grads).expect("prediction requires grad");

        assert_eq!(grad.dims(), [2, 2, 4]);
        let abs_sum: f32 = grad.abs().sum().into_scalar();
        assert!(abs_sum.is_finite() && abs_sum > 0.0);
    }

    fn softmax_dice_loss() -> SoftDiceLoss {
        SoftDiceLossConfig::new()
            .with_nonlinearity(Nonlinearity::Softmax)
            .init()
    }

    #[test]
    fn aggregation_parses_only_sum() {
        assert_eq!("sum".parse::<Aggregation>(), Ok(Aggregation::Sum));
        assert_eq!(
            "mean".parse::<Aggregation>(),
            Err(LossError::UnsupportedAggregation {
                mode: "mean".to_string()
            })
        );
    }

    #[test]
    fn dc_and_ce_is_sum_of_terms() {
        let (x, y) = sample();
        let device = Default::default();
        let loss = DcAndCeLossConfig::new()
            .init::<TestBackend>(&device)
            .expect("sum aggregation");

        let total = loss.forward(x.clone(), y.clone()).expect("valid input");
        let dice = softmax_dice_loss()
            .forward(x.clone(), y.clone(), None)
            .expect("valid input");
        let ce = CrossentropyNdLoss::<TestBackend>::new(&device)
            .forward(x, y)
            .expect("valid input");

        let [total, expected] = Transaction::default()
            .register(total)
            .register(dice + ce)
            .execute()
            .try_into()
            .expect("Correct amount of tensor data");
        total.assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn dc_and_ce_backpropagates_to_logits() {
        let (x, y) = autodiff_sample();
        let device = Default::default();

        let loss = DcAndCeLossConfig::new()
            .init::<TestAutodiffBackend>(&device)
            .expect("sum aggregation")
            .forward(x.clone(), y)
            .expect("valid input");

        assert_finite_nonzero_grad(&x, loss);
    }

    #[test]
    fn dc_and_ce_rejects_unknown_aggregation() {
        let device = Default::default();
        let result = DcAndCeLossConfig::new()
            .with_aggregate("product".to_string())
            .init::<TestBackend>(&device);

        assert!(matches!(
            result,
            Err(LossError::UnsupportedAggregation { mode }) if mode == "product"
        ));
    }

    #[test]
    fn dc_and_topk_is_sum_of_terms() {
        let (x, y) = sample();
        let loss = DcAndTopKLossConfig::new()
            .with_topk(TopKLossConfig::new().with_k(50.0))
            .init()
            .expect("sum aggregation");

        let total = loss.forward(x.clone(), y.clone()).expect("valid input");
        let dice = softmax_dice_loss()
            .forward(x.clone(), y.clone(), None)
            .expect("valid input");
        let topk = TopKLossConfig::new()
            .with_k(50.0)
            .init()
            .forward(x, y)
            .expect("valid input");

        let [total, expected] = Transaction::default()
            .register(total)
            .register(dice + topk)
            .execute()
            .try_into()
            .expect("Correct amount of tensor data");
        total.assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn dc_and_topk_backpropagates_to_logits() {
        let (x, y) = autodiff_sample();

        let loss = DcAndTopKLossConfig::new()
            .with_topk(TopKLossConfig::new().with_k(50.0))
            .init()
            .expect("sum aggregation")
            .forward(x.clone(), y)
            .expect("valid input");

        assert_finite_nonzero_grad(&x, loss);
    }

    #[test]
    fn dc_and_topk_rejects_unknown_aggregation() {
        let result = DcAndTopKLossConfig::new()
            .with_aggregate("max".to_string())
            .init();

        assert!(matches!(result, Err(LossError::UnsupportedAggregation { .. })));
    }

    #[test]
    fn exp_log_matches_closed_form() {
        let (x, y) = sample();
        let device = Default::default();

        let result = ExpLogLoss::<TestBackend>::new(&device)
            .forward(x.clone(), y.clone())
            .expect("valid input");
        let dice = softmax_dice_loss()
            .forward(x.clone(), y.clone(), None)
            .expect("valid input");
        let ce = CrossentropyNdLoss::<TestBackend>::new(&device)
            .forward(x, y)
            .expect("valid input");

        let [result, dice, ce] = Transaction::default()
            .register(result)
            .register(dice)
            .register(ce)
            .execute()
            .try_into()
            .expect("Correct amount of tensor data");
        let dice = dice.to_vec::<f32>().expect("f32 data")[0];
        let ce = ce.to_vec::<f32>().expect("f32 data")[0];
        let expected = 0.8 * (-(1.0 - dice).ln()).powf(0.3) + 0.2 * ce;
        result.assert_approx_eq::<f32>(&TensorData::from([expected]), Tolerance::default());
    }

    #[test]
    fn exp_log_backpropagates_to_logits() {
        let (x, y) = autodiff_sample();
        let device = Default::default();

        let loss = ExpLogLoss::<TestAutodiffBackend>::new(&device)
            .forward(x.clone(), y)
            .expect("valid input");

        assert_finite_nonzero_grad(&x, loss);
    }

    #[test]
    #[should_panic = "Gamma for ExpLogLoss must be positive"]
    fn exp_log_config_negative_gamma_panics() {
        let device = Default::default();
        let _loss = ExpLogLossConfig::new()
            .with_gamma(-1.0)
            .init::<TestBackend>(&device);
    }
}
