//! Generalized Dice losses.
//!
//! Each class is weighted by the inverse square of its ground-truth volume so
//! that small structures contribute as much as large ones.
//!
//! - [`GDiceLoss`] pools all classes of a sample into one ratio and averages
//!   over the batch:
//!   ```text
//!   w_c  = 1 / (Σ y_c + ε)²
//!   gdc  = 2 (Σ_c w_c Σ x_c y_c + s) / (Σ_c w_c (Σ x_c + Σ y_c) + s)
//!   Loss = 1 - mean_b(gdc)
//!   ```
//! - [`GDiceLossV2`] flattens the whole batch per class, clamps the weights and
//!   returns the negated score `-2 · intersect / denominator`.
//! - [`PenaltyGDiceLoss`] rescales the [`GDiceLoss`] value by
//!   `1 / (1 + k (1 - loss))`.
//!
//! References: Sudre et al., <https://arxiv.org/abs/1707.03237>;
//! Yang et al., "Penalty Dice", <https://arxiv.org/abs/1908.03651>.

use burn::prelude::*;

use crate::{
    confusion::{reduction_axes, sum_to_rows},
    error::LossResult,
    nonlinearity::Nonlinearity,
    one_hot::{to_one_hot, GroundTruth},
};

/// Added to the class volume before inverting it.
const VOLUME_EPS: f64 = 1e-10;

/// Configuration for creating a [Generalized Dice loss](GDiceLoss).
#[derive(Config, Debug)]
pub struct GDiceLossConfig {
    /// Transform applied to the raw prediction. Default: identity
    #[config(default = "Nonlinearity::Identity")]
    pub nonlinearity: Nonlinearity,
    /// Smoothing constant. Default: 1e-7
    #[config(default = 1e-7)]
    pub smooth: f64,
}

impl GDiceLossConfig {
    /// Initialize [Generalized Dice loss](GDiceLoss).
    pub fn init(&self) -> GDiceLoss {
        assert!(
            self.smooth > 0.0,
            "Smoothing for GDiceLoss must be positive, got {}",
            self.smooth
        );
        GDiceLoss {
            nonlinearity: self.nonlinearity,
            smooth: self.smooth,
        }
    }
}

/// Generalized Dice loss, one pooled ratio per sample.
#[derive(Debug, Clone)]
pub struct GDiceLoss {
    /// Transform applied to the raw prediction.
    pub nonlinearity: Nonlinearity,
    /// Smoothing constant.
    pub smooth: f64,
}

impl Default for GDiceLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl GDiceLoss {
    /// Create a new loss with `smooth = 1e-7`.
    pub fn new() -> Self {
        GDiceLossConfig::new().init()
    }

    /// Compute `1 - mean(gdc)`.
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
        let gdc = self.forward_no_reduction(x, y)?;
        Ok(gdc.mean().neg().add_scalar(1.0))
    }

    /// Generalized Dice coefficient of every sample, `[batch_size]`.
    pub fn forward_no_reduction<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let shape = x.dims();
        let y_onehot = to_one_hot(shape, y.into(), &x.device())?;
        let x = self.nonlinearity.apply(x);
        let axes = reduction_axes::<D>(false);

        let volume = sum_to_rows(y_onehot.clone(), &axes);
        let weights = volume
            .clone()
            .add_scalar(VOLUME_EPS)
            .powi_scalar(2)
            .recip()
            .detach();

        let intersection = weights.clone() * sum_to_rows(x.clone() * y_onehot, &axes);
        let union = weights * (sum_to_rows(x, &axes) + volume);

        let numerator = intersection
            .sum_dim(1)
            .add_scalar(self.smooth)
            .mul_scalar(2.0);
        let denominator = union.sum_dim(1).add_scalar(self.smooth);
        Ok((numerator / denominator).flatten::<1>(0, 1))
    }
}

/// Configuration for creating a [Generalized Dice loss, version 2](GDiceLossV2).
#[derive(Config, Debug)]
pub struct GDiceLossV2Config {
    /// Transform applied to the raw prediction. Default: identity
    #[config(default = "Nonlinearity::Identity")]
    pub nonlinearity: Nonlinearity,
    /// Lower clamp of the squared class volume and of the denominator. Default: 1e-5
    #[config(default = 1e-5)]
    pub smooth: f64,
}

impl GDiceLossV2Config {
    /// Initialize [Generalized Dice loss, version 2](GDiceLossV2).
    pub fn init(&self) -> GDiceLossV2 {
        assert!(
            self.smooth > 0.0,
            "Smoothing for GDiceLossV2 must be positive, got {}",
            self.smooth
        );
        GDiceLossV2 {
            nonlinearity: self.nonlinearity,
            smooth: self.smooth,
        }
    }
}

/// Generalized Dice loss computed on a channel-major flattening of the batch.
#[derive(Debug, Clone)]
pub struct GDiceLossV2 {
    /// Transform applied to the raw prediction.
    pub nonlinearity: Nonlinearity,
    /// Lower clamp of the squared class volume and of the denominator.
    pub smooth: f64,
}

impl Default for GDiceLossV2 {
    fn default() -> Self {
        Self::new()
    }
}

impl GDiceLossV2 {
    /// Create a new loss with `smooth = 1e-5`.
    pub fn new() -> Self {
        GDiceLossV2Config::new().init()
    }

    /// Compute `-2 · intersect / denominator`. A perfect prediction scores `-1`.
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
        let shape = x.dims();
        let y_onehot = to_one_hot(shape, y.into(), &x.device())?;
        let x = self.nonlinearity.apply(x);

        let input = channel_major(x);
        let target = channel_major(y_onehot);

        let target_sum = target.clone().sum_dim(1);
        let class_weights = target_sum
            .powi_scalar(2)
            .clamp_min(self.smooth)
            .recip()
            .detach();

        let intersect = ((input.clone() * target.clone()).sum_dim(1) * class_weights.clone()).sum();
        let denominator = ((input + target).sum_dim(1) * class_weights).sum();

        Ok(intersect.mul_scalar(-2.0) / denominator.clamp_min(self.smooth))
    }
}

/// `[batch_size, num_classes, ...spatial]` to `[num_classes, batch_size * prod(spatial)]`.
fn channel_major<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<B, 2> {
    let order: [isize; D] = core::array::from_fn(|i| match i {
        0 => 1,
        1 => 0,
        i => i as isize,
    });
    let num_classes = tensor.dims()[1];
    tensor.permute(order).reshape([num_classes as i32, -1])
}

/// Configuration for creating a [Penalty Generalized Dice loss](PenaltyGDiceLoss).
#[derive(Config, Debug)]
pub struct PenaltyGDiceLossConfig {
    /// Penalty strength. Default: 2.5
    #[config(default = 2.5)]
    pub k: f64,
    /// Smoothing constant of the wrapped Generalized Dice. Default: 1e-7
    #[config(default = 1e-7)]
    pub smooth: f64,
}

impl PenaltyGDiceLossConfig {
    /// Initialize [Penalty Generalized Dice loss](PenaltyGDiceLoss).
    pub fn init(&self) -> PenaltyGDiceLoss {
        assert!(
            self.k >= 0.0,
            "Penalty for PenaltyGDiceLoss must be non-negative, got {}",
            self.k
        );
        let gdc = GDiceLossConfig::new()
            .with_nonlinearity(Nonlinearity::Softmax)
            .with_smooth(self.smooth)
            .init();
        PenaltyGDiceLoss { gdc, k: self.k }
    }
}

/// Penalty Generalized Dice loss over raw logits.
#[derive(Debug, Clone)]
pub struct PenaltyGDiceLoss {
    /// Wrapped Generalized Dice with classwise softmax.
    pub gdc: GDiceLoss,
    /// Penalty strength.
    pub k: f64,
}

impl Default for PenaltyGDiceLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl PenaltyGDiceLoss {
    /// Create a new loss with `k = 2.5`.
    pub fn new() -> Self {
        PenaltyGDiceLossConfig::new().init()
    }

    /// Compute `loss / (1 + k (1 - loss))` where `loss` is the Generalized Dice loss.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let gdc_loss = self.gdc.forward(x, y)?;
        let penalty = gdc_loss
            .clone()
            .neg()
            .add_scalar(1.0)
            .mul_scalar(self.k)
            .add_scalar(1.0);
        Ok(gdc_loss / penalty)
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{activation::softmax, TensorData, Tolerance, Transaction};

    use super::*;
    use crate::tests::{TestAutodiffBackend, TestBackend};

    fn sample() -> (Tensor<TestBackend, 3>, Tensor<TestBackend, 3, Int>) {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::from_data(
            TensorData::from([[[0.8, 0.4], [0.2, 0.6]]]),
            &device,
        );
        let y = Tensor::<TestBackend, 3, Int>::from_data(TensorData::from([[[0, 1]]]), &device);
        (x, y)
    }

    #[test]
    fn gdice_perfect_prediction_is_zero() {
        let device = Default::default();
        let one_hot = Tensor::<TestBackend, 3>::from_data(
            TensorData::from([[[1.0, 1.0, 0.0], [0.0, 0.0, 1.0]]]),
            &device,
        );

        let loss = GDiceLoss::new()
            .forward(one_hot.clone(), one_hot)
            .expect("valid input");

        loss.into_data()
            .assert_approx_eq::<f32>(&TensorData::from([0.0]), Tolerance::absolute(1e-5));
    }

    #[test]
    fn gdice_matches_closed_form() {
        let (x, y) = sample();

        let loss = GDiceLoss::new().forward(x, y).expect("valid input");

        // unit weights: intersection 0.8 + 0.6, union 2.2 + 1.8
        loss.into_data()
            .assert_approx_eq::<f32>(&TensorData::from([0.3]), Tolerance::default());
    }

    #[test]
    fn gdice_weights_favour_small_classes() {
        let device = Default::default();
        // Class 1 occupies a single voxel and is missed entirely
        let x = Tensor::<TestBackend, 3>::from_data(
            TensorData::from([[[1.0, 1.0, 1.0, 1.0], [0.0, 0.0, 0.0, 0.0]]]),
            &device,
        );
        let y =
            Tensor::<TestBackend, 3, Int>::from_data(TensorData::from([[[0, 0, 0, 1]]]), &device);

        let gdc = GDiceLoss::new()
            .forward_no_reduction(x, y)
            .expect("valid input");

        // w0 = 1/9, w1 = 1; intersection 3/9, union 7/9 + 1
        let expected = 2.0 * (3.0 / 9.0) / (7.0 / 9.0 + 1.0);
        gdc.into_data()
            .assert_approx_eq::<f32>(&TensorData::from([expected]), Tolerance::default());
    }

    #[test]
    fn gdice_v2_perfect_prediction_is_minus_one() {
        let device = Default::default();
        let one_hot = Tensor::<TestBackend, 4>::from_data(
            TensorData::from([[[[1.0, 0.0]], [[0.0, 1.0]]], [[[0.0, 0.0]], [[1.0, 1.0]]]]),
            &device,
        );

        let loss = GDiceLossV2::new()
            .forward(one_hot.clone(), one_hot)
            .expect("valid input");

        loss.into_data()
            .assert_approx_eq::<f32>(&TensorData::from([-1.0]), Tolerance::absolute(1e-5));
    }

    #[test]
    fn gdice_v2_matches_closed_form() {
        let (x, y) = sample();

        let loss = GDiceLossV2::new().forward(x, y).expect("valid input");

        loss.into_data()
            .assert_approx_eq::<f32>(&TensorData::from([-0.7]), Tolerance::default());
    }

    #[test]
    fn channel_major_groups_voxels_by_class() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 3>::from_data(
            TensorData::from([[[1.0, 2.0], [3.0, 4.0]], [[5.0, 6.0], [7.0, 8.0]]]),
            &device,
        );

        channel_major(x).into_data().assert_approx_eq::<f32>(
            &TensorData::from([[1.0, 2.0, 5.0, 6.0], [3.0, 4.0, 7.0, 8.0]]),
            Tolerance::default(),
        );
    }

    #[test]
    fn penalty_gdice_rescales_softmax_gdice() {
        let (x, y) = sample();
        let logits = x.log();

        let penalty = PenaltyGDiceLoss::new()
            .forward(logits.clone(), y.clone())
            .expect("valid input");
        let plain = GDiceLoss::new()
            .forward(softmax(logits, 1), y)
            .expect("valid input");

        let [penalty, plain] = Transaction::default()
            .register(penalty)
            .register(plain)
            .execute()
            .try_into()
            .expect("Correct amount of tensor data");
        let plain = plain.to_vec::<f32>().expect("f32 data")[0];
        let expected = plain / (1.0 + 2.5 * (1.0 - plain));
        penalty.assert_approx_eq::<f32>(&TensorData::from([expected]), Tolerance::default());
    }

    #[test]
    fn gdice_v2_backpropagates_to_prediction() {
        let device = Default::default();
        let x = Tensor::<TestAutodiffBackend, 3>::from_data(
            TensorData::from([[[0.8, 0.4], [0.2, 0.6]]]),
            &device,
        )
        .require_grad();
        let y =
            Tensor::<TestAutodiffBackend, 3, Int>::from_data(TensorData::from([[[0, 1]]]), &device);

        let loss = GDiceLossV2::new()
            .forward(x.clone(), y)
            .expect("valid input");
        let grads = loss.backward();
        let grad = x.grad(&grads).expect("prediction requires grad");

        assert_eq!(grad.dims(), [1, 2, 2]);
    }

    #[test]
    fn penalty_gdice_backpropagates_through_softmax() {
        let device = Default::default();
        let x = Tensor::<TestAutodiffBackend, 3>::from_data(
            TensorData::from([[[1.5, -0.4, 0.3], [0.2, 0.9, -1.0]]]),
            &device,
        )
        .require_grad();
        let y = Tensor::<TestAutodiffBackend, 3, Int>::from_data(
            TensorData::from([[[0, 1, 1]]]),
            &device,
        );

        let loss = PenaltyGDiceLoss::new()
            .forward(x.clone(), y)
            .expect("valid input");
        let grads = loss.backward();
        let grad = x.grad(&grads).expect("prediction requires grad");

        assert_eq!(grad.dims(), [1, 2, 3]);
        let abs_sum: f32 = grad.abs().sum().into_scalar();
        assert!(abs_sum.is_finite() && abs_sum > 0.0);
    }

    #[test]
    #[should_panic = "Smoothing for GDiceLossV2 must be positive"]
    fn gdice_v2_config_zero_smoothing_panics() {
        let _loss = GDiceLossV2Config::new().with_smooth(0.0).init();
    }
}
