//! Soft confusion accumulation shared by the region-overlap losses.
//!
//! For a probabilistic prediction `x` and a one-hot target `y` the pointwise
//! soft counts are
//! ```text
//! tp = x * y
//! fp = x * (1 - y)
//! fn = (1 - x) * y
//! ```
//! which are optionally masked and squared, then summed over the reduction axes.

use burn::prelude::*;
use burn::tensor::BasicOps;

use crate::{
    error::{LossError, LossResult},
    one_hot::{to_one_hot, GroundTruth},
};

/// Summed soft true-positive, false-positive and false-negative counts.
///
/// Every tensor has shape `[rows, num_classes]`. `rows` is the product of the
/// non-class axes left after reduction: `1` when the batch axis is reduced
/// together with all spatial axes, `batch_size` when only spatial axes are.
#[derive(Debug, Clone)]
pub struct Confusion<B: Backend> {
    /// Soft true positives.
    pub tp: Tensor<B, 2>,
    /// Soft false positives.
    pub fp: Tensor<B, 2>,
    /// Soft false negatives.
    pub fn_: Tensor<B, 2>,
}

/// Reduction axes for a rank-`D` prediction.
///
/// With `batch_dice` the batch axis is pooled together with the spatial axes,
/// giving one score per class; otherwise every sample keeps its own row.
pub fn reduction_axes<const D: usize>(batch_dice: bool) -> Vec<usize> {
    let spatial = 2..D;
    if batch_dice {
        std::iter::once(0).chain(spatial).collect()
    } else {
        spatial.collect()
    }
}

/// Compute `(tp, fp, fn)` for a prediction and its ground truth.
///
/// # Arguments
/// * `x` - Prediction after any nonlinearity, `[batch_size, num_classes, ...spatial]`
/// * `gt` - Ground truth, reconciled with [`to_one_hot`]
/// * `axes` - Axes to sum over; `None` sums over all spatial axes. Axis 1 is the
///   class axis and may not be reduced.
/// * `mask` - Optional validity mask `[batch_size, 1, ...spatial]`, `1` for valid
/// * `square` - Square the pointwise counts before summation
pub fn tp_fp_fn<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    gt: GroundTruth<B, D>,
    axes: Option<&[usize]>,
    mask: Option<Tensor<B, D>>,
    square: bool,
) -> LossResult<Confusion<B>> {
    let shape = x.dims();
    let y_onehot = to_one_hot(shape, gt, &x.device())?;
    tp_fp_fn_one_hot(x, y_onehot, axes, mask, square)
}

/// [`tp_fp_fn`] for a target that is already one-hot with the prediction's shape.
pub fn tp_fp_fn_one_hot<B: Backend, const D: usize>(
    x: Tensor<B, D>,
    y_onehot: Tensor<B, D>,
    axes: Option<&[usize]>,
    mask: Option<Tensor<B, D>>,
    square: bool,
) -> LossResult<Confusion<B>> {
    let shape = x.dims();
    let default_axes = reduction_axes::<D>(false);
    let axes = axes.unwrap_or(&default_axes);

    if let Some(&axis) = axes.iter().find(|&&axis| axis == 1 || axis >= D) {
        return Err(LossError::ShapeMismatch {
            context: "reduction axes (class axis 1 and out-of-range axes cannot be reduced)",
            expected: (0..D).filter(|&a| a != 1).collect(),
            actual: vec![axis],
        });
    }

    let mut tp = x.clone() * y_onehot.clone();
    let mut fp = x.clone() * (y_onehot.clone().neg() + 1.0);
    let mut fn_ = (x.neg() + 1.0) * y_onehot;

    if let Some(mask) = mask {
        check_mask(&mask, shape)?;
        tp = tp * mask.clone();
        fp = fp * mask.clone();
        fn_ = fn_ * mask;
    }

    if square {
        tp = tp.powi_scalar(2);
        fp = fp.powi_scalar(2);
        fn_ = fn_.powi_scalar(2);
    }

    Ok(Confusion {
        tp: sum_to_rows(tp, axes),
        fp: sum_to_rows(fp, axes),
        fn_: sum_to_rows(fn_, axes),
    })
}

/// Sum `tensor` over `axes` and lay the result out as `[rows, num_classes]`.
pub fn sum_to_rows<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    axes: &[usize],
) -> Tensor<B, 2> {
    let mut summed = tensor;
    for &axis in axes {
        summed = summed.sum_dim(axis);
    }
    let num_classes = summed.dims()[1];
    class_last(summed).reshape([-1, num_classes as i32])
}

/// Move the class axis (1) to the last position, keeping all other axes in order.
pub fn class_last<B: Backend, const D: usize, K: BasicOps<B>>(
    tensor: Tensor<B, D, K>,
) -> Tensor<B, D, K> {
    let order: [isize; D] = core::array::from_fn(|i| match i {
        0 => 0,
        i if i == D - 1 => 1,
        i => i as isize + 1,
    });
    tensor.permute(order)
}

/// Drop the background column when `do_bg` is false.
pub fn drop_background<B: Backend>(scores: Tensor<B, 2>, do_bg: bool) -> Tensor<B, 2> {
    if do_bg {
        return scores;
    }
    let [rows, num_classes] = scores.dims();
    scores.slice([0..rows, 1..num_classes])
}

fn check_mask<B: Backend, const D: usize>(
    mask: &Tensor<B, D>,
    shape: [usize; D],
) -> LossResult<()> {
    let dims = mask.dims();
    let mut expected = shape;
    expected[1] = 1;
    if dims != expected {
        return Err(LossError::ShapeMismatch {
            context: "loss mask",
            expected: expected.to_vec(),
            actual: dims.to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use burn::tensor::{TensorData, Tolerance, Transaction};

    use super::*;
    use crate::tests::TestBackend;

    fn sample() -> (Tensor<TestBackend, 3>, Tensor<TestBackend, 3, Int>) {
        let device = Default::default();
        // Two samples, two classes, three voxels
        let x = Tensor::<TestBackend, 3>::from_data(
            TensorData::from([
                [[0.9, 0.2, 0.6], [0.1, 0.8, 0.4]],
                [[0.3, 0.5, 1.0], [0.7, 0.5, 0.0]],
            ]),
            &device,
        );
        let y = Tensor::<TestBackend, 3, Int>::from_data(
            TensorData::from([[[0, 1, 1]], [[1, 1, 0]]]),
            &device,
        );
        (x, y)
    }

    #[test]
    fn reduction_axes_follow_batch_flag() {
        assert_eq!(reduction_axes::<5>(true), vec![0, 2, 3, 4]);
        assert_eq!(reduction_axes::<5>(false), vec![2, 3, 4]);
        assert_eq!(reduction_axes::<3>(false), vec![2]);
    }

    #[test]
    fn per_sample_counts_have_batch_rows() {
        let (x, y) = sample();

        let c = tp_fp_fn(x, y.into(), None, None, false).expect("valid input");

        assert_eq!(c.tp.dims(), [2, 2]);
        let [tp, fp, fn_] = Transaction::default()
            .register(c.tp)
            .register(c.fp)
            .register(c.fn_)
            .execute()
            .try_into()
            .expect("Correct amount of tensor data");

        // sample 0: class0 gt=[1,0,0], class1 gt=[0,1,1]
        // sample 1: class0 gt=[0,0,1], class1 gt=[1,1,0]
        tp.assert_approx_eq::<f32>(
            &TensorData::from([[0.9, 1.2], [1.0, 1.2]]),
            Tolerance::default(),
        );
        fp.assert_approx_eq::<f32>(
            &TensorData::from([[0.8, 0.1], [0.8, 0.0]]),
            Tolerance::default(),
        );
        fn_.assert_approx_eq::<f32>(
            &TensorData::from([[0.1, 0.8], [0.0, 0.8]]),
            Tolerance::default(),
        );
    }

    #[test]
    fn batch_axis_reduction_pools_rows() {
        let (x, y) = sample();
        let axes = reduction_axes::<3>(true);

        let c = tp_fp_fn(x, y.into(), Some(&axes), None, false).expect("valid input");

        assert_eq!(c.tp.dims(), [1, 2]);
        c.tp.into_data()
            .assert_approx_eq::<f32>(&TensorData::from([[1.9, 2.4]]), Tolerance::default());
    }

    #[test]
    fn mask_removes_excluded_voxels_from_all_counts() {
        let (x, y) = sample();
        let device = Default::default();
        let mask = Tensor::<TestBackend, 3>::from_data(
            TensorData::from([[[1.0, 0.0, 0.0]], [[0.0, 0.0, 0.0]]]),
            &device,
        );

        let c = tp_fp_fn(x, y.into(), None, Some(mask), false).expect("valid input");

        let [tp, fp, fn_] = Transaction::default()
            .register(c.tp)
            .register(c.fp)
            .register(c.fn_)
            .execute()
            .try_into()
            .expect("Correct amount of tensor data");
        tp.assert_approx_eq::<f32>(
            &TensorData::from([[0.9, 0.0], [0.0, 0.0]]),
            Tolerance::default(),
        );
        fp.assert_approx_eq::<f32>(
            &TensorData::from([[0.0, 0.1], [0.0, 0.0]]),
            Tolerance::default(),
        );
        fn_.assert_approx_eq::<f32>(
            &TensorData::from([[0.1, 0.0], [0.0, 0.0]]),
            Tolerance::default(),
        );
    }

    #[test]
    fn square_is_applied_pointwise_before_summation() {
        let (x, y) = sample();

        let c = tp_fp_fn(x, y.into(), None, None, true).expect("valid input");

        // sample 0 class 1: tp = 0.8^2 + 0.4^2
        c.tp.into_data().assert_approx_eq::<f32>(
            &TensorData::from([[0.81, 0.8], [1.0, 0.74]]),
            Tolerance::default(),
        );
    }

    #[test]
    fn square_is_applied_after_masking() {
        let (x, y) = sample();
        let device = Default::default();
        // Half weight on the last voxel of sample 0 ends up as a quarter once squared
        let mask = Tensor::<TestBackend, 3>::from_data(
            TensorData::from([[[1.0, 0.0, 0.5]], [[0.0, 1.0, 1.0]]]),
            &device,
        );

        let c = tp_fp_fn(x, y.into(), None, Some(mask), true).expect("valid input");

        let [tp, fp, fn_] = Transaction::default()
            .register(c.tp)
            .register(c.fp)
            .register(c.fn_)
            .execute()
            .try_into()
            .expect("Correct amount of tensor data");
        tp.assert_approx_eq::<f32>(
            &TensorData::from([[0.81, 0.04], [1.0, 0.25]]),
            Tolerance::default(),
        );
        fp.assert_approx_eq::<f32>(
            &TensorData::from([[0.09, 0.01], [0.25, 0.0]]),
            Tolerance::default(),
        );
        fn_.assert_approx_eq::<f32>(
            &TensorData::from([[0.01, 0.09], [0.0, 0.25]]),
            Tolerance::default(),
        );
    }

    #[test]
    fn class_axis_cannot_be_reduced() {
        let (x, y) = sample();

        let err = tp_fp_fn(x, y.into(), Some(&[1, 2]), None, false).unwrap_err();
        assert!(matches!(err, LossError::ShapeMismatch { .. }));
    }

    #[test]
    fn mask_with_class_channels_is_rejected() {
        let (x, y) = sample();
        let device = Default::default();
        let mask = Tensor::<TestBackend, 3>::ones([2, 2, 3], &device);

        let err = tp_fp_fn(x, y.into(), None, Some(mask), false).unwrap_err();
        assert!(matches!(err, LossError::ShapeMismatch { context: "loss mask", .. }));
    }

    #[test]
    fn drop_background_removes_first_column() {
        let device = Default::default();
        let scores =
            Tensor::<TestBackend, 2>::from_data(TensorData::from([[1.0, 2.0, 3.0]]), &device);

        let kept = drop_background(scores.clone(), true);
        let dropped = drop_background(scores, false);

        assert_eq!(kept.dims(), [1, 3]);
        dropped
            .into_data()
            .assert_approx_eq::<f32>(&TensorData::from([[2.0, 3.0]]), Tolerance::default());
    }

    #[test]
    fn class_last_moves_axis_one_to_the_end() {
        let device = Default::default();
        let t = Tensor::<TestBackend, 4>::zeros([2, 3, 4, 5], &device);
        assert_eq!(class_last(t).dims(), [2, 4, 5, 3]);
    }
}
