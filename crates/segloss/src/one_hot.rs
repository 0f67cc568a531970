//! Ground-truth reconciliation.
//!
//! Every loss in this crate receives its target as a [`GroundTruth`]: either a
//! label map holding integer class indices or a dense tensor that may already be
//! one-hot encoded. [`to_one_hot`] turns both into a one-hot tensor with exactly
//! the prediction's shape, and [`to_labels`] flattens both into the per-voxel
//! class indices that cross-entropy style losses consume.

use burn::prelude::*;
use burn::tensor::cast::ToElement;

use crate::error::{LossError, LossResult};

/// Ground truth for a prediction of shape `[batch_size, num_classes, ...spatial]`.
#[derive(Debug, Clone)]
pub enum GroundTruth<B: Backend, const D: usize> {
    /// Integer class indices, shape `[batch_size, 1, ...spatial]`.
    Labels(Tensor<B, D, Int>),
    /// Dense target, either one-hot `[batch_size, num_classes, ...spatial]` or a
    /// single-channel label map stored as floats `[batch_size, 1, ...spatial]`.
    Dense(Tensor<B, D>),
}

impl<B: Backend, const D: usize> GroundTruth<B, D> {
    /// Wrap a label map without an explicit channel axis, shape `[batch_size, ...spatial]`.
    ///
    /// A singleton class axis is inserted at position 1. `K` must be exactly one
    /// less than the prediction rank `D`.
    pub fn label_map<const K: usize>(labels: Tensor<B, K, Int>) -> LossResult<Self> {
        if K + 1 != D {
            return Err(LossError::RankMismatch {
                expected: D - 1,
                actual: K,
            });
        }
        Ok(Self::Labels(labels.unsqueeze_dim::<D>(1)))
    }

    /// Wrap a dense label map without an explicit channel axis.
    ///
    /// Same contract as [`GroundTruth::label_map`] for float-typed label maps.
    pub fn dense_label_map<const K: usize>(labels: Tensor<B, K>) -> LossResult<Self> {
        if K + 1 != D {
            return Err(LossError::RankMismatch {
                expected: D - 1,
                actual: K,
            });
        }
        Ok(Self::Dense(labels.unsqueeze_dim::<D>(1)))
    }

    /// Shape of the wrapped tensor.
    pub fn dims(&self) -> [usize; D] {
        match self {
            Self::Labels(t) => t.dims(),
            Self::Dense(t) => t.dims(),
        }
    }
}

impl<B: Backend, const D: usize> From<Tensor<B, D, Int>> for GroundTruth<B, D> {
    fn from(labels: Tensor<B, D, Int>) -> Self {
        Self::Labels(labels)
    }
}

impl<B: Backend, const D: usize> From<Tensor<B, D>> for GroundTruth<B, D> {
    fn from(dense: Tensor<B, D>) -> Self {
        Self::Dense(dense)
    }
}

/// Reconcile `gt` into a one-hot tensor of shape `shape`.
///
/// A target whose shape already equals `shape` is taken as one-hot and returned
/// unchanged (as floats). Anything else must be a single-channel label map that
/// agrees with `shape` on every non-class axis; its indices are scattered into a
/// zero tensor allocated on `device`.
///
/// The result is detached from the autodiff graph.
pub fn to_one_hot<B: Backend, const D: usize>(
    shape: [usize; D],
    gt: GroundTruth<B, D>,
    device: &B::Device,
) -> LossResult<Tensor<B, D>> {
    let gt_dims = gt.dims();

    if gt_dims == shape {
        tracing::debug!(?shape, "ground truth already matches prediction, using as one-hot");
        let one_hot = match gt {
            GroundTruth::Labels(t) => t.float(),
            GroundTruth::Dense(t) => t,
        };
        return Ok(one_hot.detach());
    }

    let labels = match gt {
        GroundTruth::Labels(t) => t,
        GroundTruth::Dense(t) => t.int(),
    };
    let labels = check_label_map(labels, shape)?;

    let ones = Tensor::<B, D>::ones(labels.shape(), device);
    let one_hot = Tensor::<B, D>::zeros(shape, device).scatter(1, labels, ones);

    Ok(one_hot.detach())
}

/// Flatten `gt` into per-voxel class indices, shape `[batch_size * prod(spatial)]`.
///
/// The voxel order matches a prediction whose class axis has been moved last
/// and then flattened. One-hot targets are decoded with `argmax` over axis 1.
pub fn to_labels<B: Backend, const D: usize>(
    shape: [usize; D],
    gt: GroundTruth<B, D>,
) -> LossResult<Tensor<B, 1, Int>> {
    let gt_dims = gt.dims();
    let num_classes = shape[1];

    let labels = if gt_dims == shape && num_classes > 1 {
        match gt {
            GroundTruth::Labels(t) => t.float().argmax(1),
            GroundTruth::Dense(t) => t.argmax(1),
        }
    } else {
        let labels = match gt {
            GroundTruth::Labels(t) => t,
            GroundTruth::Dense(t) => t.int(),
        };
        check_label_map(labels, shape)?
    };

    Ok(labels.flatten::<1>(0, D - 1))
}

/// Validate a `[batch_size, 1, ...spatial]` label map against a prediction shape
/// and the class range.
fn check_label_map<B: Backend, const D: usize>(
    labels: Tensor<B, D, Int>,
    shape: [usize; D],
) -> LossResult<Tensor<B, D, Int>> {
    let dims = labels.dims();
    let mut expected = shape;
    expected[1] = 1;

    if dims != expected {
        return Err(LossError::ShapeMismatch {
            context: "label map",
            expected: expected.to_vec(),
            actual: dims.to_vec(),
        });
    }

    let num_classes = shape[1];
    let min = labels.clone().min().into_scalar().to_i64();
    let max = labels.clone().max().into_scalar().to_i64();
    if min < 0 {
        return Err(LossError::LabelOutOfRange {
            label: min,
            num_classes,
        });
    }
    if max >= num_classes as i64 {
        return Err(LossError::LabelOutOfRange {
            label: max,
            num_classes,
        });
    }

    Ok(labels)
}
