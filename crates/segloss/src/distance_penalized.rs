//! Distance-penalized cross-entropy for binary segmentation.
//!
//! A per-voxel penalty is derived from the Euclidean distance transform of the
//! foreground and of the background of every sample. Inside each region the
//! penalty is the region's largest distance minus the voxel's own distance,
//! normalized by the largest such value, so voxels next to the boundary get
//! `1` and the deepest voxels get `0`. An offset (default `1`) is added on top.
//!
//! [`DisPenalizedCeLoss::forward`] returns the mean of the *unweighted*
//! per-voxel negative log-likelihood; the penalized map is available from
//! [`DisPenalizedCeLoss::forward_weighted`].
//!
//! Reference: Caliva et al., <https://arxiv.org/abs/1908.03679>.

use burn::module::{Content, DisplaySettings, ModuleDisplay};
use burn::prelude::*;
use burn::tensor::activation::log_softmax;
use segloss_util::euclidean_distance_transform_batch;

use crate::{
    cross_entropy::{flatten_logits, nll_no_reduction},
    error::{LossError, LossResult},
    one_hot::{to_labels, GroundTruth},
};

/// Configuration for creating a [distance-penalized cross-entropy](DisPenalizedCeLoss).
#[derive(Config, Debug)]
pub struct DisPenalizedCeLossConfig {
    /// Constant added to the normalized distance penalty. Default: 1.0
    #[config(default = 1.0)]
    pub offset: f64,
}

impl DisPenalizedCeLossConfig {
    /// Initialize [distance-penalized cross-entropy](DisPenalizedCeLoss).
    pub fn init(&self) -> DisPenalizedCeLoss {
        DisPenalizedCeLoss {
            offset: self.offset,
        }
    }
}

/// Distance-penalized cross-entropy.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct DisPenalizedCeLoss {
    /// Constant added to the normalized distance penalty.
    pub offset: f64,
}

impl Default for DisPenalizedCeLoss {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-voxel results of one evaluation.
struct Evaluation<B: Backend> {
    nll: Tensor<B, 1>,
    penalty: Tensor<B, 1>,
}

impl ModuleDisplay for DisPenalizedCeLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content.add("offset", &self.offset).optional()
    }
}

impl DisPenalizedCeLoss {
    /// Create a new loss with offset `1`.
    pub fn new() -> Self {
        DisPenalizedCeLossConfig::new().init()
    }

    /// Mean unweighted negative log-likelihood over all voxels.
    ///
    /// The distance penalty is still computed and validated, but it does not
    /// enter the returned value.
    ///
    /// # Shapes
    ///
    /// - x: raw logits `[batch_size, 2, ...spatial]`
    /// - y: binary label map `[batch_size, 1, ...spatial]` or one-hot like `x`
    /// - output: `[1]`
    pub fn forward<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let evaluation = self.evaluate(x, y.into())?;
        Ok(evaluation.nll.mean())
    }

    /// Per-voxel negative log-likelihood multiplied by the distance penalty,
    /// `[voxel_count]`.
    pub fn forward_weighted<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: impl Into<GroundTruth<B, D>>,
    ) -> LossResult<Tensor<B, 1>> {
        let evaluation = self.evaluate(x, y.into())?;
        Ok(evaluation.nll * evaluation.penalty)
    }

    /// Distance penalty of every voxel, including the offset.
    ///
    /// # Shapes
    ///
    /// - positive: foreground mask `[batch_size, ...spatial]`
    /// - output: `[batch_size, ...spatial]`
    pub fn penalty_map<B: Backend, const D: usize>(
        &self,
        positive: Tensor<B, D, Bool>,
    ) -> Tensor<B, D> {
        let device = positive.device();
        let dims = positive.dims();
        let sample_len: usize = dims[1..].iter().product();

        let pos_edt = euclidean_distance_transform_batch(positive.clone());
        let neg_edt = euclidean_distance_transform_batch(positive.clone().bool_not());

        let inside = bool_values(positive);
        let pos_edt = float_values(pos_edt);
        let neg_edt = float_values(neg_edt);

        let mut penalty = vec![self.offset as f32; inside.len()];
        if sample_len > 0 {
            for (sample, out) in penalty.chunks_mut(sample_len).enumerate() {
                let range = sample * sample_len..(sample + 1) * sample_len;
                let inside = &inside[range.clone()];
                let pos = &pos_edt[range.clone()];
                let neg = &neg_edt[range];
                add_region_term(out, pos, |i| inside[i], sample, "foreground");
                add_region_term(out, neg, |i| !inside[i], sample, "background");
            }
        }

        Tensor::from_data(TensorData::new(penalty, dims.to_vec()), &device)
    }

    fn evaluate<B: Backend, const D: usize>(
        &self,
        x: Tensor<B, D>,
        y: GroundTruth<B, D>,
    ) -> LossResult<Evaluation<B>> {
        let shape = x.dims();
        if shape[1] != 2 {
            let mut expected = shape.to_vec();
            expected[1] = 2;
            return Err(LossError::ShapeMismatch {
                context: "binary prediction",
                expected,
                actual: shape.to_vec(),
            });
        }

        let targets = to_labels(shape, y)?;
        let mut mask_shape = shape;
        mask_shape[1] = 1;
        let positive = targets.clone().reshape(mask_shape).greater_elem(0);
        let penalty = self.penalty_map(positive).detach().flatten::<1>(0, D - 1);

        let nll = nll_no_reduction(log_softmax(flatten_logits(x), 1), targets);
        Ok(Evaluation { nll, penalty })
    }
}

/// Add `(max - edt) / max'` over the voxels of one region of one sample, where
/// `max` is the largest distance in the region and `max'` the largest shifted
/// value. Degenerate regions contribute nothing.
fn add_region_term(
    out: &mut [f32],
    edt: &[f32],
    inside: impl Fn(usize) -> bool,
    sample: usize,
    region: &'static str,
) {
    let max = (0..edt.len())
        .filter(|&i| inside(i))
        .map(|i| edt[i])
        .reduce(f32::max);

    let Some(max) = max else {
        tracing::warn!(sample, region, "empty region, skipping distance penalty");
        return;
    };
    if !max.is_finite() {
        tracing::warn!(sample, region, "region has no opposite voxel, skipping distance penalty");
        return;
    }

    let shifted_max = (0..edt.len())
        .filter(|&i| inside(i))
        .map(|i| max - edt[i])
        .fold(0.0_f32, f32::max);
    if shifted_max <= 0.0 {
        tracing::warn!(sample, region, "flat distance profile, skipping distance penalty");
        return;
    }

    for (i, value) in out.iter_mut().enumerate() {
        if inside(i) {
            *value += (max - edt[i]) / shifted_max;
        }
    }
}

fn bool_values<B: Backend, const D: usize>(tensor: Tensor<B, D, Bool>) -> Vec<bool> {
    tensor
        .int()
        .into_data()
        .iter::<i64>()
        .map(|value| value != 0)
        .collect()
}

fn float_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().iter::<f32>().collect()
}
