//! Loss functions for semantic segmentation training using the Burn framework.
//!
//! Every loss takes a prediction of shape `[batch_size, num_classes, ...spatial]`
//! (one to three spatial axes) and a ground truth that is either a label map or
//! a one-hot tensor, reconciled through [`to_one_hot`].
//!
//! ## Region-overlap losses
//!
//! Built on the shared soft confusion counts from [`tp_fp_fn`]:
//! - **[`SoftDiceLoss`]**: `1 - mean(dice)`
//! - **[`IoULoss`]**: negated soft Jaccard index
//! - **[`TverskyLoss`]** and **[`FocalTverskyLoss`]**: asymmetric fp/fn weighting
//! - **[`AsymLoss`]**: Tversky weights derived from a single `beta`
//! - **[`SSLoss`]**: sensitivity-specificity blend
//! - **[`GDiceLoss`]**, **[`GDiceLossV2`]** and **[`PenaltyGDiceLoss`]**:
//!   class-frequency weighted Dice
//!
//! ## Pixel classification losses
//! - **[`CrossentropyNdLoss`]**: cross-entropy over any number of spatial axes
//! - **[`TopKLoss`]**: mean of the hardest `k` percent voxel losses
//! - **[`WeightedCrossEntropyLoss`]**: class-weighted cross-entropy
//! - **[`DisPenalizedCeLoss`]**: binary cross-entropy penalized by a distance map
//!
//! ## Composite losses
//! - **[`DcAndCeLoss`]**, **[`DcAndTopKLoss`]** and **[`ExpLogLoss`]**
//!
//! ## Variational threshold loss
//! - **[`KldLoss`]**: KL divergence between a posterior and a prior over a
//!   scalar decision threshold, plus a reparameterized threshold sample
//!
//! ## Usage Example
//!
//! ```rust
//! use segloss::{DcAndCeLossConfig, SoftDiceLossConfig};
//! use burn::prelude::*;
//!
//! fn create_losses<B: Backend>(device: &B::Device) -> segloss::LossResult<()> {
//!     let dice = SoftDiceLossConfig::new().with_do_bg(false).init();
//!     let dc_ce = DcAndCeLossConfig::new().init::<B>(device)?;
//!     let _ = (dice, dc_ce);
//!     Ok(())
//! }
//! ```

pub mod confusion;
pub mod error;
pub mod nonlinearity;
pub mod one_hot;
pub mod region;

mod asymmetric;
mod compound;
mod cross_entropy;
mod dice;
mod distance_penalized;
mod generalized_dice;
mod iou;
mod kld;
mod sensitivity_specificity;
mod topk;
mod tversky;

pub use asymmetric::{AsymLoss, AsymLossConfig};
pub use compound::{
    Aggregation, DcAndCeLoss, DcAndCeLossConfig, DcAndTopKLoss, DcAndTopKLossConfig, ExpLogLoss,
    ExpLogLossConfig,
};
pub use confusion::{tp_fp_fn, Confusion};
pub use cross_entropy::{
    nll_loss, CrossentropyNdLoss, CrossentropyNdLossConfig, WeightedCrossEntropyLoss,
    WeightedCrossEntropyLossConfig,
};
pub use dice::{SoftDiceLoss, SoftDiceLossConfig};
pub use distance_penalized::{DisPenalizedCeLoss, DisPenalizedCeLossConfig};
pub use error::{LossError, LossResult};
pub use generalized_dice::{
    GDiceLoss, GDiceLossConfig, GDiceLossV2, GDiceLossV2Config, PenaltyGDiceLoss,
    PenaltyGDiceLossConfig,
};
pub use iou::{IoULoss, IoULossConfig};
pub use kld::{KldLoss, KldLossConfig, KldOutput, PosteriorMean, PosteriorStd, PriorMean, PriorStd};
pub use nonlinearity::{softmax_helper, Nonlinearity};
pub use one_hot::{to_labels, to_one_hot, GroundTruth};
pub use region::RegionOptions;
pub use sensitivity_specificity::{SSLoss, SSLossConfig};
pub use topk::{TopKLoss, TopKLossConfig};
pub use tversky::{FocalTverskyLoss, FocalTverskyLossConfig, TverskyLoss, TverskyLossConfig};
