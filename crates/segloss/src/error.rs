//! Error types for loss construction and evaluation.

use thiserror::Error;

/// Errors that can occur while configuring or evaluating a loss.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LossError {
    /// An aggregation mode other than the supported ones was requested.
    #[error("unsupported aggregation mode '{mode}': only \"sum\" is implemented")]
    UnsupportedAggregation {
        /// The requested mode.
        mode: String,
    },

    /// An enumerated flag holds a value outside its defined set.
    #[error("unsupported value {value} for '{flag}' (expected one of {allowed})")]
    UnsupportedFlag {
        /// Name of the flag.
        flag: &'static str,
        /// The rejected value.
        value: u8,
        /// Human readable list of accepted values.
        allowed: &'static str,
    },

    /// Two tensors that must agree on their extents do not.
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// What was being validated.
        context: &'static str,
        /// The shape required by the prediction.
        expected: Vec<usize>,
        /// The shape that was supplied.
        actual: Vec<usize>,
    },

    /// A tensor has a rank that cannot be reconciled with the prediction.
    #[error("rank mismatch: expected rank {expected}, got rank {actual}")]
    RankMismatch {
        /// Required rank.
        expected: usize,
        /// Supplied rank.
        actual: usize,
    },

    /// A label map holds a class index outside `[0, num_classes)`.
    #[error("label {label} is out of range for {num_classes} classes")]
    LabelOutOfRange {
        /// Offending label value.
        label: i64,
        /// Number of classes on the prediction's class axis.
        num_classes: usize,
    },
}

/// A specialized `Result` type for loss operations.
pub type LossResult<T> = Result<T, LossError>;
