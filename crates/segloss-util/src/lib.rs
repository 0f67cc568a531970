//! Host-side helpers shared by the segloss losses.
//!
//! Burn has no distance transform, so the exact Euclidean distance transform
//! needed by boundary-aware losses lives here. It runs on host memory: tensors
//! are read back with `into_data`, transformed, and uploaded to the original
//! device.

pub mod distance;

pub use distance::{
    euclidean_distance_transform, euclidean_distance_transform_batch,
    squared_distance_transform,
};
