//! Euclidean distance transform.
//!
//! Exact N-dimensional transform built from the separable lower-envelope
//! algorithm of Felzenszwalb & Huttenlocher: one pass of the 1-D squared
//! transform per axis, then a square root. Matches
//! `scipy.ndimage.distance_transform_edt` with unit sampling: every foreground
//! (non-zero) element receives the distance to the nearest background element,
//! background elements receive `0`.
//!
//! When an input has no background element at all, every foreground element is
//! infinitely far from the background and the output is `f64::INFINITY`.

use burn::tensor::{backend::Backend, Bool, Tensor, TensorData};

/// Squared Euclidean distance transform of a row-major N-dimensional mask.
///
/// # Arguments
/// * `foreground` - Flattened mask, `true` for foreground elements
/// * `shape` - Extent of every axis; the product must equal `foreground.len()`
///
/// # Panics
/// If `shape` does not describe `foreground`.
pub fn squared_distance_transform(foreground: &[bool], shape: &[usize]) -> Vec<f64> {
    let volume: usize = shape.iter().product();
    assert_eq!(
        volume,
        foreground.len(),
        "Shape {shape:?} describes {volume} elements but the mask holds {}",
        foreground.len()
    );

    let mut field: Vec<f64> = foreground
        .iter()
        .map(|&fg| if fg { f64::INFINITY } else { 0.0 })
        .collect();

    let mut line = Vec::new();
    let mut transformed = Vec::new();

    for axis in 0..shape.len() {
        let len = shape[axis];
        if len == 0 {
            return field;
        }
        let stride: usize = shape[axis + 1..].iter().product();
        let outer: usize = shape[..axis].iter().product();

        line.resize(len, 0.0);
        transformed.resize(len, 0.0);

        for o in 0..outer {
            for i in 0..stride {
                let base = o * len * stride + i;
                for (j, value) in line.iter_mut().enumerate() {
                    *value = field[base + j * stride];
                }
                lower_envelope(&line, &mut transformed);
                for (j, value) in transformed.iter().enumerate() {
                    field[base + j * stride] = *value;
                }
            }
        }
    }

    field
}

/// Euclidean distance transform of a row-major N-dimensional mask.
///
/// See [`squared_distance_transform`] for the argument contract.
pub fn euclidean_distance_transform(foreground: &[bool], shape: &[usize]) -> Vec<f64> {
    let mut field = squared_distance_transform(foreground, shape);
    for value in &mut field {
        *value = value.sqrt();
    }
    field
}

/// Per-sample Euclidean distance transform of a batched boolean tensor.
///
/// Axis 0 is the batch axis; the remaining axes are transformed jointly for
/// every sample independently.
///
/// # Shapes
///
/// - mask: `[batch_size, ...spatial]`
/// - output: `[batch_size, ...spatial]`
pub fn euclidean_distance_transform_batch<B: Backend, const D: usize>(
    mask: Tensor<B, D, Bool>,
) -> Tensor<B, D> {
    let device = mask.device();
    let dims = mask.dims();
    let spatial = &dims[1..];
    let sample_len: usize = spatial.iter().product();

    let foreground: Vec<bool> = mask
        .int()
        .into_data()
        .iter::<i64>()
        .map(|value| value != 0)
        .collect();

    let mut distances = Vec::with_capacity(foreground.len());
    if sample_len > 0 {
        for sample in foreground.chunks(sample_len) {
            distances.extend(
                euclidean_distance_transform(sample, spatial)
                    .into_iter()
                    .map(|value| value as f32),
            );
        }
    }

    Tensor::from_data(TensorData::new(distances, dims.to_vec()), &device)
}

/// 1-D squared distance transform of a sampled function.
///
/// `f` holds `0` at background samples and `+inf` elsewhere on the first pass,
/// partial squared distances on later passes. Infinite samples contribute no
/// parabola; a line without any finite sample stays infinite.
fn lower_envelope(f: &[f64], out: &mut [f64]) {
    let mut vertices: Vec<usize> = Vec::with_capacity(f.len());
    let mut bounds: Vec<f64> = Vec::with_capacity(f.len());

    for q in 0..f.len() {
        if !f[q].is_finite() {
            continue;
        }
        let fq = f[q] + (q * q) as f64;
        let mut s = f64::NEG_INFINITY;
        while let Some(&p) = vertices.last() {
            s = (fq - (f[p] + (p * p) as f64)) / (2.0 * (q - p) as f64);
            if s <= bounds[bounds.len() - 1] {
                vertices.pop();
                bounds.pop();
            } else {
                break;
            }
        }
        if vertices.is_empty() {
            s = f64::NEG_INFINITY;
        }
        vertices.push(q);
        bounds.push(s);
    }

    if vertices.is_empty() {
        out.fill(f64::INFINITY);
        return;
    }

    let mut k = 0;
    for (q, value) in out.iter_mut().enumerate() {
        while k + 1 < vertices.len() && bounds[k + 1] < q as f64 {
            k += 1;
        }
        let p = vertices[k];
        let dq = q as f64 - p as f64;
        *value = dq.mul_add(dq, f[p]);
    }
}
