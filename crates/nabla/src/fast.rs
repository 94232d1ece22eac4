//! Common transformer building blocks composed from differentiable ops.

use crate::array::Array;
use crate::device::StreamOrDevice;
use crate::dtype::DType;
use crate::error::{Exception, Result};
use crate::ops;

fn constant(like: &Array, value: f64) -> Array {
    ops::scalar_like(like, value)
}

fn last_dim(x: &Array, what: &str) -> Result<usize> {
    x.shape()
        .last()
        .copied()
        .ok_or_else(|| Exception::invalid(format!("{what} requires at least one dimension")))
}

fn check_feature_param(param: &Array, features: usize, what: &str) -> Result<()> {
    if param.shape() != [features] {
        return Err(Exception::shape(format!(
            "{what} must have shape [{features}], got {:?}",
            param.shape()
        )));
    }
    Ok(())
}

/// `x / sqrt(mean(x^2) + eps) * weight` over the last axis.
pub fn rms_norm(x: &Array, weight: &Array, eps: f32) -> Result<Array> {
    let features = last_dim(x, "rms_norm")?;
    check_feature_param(weight, features, "rms_norm weight")?;
    let mean_square = ops::mean(&ops::square(x)?, &[-1], true)?;
    let inv = ops::rsqrt(&ops::add(&mean_square, &constant(x, f64::from(eps)))?)?;
    ops::multiply(&ops::multiply(x, &inv)?, weight)
}

/// Normalizes the last axis to zero mean and unit variance, then applies the
/// optional affine `weight` and `bias`.
pub fn layer_norm(x: &Array, weight: Option<&Array>, bias: Option<&Array>, eps: f32) -> Result<Array> {
    let features = last_dim(x, "layer_norm")?;
    let mean = ops::mean(x, &[-1], true)?;
    let centered = ops::subtract(x, &mean)?;
    let variance = ops::mean(&ops::square(&centered)?, &[-1], true)?;
    let inv = ops::rsqrt(&ops::add(&variance, &constant(x, f64::from(eps)))?)?;
    let mut out = ops::multiply(&centered, &inv)?;
    if let Some(weight) = weight {
        check_feature_param(weight, features, "layer_norm weight")?;
        out = ops::multiply(&out, weight)?;
    }
    if let Some(bias) = bias {
        check_feature_param(bias, features, "layer_norm bias")?;
        out = ops::add(&out, bias)?;
    }
    Ok(out)
}

/// Rotary position embedding over the first `dims` features of `x`, which
/// has shape `[..., sequence, features]`.
///
/// Position `i` is `(offset + i) * scale`; feature pair `j` rotates with
/// frequency `base^(-2j / dims)`. Traditional mode pairs adjacent features,
/// otherwise the first half pairs with the second.
pub fn rope(
    x: &Array,
    dims: usize,
    traditional: bool,
    base: f32,
    scale: f32,
    offset: i32,
) -> Result<Array> {
    if x.ndim() < 2 {
        return Err(Exception::invalid("rope requires an input of rank 2 or more"));
    }
    let features = last_dim(x, "rope")?;
    if dims == 0 || dims % 2 != 0 || dims > features {
        return Err(Exception::invalid(format!(
            "rope dims must be even and at most {features}, got {dims}"
        )));
    }
    let ndim = x.ndim();
    let seq = x.dim(ndim - 2);
    let half = dims / 2;
    let s: StreamOrDevice = x.stream().into();

    let positions = ops::arange(
        f64::from(offset),
        f64::from(offset) + seq as f64,
        1.0,
        DType::Float32,
        &s,
    )?;
    let positions = ops::multiply(&positions, &ops::full(&[], f64::from(scale), DType::Float32, &s))?;
    let exponent = ops::arange(0.0, half as f64, 1.0, DType::Float32, &s)?;
    let log_base = ops::full(&[], -f64::from(base).ln() / half as f64, DType::Float32, &s);
    let inv_freq = ops::exp(&ops::multiply(&exponent, &log_base)?)?;
    let theta = ops::multiply(
        &ops::reshape(&positions, &[seq, 1])?,
        &ops::reshape(&inv_freq, &[1, half])?,
    )?;
    let cos = ops::astype(&ops::cos(&theta)?, x.dtype())?;
    let sin = ops::astype(&ops::sin(&theta)?, x.dtype())?;

    let rotated_part = ops::slice_axis(x, -1, 0, dims)?;
    let (x1, x2, pairs_shape) = if traditional {
        let mut paired = x.shape()[..ndim - 1].to_vec();
        paired.extend([half, 2]);
        let paired_x = ops::reshape(&rotated_part, &paired)?;
        (
            ops::index_axis(&paired_x, -1, 0)?,
            ops::index_axis(&paired_x, -1, 1)?,
            Some(paired),
        )
    } else {
        (
            ops::slice_axis(&rotated_part, -1, 0, half)?,
            ops::slice_axis(&rotated_part, -1, half, dims)?,
            None,
        )
    };
    let out1 = ops::subtract(&ops::multiply(&x1, &cos)?, &ops::multiply(&x2, &sin)?)?;
    let out2 = ops::add(&ops::multiply(&x1, &sin)?, &ops::multiply(&x2, &cos)?)?;
    let rotated = match pairs_shape {
        Some(paired) => {
            let stacked = ops::stack(&[out1, out2], -1)?;
            let mut flat = paired[..paired.len() - 2].to_vec();
            flat.push(dims);
            ops::reshape(&stacked, &flat)?
        }
        None => ops::concatenate(&[out1, out2], -1)?,
    };
    if dims == features {
        return Ok(rotated);
    }
    let rest = ops::slice_axis(x, -1, dims, features)?;
    ops::concatenate(&[rotated, rest], -1)
}

/// `softmax(q k^T * scale + mask) v` over `[batch, heads, sequence, dim]` inputs.
///
/// `k` and `v` may carry fewer heads than `q` as long as they divide it; each
/// key/value head then serves a contiguous group of query heads. A boolean
/// mask keeps positions where it is true, any other mask is added to the
/// scores.
pub fn scaled_dot_product_attention(
    q: &Array,
    k: &Array,
    v: &Array,
    scale: f32,
    mask: Option<&Array>,
) -> Result<Array> {
    for (name, a) in [("queries", q), ("keys", k), ("values", v)] {
        if a.ndim() != 4 {
            return Err(Exception::invalid(format!(
                "attention {name} must have rank 4, got shape {:?}",
                a.shape()
            )));
        }
    }
    let (batch, q_heads, q_len) = (q.dim(0), q.dim(1), q.dim(2));
    let kv_heads = k.dim(1);
    if kv_heads == 0 || q_heads % kv_heads != 0 || v.dim(1) != kv_heads {
        return Err(Exception::shape(format!(
            "cannot group {q_heads} query heads over {kv_heads} key/value heads"
        )));
    }
    let repeats = q_heads / kv_heads;
    let k_len = k.dim(2);

    let q = ops::multiply(q, &constant(q, f64::from(scale)))?;
    let (q, k, v) = if repeats > 1 {
        (
            ops::reshape(&q, &[batch, kv_heads, repeats, q_len, q.dim(3)])?,
            ops::expand_dims(k, 2)?,
            ops::expand_dims(v, 2)?,
        )
    } else {
        (q, k.clone(), v.clone())
    };
    let mut scores = ops::matmul(&q, &ops::swapaxes(&k, -1, -2)?)?;
    if repeats > 1 {
        scores = ops::reshape(&scores, &[batch, q_heads, q_len, k_len])?;
    }
    if let Some(mask) = mask {
        scores = if mask.dtype().is_bool() {
            ops::where_(mask, &scores, &constant(&scores, f64::NEG_INFINITY))?
        } else {
            ops::add(&scores, &ops::astype(mask, scores.dtype())?)?
        };
    }
    let mut weights = ops::softmax(&scores, &[-1])?;
    if repeats > 1 {
        weights = ops::reshape(&weights, &[batch, kv_heads, repeats, q_len, k_len])?;
    }
    let out = ops::matmul(&weights, &v)?;
    if repeats > 1 {
        let value_dim = out.dim(out.ndim() - 1);
        return ops::reshape(&out, &[batch, q_heads, q_len, value_dim]);
    }
    Ok(out)
}
