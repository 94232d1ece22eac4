//! Counter-based pseudo-random generation.
//!
//! Every sampler takes an optional key. Keys are `uint32[2]` arrays; the bits
//! they produce come from threefry-2x32 and depend only on the key, so the
//! same key always yields the same samples. Without a key, samplers draw one
//! from a process-wide sequence that [`seed`] resets.

use std::sync::{Mutex, PoisonError};

use once_cell::sync::Lazy;

use crate::array::{Array, ArrayElement};
use crate::backend::{ArraySpec, Primitive};
use crate::device::StreamOrDevice;
use crate::dtype::DType;
use crate::error::{Exception, Result};
use crate::ops;
use crate::shape::{broadcast_shapes, normalize_axis};

/// A stream of keys rooted at one seed. Two sequences built from the same
/// seed hand out the same keys in the same order.
pub struct KeySequence {
    key: Array,
}

impl KeySequence {
    pub fn new(seed: u64) -> Self {
        KeySequence { key: key(seed) }
    }

    /// Splits the current key, keeps the first half and hands out the second.
    pub fn next(&mut self) -> Result<Array> {
        let (kept, handed_out) = split(&self.key, &StreamOrDevice::Default)?;
        self.key = Array::from_literal(kept.literal()?);
        Ok(handed_out)
    }
}

static KEY_SEQUENCE: Lazy<Mutex<KeySequence>> =
    Lazy::new(|| Mutex::new(KeySequence::new(rand::random())));

/// A key determined entirely by `seed`.
pub fn key(seed: u64) -> Array {
    let words = vec![(seed >> 32) as u32, seed as u32];
    let literal = crate::backend::ArrayLiteral {
        spec: ArraySpec::new(DType::Uint32, vec![2]),
        data: u32::into_data(words),
    };
    Array::from_literal(literal)
}

/// Restarts the global key sequence from `seed`.
pub fn seed(seed: u64) {
    log::debug!("reseeding global key sequence");
    *KEY_SEQUENCE.lock().unwrap_or_else(PoisonError::into_inner) = KeySequence::new(seed);
}

fn check_key(key: &Array) -> Result<()> {
    if key.dtype() != DType::Uint32 || key.shape() != [2] {
        return Err(Exception::invalid(format!(
            "a key must be a uint32 array of shape [2], got {} {:?}",
            key.dtype(),
            key.shape()
        )));
    }
    Ok(())
}

fn resolve_key(key: Option<&Array>) -> Result<Array> {
    match key {
        Some(key) => {
            check_key(key)?;
            Ok(key.clone())
        }
        None => KEY_SEQUENCE
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next(),
    }
}

fn require_float(dtype: DType, what: &str) -> Result<()> {
    if !dtype.is_float() {
        return Err(Exception::invalid(format!(
            "{what} requires a floating point dtype, got {dtype}"
        )));
    }
    Ok(())
}

/// `shape` if it already contains the broadcast of itself with `other`.
fn check_shape(shape: &[usize], other: &[usize], what: &str) -> Result<Vec<usize>> {
    match broadcast_shapes(shape, other) {
        Ok(joined) if joined == shape => Ok(joined),
        _ => Err(Exception::invalid(format!(
            "{what} shape {shape:?} is not compatible with parameters of shape {other:?}"
        ))),
    }
}

/// Raw random bits: `width` bytes per element, as `uint8`, `uint16` or `uint32`.
pub fn bits(shape: &[usize], width: usize, key: Option<&Array>, s: &StreamOrDevice) -> Result<Array> {
    let dtype = match width {
        1 => DType::Uint8,
        2 => DType::Uint16,
        4 => DType::Uint32,
        _ => {
            return Err(Exception::invalid(format!(
                "bit width must be 1, 2 or 4 bytes, got {width}"
            )))
        }
    };
    let key = resolve_key(key)?;
    Ok(Array::from_primitive(
        Primitive::RandomBits { width },
        ArraySpec::new(dtype, shape.to_vec()),
        s.resolve(),
        vec![key],
    ))
}

/// `n` new keys stacked as a `[n, 2]` array.
pub fn split_n(key: &Array, n: usize, s: &StreamOrDevice) -> Result<Array> {
    check_key(key)?;
    bits(&[n, 2], 4, Some(key), s)
}

pub fn split(key: &Array, s: &StreamOrDevice) -> Result<(Array, Array)> {
    let keys = split_n(key, 2, s)?;
    Ok((ops::index_axis(&keys, 0, 0)?, ops::index_axis(&keys, 0, 1)?))
}

/// Samples uniformly from `[low, high)`.
///
/// Without `shape` the result takes the broadcast shape of the bounds. An
/// explicit `shape` must already contain that broadcast shape.
pub fn uniform(
    low: &Array,
    high: &Array,
    shape: Option<&[usize]>,
    dtype: DType,
    key: Option<&Array>,
    s: &StreamOrDevice,
) -> Result<Array> {
    require_float(dtype, "uniform")?;
    let low = ops::astype(low, dtype)?;
    let high = ops::astype(high, dtype)?;
    let range = ops::subtract(&high, &low)?;
    let shape = match shape {
        Some(shape) => check_shape(shape, range.shape(), "uniform")?,
        None => range.shape().to_vec(),
    };

    let raw = bits(&shape, 4, key, s)?;
    let scale = ops::full(&[], 2f64.powi(-32), DType::Float32, s);
    let unit = ops::astype(&ops::multiply(&ops::astype(&raw, DType::Float32)?, &scale)?, dtype)?;
    let ceiling = dtype
        .one_minus_ulp()
        .ok_or_else(|| Exception::invalid(format!("uniform does not support {dtype}")))?;
    let unit = ops::minimum(&unit, &ops::full(&[], ceiling, dtype, s))?;
    ops::add(&low, &ops::multiply(&range, &unit)?)
}

/// [`uniform`] over scalar bounds of any element type.
pub fn uniform_scalars<T: ArrayElement>(
    low: T,
    high: T,
    shape: &[usize],
    dtype: DType,
    key: Option<&Array>,
    s: &StreamOrDevice,
) -> Result<Array> {
    uniform(&Array::scalar(low), &Array::scalar(high), Some(shape), dtype, key, s)
}

/// Standard normal samples scaled by `scale` and shifted by `loc`.
pub fn normal(
    shape: &[usize],
    dtype: DType,
    loc: f32,
    scale: f32,
    key: Option<&Array>,
    s: &StreamOrDevice,
) -> Result<Array> {
    require_float(dtype, "normal")?;
    let low = ops::full(&[], -1.0 + 2f64.powi(-24), DType::Float32, s);
    let high = ops::full(&[], 1.0, DType::Float32, s);
    let u = uniform(&low, &high, Some(shape), DType::Float32, key, s)?;
    let sqrt2 = ops::full(&[], std::f64::consts::SQRT_2, DType::Float32, s);
    let mut out = ops::multiply(&ops::erfinv(&u)?, &sqrt2)?;
    if scale != 1.0 {
        out = ops::multiply(&out, &ops::full(&[], f64::from(scale), DType::Float32, s))?;
    }
    if loc != 0.0 {
        out = ops::add(&out, &ops::full(&[], f64::from(loc), DType::Float32, s))?;
    }
    ops::astype(&out, dtype)
}

/// Integers drawn uniformly from `[low, high)`.
pub fn randint(
    low: &Array,
    high: &Array,
    shape: Option<&[usize]>,
    dtype: DType,
    key: Option<&Array>,
    s: &StreamOrDevice,
) -> Result<Array> {
    if dtype.is_inexact() {
        return Err(Exception::invalid(format!(
            "randint requires an integer dtype, got {dtype}"
        )));
    }
    let u = uniform(low, high, shape, DType::Float32, key, s)?;
    ops::astype(&ops::floor(&u)?, dtype)
}

pub fn randint_scalars<T: ArrayElement>(
    low: T,
    high: T,
    shape: &[usize],
    dtype: DType,
    key: Option<&Array>,
    s: &StreamOrDevice,
) -> Result<Array> {
    randint(&Array::scalar(low), &Array::scalar(high), Some(shape), dtype, key, s)
}

/// Booleans that are `true` with probability `p`.
pub fn bernoulli(
    p: &Array,
    shape: Option<&[usize]>,
    key: Option<&Array>,
    s: &StreamOrDevice,
) -> Result<Array> {
    if !p.dtype().is_float() {
        return Err(Exception::invalid(format!(
            "bernoulli requires a floating point probability, got {}",
            p.dtype()
        )));
    }
    let shape = match shape {
        Some(shape) => check_shape(shape, p.shape(), "bernoulli")?,
        None => p.shape().to_vec(),
    };
    let zero = ops::full(&[], 0.0, p.dtype(), s);
    let one = ops::full(&[], 1.0, p.dtype(), s);
    let u = uniform(&zero, &one, Some(&shape), p.dtype(), key, s)?;
    ops::less(&u, p)
}

/// [`bernoulli`] with a scalar probability of any element type, read as `float32`.
pub fn bernoulli_scalar<T: ArrayElement>(
    p: T,
    shape: Option<&[usize]>,
    key: Option<&Array>,
    s: &StreamOrDevice,
) -> Result<Array> {
    let p = ops::astype(&Array::scalar(p), DType::Float32)?;
    bernoulli(&p, shape, key, s)
}

/// Normal samples restricted to `[lower, upper]`.
pub fn truncated_normal(
    lower: &Array,
    upper: &Array,
    shape: Option<&[usize]>,
    dtype: DType,
    key: Option<&Array>,
    s: &StreamOrDevice,
) -> Result<Array> {
    require_float(dtype, "truncated_normal")?;
    let lower = ops::astype(lower, dtype)?;
    let upper = ops::astype(upper, dtype)?;
    let bounds = broadcast_shapes(lower.shape(), upper.shape())?;
    let shape = match shape {
        Some(shape) => check_shape(shape, &bounds, "truncated_normal")?,
        None => bounds,
    };
    let sqrt2 = ops::full(&[], std::f64::consts::SQRT_2, dtype, s);
    let a = ops::erf(&ops::divide(&lower, &sqrt2)?)?;
    let b = ops::erf(&ops::divide(&upper, &sqrt2)?)?;
    let u = uniform(&a, &b, Some(&shape), dtype, key, s)?;
    let out = ops::multiply(&ops::erfinv(&u)?, &sqrt2)?;
    ops::clip(&out, &lower, &upper)
}

/// Samples from the standard Gumbel distribution.
pub fn gumbel(shape: &[usize], dtype: DType, key: Option<&Array>, s: &StreamOrDevice) -> Result<Array> {
    require_float(dtype, "gumbel")?;
    let low = ops::full(&[], f64::from(f32::MIN_POSITIVE), dtype, s);
    let high = ops::full(&[], 1.0, dtype, s);
    let u = uniform(&low, &high, Some(shape), dtype, key, s)?;
    ops::negative(&ops::log(&ops::negative(&ops::log(&u)?)?)?)
}

fn logits_axis(logits: &Array, axis: i32) -> Result<usize> {
    require_float(logits.dtype(), "categorical")?;
    normalize_axis(axis, logits.ndim())
}

/// Category indices sampled from unnormalized log probabilities along `axis`.
pub fn categorical(logits: &Array, axis: i32, key: Option<&Array>, s: &StreamOrDevice) -> Result<Array> {
    let axis = logits_axis(logits, axis)?;
    let noise = gumbel(logits.shape(), logits.dtype(), key, s)?;
    ops::argmax(&ops::add(&noise, logits)?, axis as i32, false)
}

/// [`categorical`] producing samples of `shape`, which must broadcast with
/// the logits once their category axis is removed. Extra leading axes of
/// `shape` are batch axes, so the category axis is placed counting from the end.
pub fn categorical_with_shape(
    logits: &Array,
    axis: i32,
    shape: &[usize],
    key: Option<&Array>,
    s: &StreamOrDevice,
) -> Result<Array> {
    let axis = logits_axis(logits, axis)?;
    let trailing = logits.ndim() - 1 - axis;
    let position = shape.len().checked_sub(trailing).ok_or_else(|| {
        Exception::invalid(format!(
            "sample shape {shape:?} has fewer axes than the logits around axis {axis}"
        ))
    })?;
    let mut full_shape = shape.to_vec();
    full_shape.insert(position, logits.dim(axis));
    let full_shape = check_shape(&full_shape, logits.shape(), "categorical")?;
    let noise = gumbel(&full_shape, logits.dtype(), key, s)?;
    ops::argmax(&ops::add(&noise, logits)?, position as i32, false)
}

/// [`categorical`] drawing `num_samples` per distribution; the samples take
/// the place of the category axis.
pub fn categorical_num_samples(
    logits: &Array,
    axis: i32,
    num_samples: usize,
    key: Option<&Array>,
    s: &StreamOrDevice,
) -> Result<Array> {
    let axis = logits_axis(logits, axis)?;
    let mut noise_shape = logits.shape().to_vec();
    noise_shape.insert(axis + 1, num_samples);
    let noise = gumbel(&noise_shape, logits.dtype(), key, s)?;
    let expanded = ops::expand_dims(logits, axis as i32 + 1)?;
    ops::argmax(&ops::add(&noise, &expanded)?, axis as i32, false)
}
