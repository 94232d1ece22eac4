use crate::array::Array;
use crate::backend::{ArraySpec, Primitive, ReduceKind};
use crate::dtype::DType;
use crate::error::{Exception, Result};
use crate::shape::{normalize_axes, normalize_axis, Axes};

use super::creation::scalar_like;
use super::elementwise::{add, astype, divide, exp, log, stop_gradient, subtract};
use super::shape::reshape;

fn kept_shape(a: &Array, axes: &Axes) -> Vec<usize> {
    a.shape()
        .iter()
        .enumerate()
        .map(|(i, &d)| if axes.contains(&i) { 1 } else { d })
        .collect()
}

fn dropped_shape(a: &Array, axes: &Axes) -> Vec<usize> {
    a.shape()
        .iter()
        .enumerate()
        .filter(|(i, _)| !axes.contains(i))
        .map(|(_, &d)| d)
        .collect()
}

fn reduce(a: &Array, kind: ReduceKind, axes: &[i32], keepdims: bool, dtype: DType) -> Result<Array> {
    let axes = normalize_axes(axes, a.ndim())?;
    let a = astype(a, dtype)?;
    if axes.is_empty() {
        return Ok(a);
    }
    if kind != ReduceKind::Sum && axes.iter().any(|&axis| a.dim(axis) == 0) {
        return Err(Exception::invalid(format!(
            "cannot take {kind:?} over an empty axis"
        )));
    }
    let kept = kept_shape(&a, &axes);
    let reduced = Array::from_primitive(
        Primitive::Reduce {
            kind,
            axes: axes.clone(),
        },
        ArraySpec::new(dtype, kept),
        a.stream(),
        vec![a.clone()],
    );
    if keepdims {
        Ok(reduced)
    } else {
        reshape(&reduced, &dropped_shape(&a, &axes))
    }
}

/// Sum over `axes` (all axes when empty). Booleans are summed as `int32`.
pub fn sum(a: &Array, axes: &[i32], keepdims: bool) -> Result<Array> {
    let dtype = if a.dtype().is_bool() {
        DType::Int32
    } else {
        a.dtype()
    };
    reduce(a, ReduceKind::Sum, axes, keepdims, dtype)
}

pub fn mean(a: &Array, axes: &[i32], keepdims: bool) -> Result<Array> {
    let normalized = normalize_axes(axes, a.ndim())?;
    let count: usize = normalized.iter().map(|&axis| a.dim(axis)).product();
    let a = if a.dtype().is_inexact() {
        a.clone()
    } else {
        astype(a, DType::Float32)?
    };
    let total = sum(&a, axes, keepdims)?;
    divide(&total, &scalar_like(&a, count as f64))
}

pub fn max(a: &Array, axes: &[i32], keepdims: bool) -> Result<Array> {
    reduce(a, ReduceKind::Max, axes, keepdims, a.dtype())
}

pub fn min(a: &Array, axes: &[i32], keepdims: bool) -> Result<Array> {
    reduce(a, ReduceKind::Min, axes, keepdims, a.dtype())
}

/// Index of the first maximum along `axis`, as `uint32`.
pub fn argmax(a: &Array, axis: i32, keepdims: bool) -> Result<Array> {
    let axis = normalize_axis(axis, a.ndim())?;
    if a.dim(axis) == 0 {
        return Err(Exception::invalid("cannot take argmax over an empty axis"));
    }
    if a.dtype().is_complex() {
        return Err(Exception::invalid("argmax is not defined for complex arrays"));
    }
    let mut axes = Axes::new();
    axes.push(axis);
    let out = Array::from_primitive(
        Primitive::ArgMax { axis },
        ArraySpec::new(DType::Uint32, kept_shape(a, &axes)),
        a.stream(),
        vec![a.clone()],
    );
    if keepdims {
        Ok(out)
    } else {
        reshape(&out, &dropped_shape(a, &axes))
    }
}

/// `log(sum(exp(a)))` computed around the running maximum.
pub fn logsumexp(a: &Array, axes: &[i32], keepdims: bool) -> Result<Array> {
    let peak = stop_gradient(&max(a, axes, true)?);
    let shifted = exp(&subtract(a, &peak)?)?;
    let total = log(&sum(&shifted, axes, true)?)?;
    let out = add(&total, &peak)?;
    if keepdims {
        return Ok(out);
    }
    let normalized = normalize_axes(axes, a.ndim())?;
    reshape(&out, &dropped_shape(a, &normalized))
}

pub fn softmax(a: &Array, axes: &[i32]) -> Result<Array> {
    let peak = stop_gradient(&max(a, axes, true)?);
    let shifted = exp(&subtract(a, &peak)?)?;
    divide(&shifted, &sum(&shifted, axes, true)?)
}
