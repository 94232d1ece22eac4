use crate::array::Array;
use crate::backend::{ArraySpec, Primitive};
use crate::dtype::promote_types;
use crate::error::{Exception, Result};
use crate::shape::{broadcast_shapes, checked_element_count, normalize_axis};

use super::elementwise::astype;

pub fn reshape(a: &Array, shape: &[usize]) -> Result<Array> {
    if checked_element_count(shape)? != a.size() {
        return Err(Exception::shape(format!(
            "cannot reshape array of shape {:?} into {:?}",
            a.shape(),
            shape
        )));
    }
    if a.shape() == shape {
        return Ok(a.clone());
    }
    Ok(Array::from_primitive(
        Primitive::Reshape,
        ArraySpec::new(a.dtype(), shape.to_vec()),
        a.stream(),
        vec![a.clone()],
    ))
}

pub fn broadcast_to(a: &Array, shape: &[usize]) -> Result<Array> {
    if a.shape() == shape {
        return Ok(a.clone());
    }
    if broadcast_shapes(a.shape(), shape)? != shape {
        return Err(Exception::shape(format!(
            "cannot broadcast array of shape {:?} to {:?}",
            a.shape(),
            shape
        )));
    }
    let mut padded = vec![1; shape.len() - a.ndim()];
    padded.extend_from_slice(a.shape());
    let a = reshape(a, &padded)?;
    if a.shape() == shape {
        return Ok(a);
    }
    Ok(Array::from_primitive(
        Primitive::Broadcast,
        ArraySpec::new(a.dtype(), shape.to_vec()),
        a.stream(),
        vec![a],
    ))
}

/// Permutes axes; `axes` must name every axis exactly once.
pub fn transpose(a: &Array, axes: &[i32]) -> Result<Array> {
    if axes.len() != a.ndim() {
        return Err(Exception::invalid(format!(
            "transpose axes {axes:?} do not match array with {} dimensions",
            a.ndim()
        )));
    }
    let mut perm = Vec::with_capacity(axes.len());
    for &axis in axes {
        let axis = normalize_axis(axis, a.ndim())?;
        if perm.contains(&axis) {
            return Err(Exception::invalid(format!("repeated axis {axis} in transpose")));
        }
        perm.push(axis);
    }
    if perm.iter().enumerate().all(|(i, &p)| i == p) {
        return Ok(a.clone());
    }
    let shape: Vec<usize> = perm.iter().map(|&p| a.dim(p)).collect();
    Ok(Array::from_primitive(
        Primitive::Transpose { perm },
        ArraySpec::new(a.dtype(), shape),
        a.stream(),
        vec![a.clone()],
    ))
}

/// Reverses the axis order.
pub fn transpose_all(a: &Array) -> Result<Array> {
    let axes: Vec<i32> = (0..a.ndim() as i32).rev().collect();
    transpose(a, &axes)
}

pub fn swapaxes(a: &Array, axis1: i32, axis2: i32) -> Result<Array> {
    let i = normalize_axis(axis1, a.ndim())?;
    let j = normalize_axis(axis2, a.ndim())?;
    let mut axes: Vec<i32> = (0..a.ndim() as i32).collect();
    axes.swap(i, j);
    transpose(a, &axes)
}

pub fn expand_dims(a: &Array, axis: i32) -> Result<Array> {
    let axis = normalize_axis(axis, a.ndim() + 1)?;
    let mut shape = a.shape().to_vec();
    shape.insert(axis, 1);
    reshape(a, &shape)
}

/// Removes `axis`, which must have size 1.
pub fn squeeze(a: &Array, axis: i32) -> Result<Array> {
    let axis = normalize_axis(axis, a.ndim())?;
    if a.dim(axis) != 1 {
        return Err(Exception::invalid(format!(
            "cannot squeeze axis {axis} of size {}",
            a.dim(axis)
        )));
    }
    let mut shape = a.shape().to_vec();
    shape.remove(axis);
    reshape(a, &shape)
}

/// Contiguous window `[starts, stops)` on every axis.
pub fn slice(a: &Array, starts: &[usize], stops: &[usize]) -> Result<Array> {
    if starts.len() != a.ndim() || stops.len() != a.ndim() {
        return Err(Exception::invalid(format!(
            "slice bounds must cover all {} axes",
            a.ndim()
        )));
    }
    let mut shape = Vec::with_capacity(a.ndim());
    for (axis, (&start, &stop)) in starts.iter().zip(stops).enumerate() {
        if start > stop || stop > a.dim(axis) {
            return Err(Exception::invalid(format!(
                "slice [{start}, {stop}) out of range for axis {axis} of size {}",
                a.dim(axis)
            )));
        }
        shape.push(stop - start);
    }
    if shape == a.shape() {
        return Ok(a.clone());
    }
    Ok(Array::from_primitive(
        Primitive::Slice {
            starts: starts.to_vec(),
        },
        ArraySpec::new(a.dtype(), shape),
        a.stream(),
        vec![a.clone()],
    ))
}

/// Window `[start, stop)` along one axis, full range elsewhere.
pub fn slice_axis(a: &Array, axis: i32, start: usize, stop: usize) -> Result<Array> {
    let axis = normalize_axis(axis, a.ndim())?;
    let mut starts = vec![0; a.ndim()];
    let mut stops = a.shape().to_vec();
    starts[axis] = start;
    stops[axis] = stop;
    slice(a, &starts, &stops)
}

/// Element `index` along `axis`, with that axis removed.
pub fn index_axis(a: &Array, axis: i32, index: usize) -> Result<Array> {
    let axis_u = normalize_axis(axis, a.ndim())?;
    let sliced = slice_axis(a, axis, index, index + 1)?;
    squeeze(&sliced, axis_u as i32)
}

/// Zero padding: `low[i]` elements before and `high[i]` after axis `i`.
pub fn pad(a: &Array, low: &[usize], high: &[usize]) -> Result<Array> {
    if low.len() != a.ndim() || high.len() != a.ndim() {
        return Err(Exception::invalid(format!(
            "padding must cover all {} axes",
            a.ndim()
        )));
    }
    if low.iter().chain(high).all(|&p| p == 0) {
        return Ok(a.clone());
    }
    let shape: Vec<usize> = (0..a.ndim()).map(|i| a.dim(i) + low[i] + high[i]).collect();
    Ok(Array::from_primitive(
        Primitive::Pad { low: low.to_vec() },
        ArraySpec::new(a.dtype(), shape),
        a.stream(),
        vec![a.clone()],
    ))
}

pub fn concatenate(arrays: &[Array], axis: i32) -> Result<Array> {
    let first = arrays
        .first()
        .ok_or_else(|| Exception::invalid("concatenate requires at least one array"))?;
    let axis = normalize_axis(axis, first.ndim())?;
    let mut dtype = first.dtype();
    let mut shape = first.shape().to_vec();
    shape[axis] = 0;
    for a in arrays {
        if a.ndim() != first.ndim() {
            return Err(Exception::shape(
                "all concatenated arrays must have the same number of dimensions",
            ));
        }
        for i in 0..a.ndim() {
            if i != axis && a.dim(i) != first.dim(i) {
                return Err(Exception::shape(format!(
                    "cannot concatenate {:?} with {:?} along axis {axis}",
                    first.shape(),
                    a.shape()
                )));
            }
        }
        shape[axis] += a.dim(axis);
        dtype = promote_types(dtype, a.dtype());
    }
    if arrays.len() == 1 {
        return astype(first, dtype);
    }
    let inputs = arrays
        .iter()
        .map(|a| astype(a, dtype))
        .collect::<Result<Vec<_>>>()?;
    Ok(Array::from_primitive(
        Primitive::Concatenate { axis },
        ArraySpec::new(dtype, shape),
        first.stream(),
        inputs,
    ))
}

/// Joins arrays of identical shape along a new axis.
pub fn stack(arrays: &[Array], axis: i32) -> Result<Array> {
    let expanded = arrays
        .iter()
        .map(|a| expand_dims(a, axis))
        .collect::<Result<Vec<_>>>()?;
    concatenate(&expanded, axis)
}
