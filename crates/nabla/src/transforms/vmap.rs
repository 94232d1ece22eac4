//! Vectorizing map.
//!
//! The batched function is evaluated slice by slice and the per-slice outputs
//! are stacked, so every primitive (and every transform) composes with it.

use std::sync::Arc;

use super::function::{
    Multiary, MultiaryFunction, PairInputSingleOutput, PairInputSingleOutputFunction, Unary,
    UnaryFunction,
};
use crate::array::Array;
use crate::error::{Exception, Result};
use crate::ops;
use crate::shape::normalize_axis;

/// In-axis marking an argument that is passed whole to every slice.
pub const UNMAPPED: i32 = -1;

fn vmap_call(
    fun: &dyn MultiaryFunction,
    args: &[Array],
    in_axes: &[i32],
    out_axes: &[i32],
) -> Result<Vec<Array>> {
    if !in_axes.is_empty() && in_axes.len() != args.len() {
        return Err(Exception::invalid(format!(
            "vmap got {} in_axes for {} arguments",
            in_axes.len(),
            args.len()
        )));
    }

    let mut axes = Vec::with_capacity(args.len());
    let mut batch: Option<usize> = None;
    for (i, arg) in args.iter().enumerate() {
        let axis = in_axes.get(i).copied().unwrap_or(0);
        if axis == UNMAPPED {
            axes.push(None);
            continue;
        }
        let axis = normalize_axis(axis, arg.ndim())?;
        let size = arg.dim(axis);
        match batch {
            Some(expected) if expected != size => {
                return Err(Exception::invalid(format!(
                    "vmap found inconsistent sizes {expected} and {size} along mapped axes"
                )))
            }
            _ => batch = Some(size),
        }
        axes.push(Some(axis));
    }
    let batch = batch.ok_or_else(|| Exception::invalid("vmap requires at least one mapped argument"))?;
    if batch == 0 {
        return Err(Exception::invalid("vmap cannot map over an empty axis"));
    }

    let mut per_output: Vec<Vec<Array>> = Vec::new();
    for b in 0..batch {
        let slices = args
            .iter()
            .zip(&axes)
            .map(|(arg, axis)| match axis {
                Some(axis) => ops::index_axis(arg, *axis as i32, b),
                None => Ok(arg.clone()),
            })
            .collect::<Result<Vec<_>>>()?;
        let outputs = fun.call(&slices)?;
        if b == 0 {
            per_output = outputs.iter().map(|_| Vec::with_capacity(batch)).collect();
        } else if outputs.len() != per_output.len() {
            return Err(Exception::invalid("vmapped function changed its number of outputs"));
        }
        for (collected, output) in per_output.iter_mut().zip(outputs) {
            collected.push(output);
        }
    }

    if !out_axes.is_empty() && out_axes.len() != per_output.len() {
        return Err(Exception::invalid(format!(
            "vmap got {} out_axes for {} outputs",
            out_axes.len(),
            per_output.len()
        )));
    }
    per_output
        .iter()
        .enumerate()
        .map(|(j, outputs)| ops::stack(outputs, out_axes.get(j).copied().unwrap_or(0)))
        .collect()
}

struct VmapFunction {
    fun: Multiary,
    in_axes: Vec<i32>,
    out_axes: Vec<i32>,
}

impl MultiaryFunction for VmapFunction {
    fn call(&self, xs: &[Array]) -> Result<Vec<Array>> {
        vmap_call(self.fun.as_ref(), xs, &self.in_axes, &self.out_axes)
    }

    fn arity(&self) -> Option<usize> {
        self.fun.arity()
    }
}

struct VmapUnary {
    fun: Unary,
    in_axis: i32,
    out_axis: i32,
}

impl UnaryFunction for VmapUnary {
    fn call(&self, x: &Array) -> Result<Array> {
        let inner = |xs: &[Array]| -> Result<Vec<Array>> { Ok(vec![self.fun.call(&xs[0])?]) };
        let out = vmap_call(&inner, std::slice::from_ref(x), &[self.in_axis], &[self.out_axis])?;
        out.into_iter()
            .next()
            .ok_or_else(|| Exception::computation("vmap produced no output"))
    }
}

struct VmapPair {
    fun: PairInputSingleOutput,
    in_axes: [i32; 2],
    out_axis: i32,
}

impl PairInputSingleOutputFunction for VmapPair {
    fn call(&self, a: &Array, b: &Array) -> Result<Array> {
        let inner =
            |xs: &[Array]| -> Result<Vec<Array>> { Ok(vec![self.fun.call(&xs[0], &xs[1])?]) };
        let out = vmap_call(&inner, &[a.clone(), b.clone()], &self.in_axes, &[self.out_axis])?;
        out.into_iter()
            .next()
            .ok_or_else(|| Exception::computation("vmap produced no output"))
    }
}

/// Maps `fun` over axis `in_axes[i]` of argument `i` ([`UNMAPPED`] to broadcast
/// it) and stacks output `j` along `out_axes[j]`. Empty axis lists mean 0.
pub fn vmap(fun: Multiary, in_axes: &[i32], out_axes: &[i32]) -> Multiary {
    log::debug!("building vmap with in_axes {in_axes:?} out_axes {out_axes:?}");
    Arc::new(VmapFunction {
        fun,
        in_axes: in_axes.to_vec(),
        out_axes: out_axes.to_vec(),
    })
}

pub fn vmap_unary(fun: Unary, in_axis: i32, out_axis: i32) -> Unary {
    Arc::new(VmapUnary {
        fun,
        in_axis,
        out_axis,
    })
}

pub fn vmap_pair(
    fun: PairInputSingleOutput,
    in_axis_a: i32,
    in_axis_b: i32,
    out_axis: i32,
) -> PairInputSingleOutput {
    Arc::new(VmapPair {
        fun,
        in_axes: [in_axis_a, in_axis_b],
        out_axis,
    })
}
