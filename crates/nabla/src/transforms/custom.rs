use std::sync::Arc;

use super::autodiff::{jvp, vjp};
use super::function::{Multiary, MultiaryFunction, Vjp};
use crate::array::{Array, NodeOp};
use crate::backend::ArraySpec;
use crate::device::Stream;
use crate::error::{Exception, Result};
use crate::ops;

fn fill_tangents(primals: &[Array], tangents: &[Option<Array>]) -> Vec<Array> {
    primals
        .iter()
        .zip(tangents)
        .map(|(p, t)| t.clone().unwrap_or_else(|| ops::zeros_like(p)))
        .collect()
}

fn pick_output(outputs: Vec<Array>, index: usize) -> Result<Array> {
    outputs.into_iter().nth(index).ok_or_else(|| {
        Exception::computation(format!("function no longer produces output {index}"))
    })
}

/// Shared state of one call to a [`custom_vjp`] function.
pub struct CustomVjpRule {
    fun: Multiary,
    fun_vjp: Vjp,
    outputs: Vec<Array>,
}

impl CustomVjpRule {
    pub(crate) fn vjp(&self, primals: &[Array], index: usize, cotangent: &Array) -> Result<Vec<Array>> {
        let cotangents: Vec<Array> = self
            .outputs
            .iter()
            .enumerate()
            .map(|(j, o)| {
                if j == index {
                    cotangent.clone()
                } else {
                    ops::zeros_like(o)
                }
            })
            .collect();
        let grads = self.fun_vjp.call(primals, &cotangents, &self.outputs)?;
        if grads.len() != primals.len() {
            return Err(Exception::invalid(format!(
                "custom vjp returned {} cotangents for {} primals",
                grads.len(),
                primals.len()
            )));
        }
        for (grad, primal) in grads.iter().zip(primals) {
            if grad.shape() != primal.shape() {
                return Err(Exception::shape(format!(
                    "custom vjp cotangent of shape {:?} for primal of shape {:?}",
                    grad.shape(),
                    primal.shape()
                )));
            }
        }
        Ok(grads)
    }

    /// Forward mode differentiates the original function.
    pub(crate) fn jvp(&self, primals: &[Array], tangents: &[Option<Array>], index: usize) -> Result<Array> {
        let (_, out) = jvp(self.fun.as_ref(), primals, &fill_tangents(primals, tangents))?;
        pick_output(out, index)
    }
}

struct CustomVjpFunction {
    fun: Multiary,
    fun_vjp: Vjp,
}

impl MultiaryFunction for CustomVjpFunction {
    fn call(&self, primals: &[Array]) -> Result<Vec<Array>> {
        let outputs = self.fun.call(primals)?;
        let rule = Arc::new(CustomVjpRule {
            fun: Arc::clone(&self.fun),
            fun_vjp: Arc::clone(&self.fun_vjp),
            outputs: outputs.clone(),
        });
        Ok(outputs
            .iter()
            .enumerate()
            .map(|(i, o)| {
                Array::from_op(
                    NodeOp::CustomVjp(Arc::clone(&rule), i),
                    o.spec().clone(),
                    o.stream(),
                    primals.to_vec(),
                    Some(o.clone()),
                )
            })
            .collect())
    }

    fn arity(&self) -> Option<usize> {
        self.fun.arity()
    }
}

/// `fun` with its reverse-mode derivative replaced by `fun_vjp`.
///
/// `fun_vjp` receives the primals, one cotangent per output of `fun` and the
/// outputs themselves, and returns one cotangent per primal.
pub fn custom_vjp(fun: Multiary, fun_vjp: Vjp) -> Multiary {
    log::debug!("building custom_vjp function");
    Arc::new(CustomVjpFunction { fun, fun_vjp })
}

/// Shared state of one call to a [`checkpoint`] function.
pub struct CheckpointRule {
    fun: Multiary,
    outputs: Vec<(ArraySpec, Stream)>,
}

impl CheckpointRule {
    pub(crate) fn vjp(&self, primals: &[Array], index: usize, cotangent: &Array) -> Result<Vec<Array>> {
        let cotangents: Vec<Array> = self
            .outputs
            .iter()
            .enumerate()
            .map(|(j, (spec, stream))| {
                if j == index {
                    cotangent.clone()
                } else {
                    ops::zeros(&spec.shape, spec.dtype, &(*stream).into())
                }
            })
            .collect();
        let (_, grads) = vjp(self.fun.as_ref(), primals, &cotangents)?;
        Ok(grads)
    }

    pub(crate) fn jvp(&self, primals: &[Array], tangents: &[Option<Array>], index: usize) -> Result<Array> {
        let (_, out) = jvp(self.fun.as_ref(), primals, &fill_tangents(primals, tangents))?;
        pick_output(out, index)
    }
}

struct CheckpointFunction {
    fun: Multiary,
}

impl MultiaryFunction for CheckpointFunction {
    fn call(&self, primals: &[Array]) -> Result<Vec<Array>> {
        let outputs = self.fun.call(primals)?;
        let rule = Arc::new(CheckpointRule {
            fun: Arc::clone(&self.fun),
            outputs: outputs.iter().map(|o| (o.spec().clone(), o.stream())).collect(),
        });
        Ok(outputs
            .into_iter()
            .enumerate()
            .map(|(i, o)| {
                Array::from_op(
                    NodeOp::Checkpoint(Arc::clone(&rule), i),
                    o.spec().clone(),
                    o.stream(),
                    primals.to_vec(),
                    Some(o),
                )
            })
            .collect())
    }

    fn arity(&self) -> Option<usize> {
        self.fun.arity()
    }
}

/// `fun` whose intermediates are dropped after evaluation and recomputed
/// when gradients are taken.
pub fn checkpoint(fun: Multiary) -> Multiary {
    log::debug!("building checkpoint function");
    Arc::new(CheckpointFunction { fun })
}
