//! Derivative rules for every node kind.

use std::f64::consts::PI;

use crate::array::{Array, NodeOp};
use crate::backend::{BinaryOp, Primitive, ReduceKind, UnaryOp};
use crate::error::{Exception, Result};
use crate::ops::{self, scalar_like};

/// `seed * dy/dx` for elementwise unary ops, `None` when the derivative is zero.
fn unary_partial(op: UnaryOp, x: &Array, y: &Array, seed: &Array) -> Result<Option<Array>> {
    let out = match op {
        UnaryOp::Sign | UnaryOp::Floor | UnaryOp::LogicalNot => return Ok(None),
        UnaryOp::Neg => ops::negative(seed)?,
        UnaryOp::Abs => ops::multiply(seed, &ops::sign(x)?)?,
        UnaryOp::Exp => ops::multiply(seed, y)?,
        UnaryOp::Log => ops::divide(seed, x)?,
        UnaryOp::Sin => ops::multiply(seed, &ops::cos(x)?)?,
        UnaryOp::Cos => ops::negative(&ops::multiply(seed, &ops::sin(x)?)?)?,
        UnaryOp::Tanh => {
            let one_minus = ops::subtract(&scalar_like(y, 1.0), &ops::square(y)?)?;
            ops::multiply(seed, &one_minus)?
        }
        UnaryOp::Sqrt => ops::divide(seed, &ops::multiply(&scalar_like(y, 2.0), y)?)?,
        UnaryOp::Rsqrt => {
            let dy = ops::divide(&ops::multiply(&scalar_like(y, -0.5), y)?, x)?;
            ops::multiply(seed, &dy)?
        }
        UnaryOp::Reciprocal => ops::negative(&ops::multiply(seed, &ops::square(y)?)?)?,
        UnaryOp::Sigmoid => {
            let one_minus = ops::subtract(&scalar_like(y, 1.0), y)?;
            ops::multiply(seed, &ops::multiply(y, &one_minus)?)?
        }
        UnaryOp::Erf => {
            let gauss = ops::exp(&ops::negative(&ops::square(x)?)?)?;
            let dy = ops::multiply(&scalar_like(x, 2.0 / PI.sqrt()), &gauss)?;
            ops::multiply(seed, &dy)?
        }
        UnaryOp::ErfInv => {
            let dy = ops::multiply(&scalar_like(y, PI.sqrt() / 2.0), &ops::exp(&ops::square(y)?)?)?;
            ops::multiply(seed, &dy)?
        }
    };
    Ok(Some(out))
}

/// `seed * dy/d(operand)` for elementwise binary ops; `operand` is 0 or 1.
fn binary_partial(
    op: BinaryOp,
    a: &Array,
    b: &Array,
    y: &Array,
    seed: &Array,
    operand: usize,
) -> Result<Option<Array>> {
    let lhs = operand == 0;
    let out = match op {
        BinaryOp::Add => seed.clone(),
        BinaryOp::Subtract if lhs => seed.clone(),
        BinaryOp::Subtract => ops::negative(seed)?,
        BinaryOp::Multiply => ops::multiply(seed, if lhs { b } else { a })?,
        BinaryOp::Divide if lhs => ops::divide(seed, b)?,
        BinaryOp::Divide => ops::negative(&ops::divide(&ops::multiply(seed, y)?, b)?)?,
        BinaryOp::Maximum | BinaryOp::Minimum => {
            let picks_lhs = if op == BinaryOp::Maximum {
                ops::greater_equal(a, b)?
            } else {
                ops::less_equal(a, b)?
            };
            let mask = if lhs {
                picks_lhs
            } else {
                ops::logical_not(&picks_lhs)?
            };
            ops::multiply(seed, &ops::astype(&mask, seed.dtype())?)?
        }
        BinaryOp::Power if lhs => {
            let exponent = ops::subtract(b, &scalar_like(b, 1.0))?;
            let dy = ops::multiply(b, &ops::power(a, &exponent)?)?;
            ops::multiply(seed, &dy)?
        }
        BinaryOp::Power => ops::multiply(seed, &ops::multiply(y, &ops::log(a)?)?)?,
        BinaryOp::Equal
        | BinaryOp::NotEqual
        | BinaryOp::Less
        | BinaryOp::LessEqual
        | BinaryOp::Greater
        | BinaryOp::GreaterEqual
        | BinaryOp::LogicalAnd
        | BinaryOp::LogicalOr => return Ok(None),
    };
    Ok(Some(out))
}

fn select_partial(condition: &Array, seed: &Array, operand: usize) -> Result<Option<Array>> {
    let zero = scalar_like(seed, 0.0);
    Ok(Some(match operand {
        1 => ops::where_(condition, seed, &zero)?,
        _ => ops::where_(condition, &zero, seed)?,
    }))
}

/// `seed * mask / count`, where `mask` marks the elements equal to the extremum.
fn extremum_partial(x: &Array, y: &Array, seed: &Array, axes: &[usize]) -> Result<Array> {
    let mask = ops::astype(&ops::equal(x, y)?, seed.dtype())?;
    let axes: Vec<i32> = axes.iter().map(|&a| a as i32).collect();
    let count = ops::sum(&mask, &axes, true)?;
    ops::divide(&ops::multiply(seed, &mask)?, &count)
}

fn inverse_permutation(perm: &[usize]) -> Vec<i32> {
    let mut inverse = vec![0i32; perm.len()];
    for (i, &p) in perm.iter().enumerate() {
        inverse[p] = i as i32;
    }
    inverse
}

fn as_i32(axes: &[usize]) -> Vec<i32> {
    axes.iter().map(|&a| a as i32).collect()
}

/// Cotangents for the inputs of `node`, given the cotangent of its output.
/// Entries whose `wants` flag is false may be `None`.
pub(crate) fn vjp_rule(
    node: &Array,
    inputs: &[Array],
    cotangent: &Array,
    wants: &[bool],
) -> Result<Vec<Option<Array>>> {
    let g = cotangent;
    let primitive = match node.op() {
        NodeOp::Leaf => return Ok(Vec::new()),
        NodeOp::Identity => return Ok(vec![Some(g.clone())]),
        NodeOp::StopGradient => return Ok(vec![None]),
        NodeOp::CustomVjp(rule, index) => {
            return Ok(rule.vjp(inputs, index, g)?.into_iter().map(Some).collect())
        }
        NodeOp::Checkpoint(rule, index) => {
            return Ok(rule.vjp(inputs, index, g)?.into_iter().map(Some).collect())
        }
        NodeOp::Primitive(primitive) => primitive,
    };

    let x = &inputs[0];
    let grads = match &primitive {
        Primitive::Unary(op) => vec![unary_partial(*op, x, node, g)?],
        Primitive::Binary(op) => {
            let mut out = Vec::with_capacity(2);
            for operand in 0..2 {
                out.push(if wants[operand] {
                    binary_partial(*op, &inputs[0], &inputs[1], node, g, operand)?
                } else {
                    None
                });
            }
            out
        }
        Primitive::Select => {
            let mut out = vec![None];
            for operand in 1..3 {
                out.push(if wants[operand] {
                    select_partial(&inputs[0], g, operand)?
                } else {
                    None
                });
            }
            out
        }
        Primitive::AsType => {
            if x.dtype().is_inexact() {
                vec![Some(ops::astype(g, x.dtype())?)]
            } else {
                vec![None]
            }
        }
        Primitive::Broadcast => {
            let axes: Vec<i32> = (0..x.ndim())
                .filter(|&i| x.dim(i) == 1 && node.dim(i) != 1)
                .map(|i| i as i32)
                .collect();
            if axes.is_empty() {
                vec![Some(ops::reshape(g, x.shape())?)]
            } else {
                vec![Some(ops::sum(g, &axes, true)?)]
            }
        }
        Primitive::Reshape => vec![Some(ops::reshape(g, x.shape())?)],
        Primitive::Transpose { perm } => {
            vec![Some(ops::transpose(g, &inverse_permutation(perm))?)]
        }
        Primitive::Reduce { kind, axes } => match kind {
            ReduceKind::Sum => vec![Some(ops::broadcast_to(g, x.shape())?)],
            ReduceKind::Max | ReduceKind::Min => {
                vec![Some(extremum_partial(x, node, g, axes)?)]
            }
        },
        Primitive::ArgMax { .. } | Primitive::RandomBits { .. } => vec![None; inputs.len()],
        Primitive::Matmul => {
            let (a, b) = (&inputs[0], &inputs[1]);
            let da = if wants[0] {
                Some(ops::matmul(g, &ops::swapaxes(b, -1, -2)?)?)
            } else {
                None
            };
            let db = if wants[1] {
                Some(ops::matmul(&ops::swapaxes(a, -1, -2)?, g)?)
            } else {
                None
            };
            vec![da, db]
        }
        Primitive::Slice { starts } => {
            let high: Vec<usize> = (0..x.ndim())
                .map(|i| x.dim(i) - starts[i] - node.dim(i))
                .collect();
            vec![Some(ops::pad(g, starts, &high)?)]
        }
        Primitive::Pad { low } => {
            let stops: Vec<usize> = low.iter().zip(x.shape()).map(|(l, d)| l + d).collect();
            vec![Some(ops::slice(g, low, &stops)?)]
        }
        Primitive::Concatenate { axis } => {
            let mut offset = 0;
            let mut out = Vec::with_capacity(inputs.len());
            for (input, want) in inputs.iter().zip(wants) {
                let size = input.dim(*axis);
                out.push(if *want {
                    Some(ops::slice_axis(g, *axis as i32, offset, offset + size)?)
                } else {
                    None
                });
                offset += size;
            }
            out
        }
    };
    if grads.len() != inputs.len() {
        return Err(Exception::computation(format!(
            "{} vjp produced {} cotangents for {} inputs",
            primitive.name(),
            grads.len(),
            inputs.len()
        )));
    }
    Ok(grads)
}

fn sum_tangents(parts: Vec<Array>) -> Result<Option<Array>> {
    let mut iter = parts.into_iter();
    let Some(mut total) = iter.next() else {
        return Ok(None);
    };
    for part in iter {
        total = ops::add(&total, &part)?;
    }
    Ok(Some(total))
}

/// Tangent of the output of `node`, given tangents of its inputs.
pub(crate) fn jvp_rule(
    node: &Array,
    inputs: &[Array],
    tangents: &[Option<Array>],
) -> Result<Option<Array>> {
    let primitive = match node.op() {
        NodeOp::Leaf | NodeOp::StopGradient => return Ok(None),
        NodeOp::Identity => return Ok(tangents.first().cloned().flatten()),
        NodeOp::CustomVjp(rule, index) => return rule.jvp(inputs, tangents, index).map(Some),
        NodeOp::Checkpoint(rule, index) => return rule.jvp(inputs, tangents, index).map(Some),
        NodeOp::Primitive(primitive) => primitive,
    };

    let x = &inputs[0];
    let t = tangents.first().cloned().flatten();
    let zeros_for = |i: usize| -> Array {
        tangents[i]
            .clone()
            .unwrap_or_else(|| ops::zeros_like(&inputs[i]))
    };

    match &primitive {
        Primitive::Unary(op) => match t {
            Some(t) => unary_partial(*op, x, node, &t),
            None => Ok(None),
        },
        Primitive::Binary(op) => {
            let mut parts = Vec::new();
            for (operand, tangent) in tangents.iter().enumerate().take(2) {
                if let Some(tangent) = tangent {
                    if let Some(part) =
                        binary_partial(*op, &inputs[0], &inputs[1], node, tangent, operand)?
                    {
                        parts.push(part);
                    }
                }
            }
            sum_tangents(parts)
        }
        Primitive::Select => {
            let mut parts = Vec::new();
            for operand in 1..3 {
                if let Some(tangent) = &tangents[operand] {
                    if let Some(part) = select_partial(&inputs[0], tangent, operand)? {
                        parts.push(part);
                    }
                }
            }
            sum_tangents(parts)
        }
        Primitive::AsType => match t {
            Some(t) if x.dtype().is_inexact() && node.dtype().is_inexact() => {
                Ok(Some(ops::astype(&t, node.dtype())?))
            }
            _ => Ok(None),
        },
        Primitive::Broadcast => t.map(|t| ops::broadcast_to(&t, node.shape())).transpose(),
        Primitive::Reshape => t.map(|t| ops::reshape(&t, node.shape())).transpose(),
        Primitive::Transpose { perm } => {
            let axes = as_i32(perm);
            t.map(|t| ops::transpose(&t, &axes)).transpose()
        }
        Primitive::Reduce { kind, axes } => {
            let Some(t) = t else { return Ok(None) };
            match kind {
                ReduceKind::Sum => Ok(Some(ops::sum(&t, &as_i32(axes), true)?)),
                ReduceKind::Max | ReduceKind::Min => {
                    let weighted = extremum_partial(x, node, &t, axes)?;
                    Ok(Some(ops::sum(&weighted, &as_i32(axes), true)?))
                }
            }
        }
        Primitive::ArgMax { .. } | Primitive::RandomBits { .. } => Ok(None),
        Primitive::Matmul => {
            let mut parts = Vec::new();
            if let Some(ta) = &tangents[0] {
                parts.push(ops::matmul(ta, &inputs[1])?);
            }
            if let Some(tb) = &tangents[1] {
                parts.push(ops::matmul(&inputs[0], tb)?);
            }
            sum_tangents(parts)
        }
        Primitive::Slice { starts } => {
            let stops: Vec<usize> = starts.iter().zip(node.shape()).map(|(s, d)| s + d).collect();
            t.map(|t| ops::slice(&t, starts, &stops)).transpose()
        }
        Primitive::Pad { low } => {
            let high: Vec<usize> = (0..x.ndim())
                .map(|i| node.dim(i) - low[i] - x.dim(i))
                .collect();
            t.map(|t| ops::pad(&t, low, &high)).transpose()
        }
        Primitive::Concatenate { axis } => {
            let parts: Vec<Array> = (0..inputs.len()).map(zeros_for).collect();
            Ok(Some(ops::concatenate(&parts, *axis as i32)?))
        }
    }
}
