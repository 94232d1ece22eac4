//! Reverse and forward mode differentiation over the lazy graph.
//!
//! Both modes trace `fun` on fresh identity nodes wrapping the primals, then
//! walk only the part of the graph that depends on those nodes.

use std::collections::{HashMap, HashSet};

use super::function::MultiaryFunction;
use super::rules::{jvp_rule, vjp_rule};
use crate::array::{Array, NodeOp};
use crate::error::{Exception, Result};
use crate::ops;

/// Distinct pass-through nodes standing in for the primals while tracing.
pub(crate) fn trace_inputs(primals: &[Array]) -> Vec<Array> {
    primals
        .iter()
        .map(|p| {
            Array::from_op(
                NodeOp::Identity,
                p.spec().clone(),
                p.stream(),
                vec![p.clone()],
                None,
            )
        })
        .collect()
}

/// Nodes reachable from a set of outputs, inputs first, with the subset that
/// depends on the traced arguments.
pub(crate) struct Tape {
    pub(crate) order: Vec<Array>,
    depends: HashSet<u64>,
}

impl Tape {
    pub(crate) fn build(outputs: &[Array], tracers: &HashSet<u64>) -> Tape {
        let mut order = Vec::new();
        let mut visited: HashSet<u64> = HashSet::new();
        let mut stack: Vec<(Array, bool)> =
            outputs.iter().rev().map(|a| (a.clone(), false)).collect();

        while let Some((array, expanded)) = stack.pop() {
            if expanded {
                order.push(array);
                continue;
            }
            if !visited.insert(array.id()) {
                continue;
            }
            let inputs = if tracers.contains(&array.id()) {
                Vec::new()
            } else {
                array.inputs()
            };
            stack.push((array, true));
            for input in inputs.into_iter().rev() {
                if !visited.contains(&input.id()) {
                    stack.push((input, false));
                }
            }
        }

        let mut depends = HashSet::new();
        for array in &order {
            if tracers.contains(&array.id())
                || array.inputs().iter().any(|i| depends.contains(&i.id()))
            {
                depends.insert(array.id());
            }
        }
        Tape { order, depends }
    }

    pub(crate) fn depends(&self, array: &Array) -> bool {
        self.depends.contains(&array.id())
    }
}

fn accumulate(grads: &mut HashMap<u64, Array>, id: u64, grad: Array) -> Result<()> {
    let merged = match grads.remove(&id) {
        Some(existing) => ops::add(&existing, &grad)?,
        None => grad,
    };
    grads.insert(id, merged);
    Ok(())
}

/// Reverse pass where the cotangents are chosen after seeing the outputs.
pub(crate) fn vjp_with<C>(
    fun: &dyn MultiaryFunction,
    primals: &[Array],
    cotangents_for: C,
) -> Result<(Vec<Array>, Vec<Array>)>
where
    C: FnOnce(&[Array]) -> Result<Vec<Array>>,
{
    let tracers = trace_inputs(primals);
    let outputs = fun.call(&tracers)?;
    let cotangents = cotangents_for(&outputs)?;
    if cotangents.len() != outputs.len() {
        return Err(Exception::invalid(format!(
            "expected {} cotangents for the function outputs, got {}",
            outputs.len(),
            cotangents.len()
        )));
    }
    for (output, cotangent) in outputs.iter().zip(&cotangents) {
        if output.shape() != cotangent.shape() {
            return Err(Exception::shape(format!(
                "cotangent of shape {:?} does not match output of shape {:?}",
                cotangent.shape(),
                output.shape()
            )));
        }
    }

    let tracer_ids: HashSet<u64> = tracers.iter().map(Array::id).collect();
    let tape = Tape::build(&outputs, &tracer_ids);
    let mut grads: HashMap<u64, Array> = HashMap::new();
    for (output, cotangent) in outputs.iter().zip(&cotangents) {
        if tape.depends(output) {
            accumulate(&mut grads, output.id(), ops::astype(cotangent, output.dtype())?)?;
        }
    }

    for node in tape.order.iter().rev() {
        if tracer_ids.contains(&node.id()) {
            continue;
        }
        let Some(cotangent) = grads.remove(&node.id()) else {
            continue;
        };
        let inputs = node.inputs();
        let wants: Vec<bool> = inputs.iter().map(|i| tape.depends(i)).collect();
        if !wants.iter().any(|&w| w) {
            continue;
        }
        let input_grads = vjp_rule(node, &inputs, &cotangent, &wants)?;
        for ((input, grad), want) in inputs.iter().zip(input_grads).zip(&wants) {
            if let (Some(grad), true) = (grad, *want) {
                accumulate(&mut grads, input.id(), grad)?;
            }
        }
    }

    let vjps = tracers
        .iter()
        .zip(primals)
        .map(|(tracer, primal)| {
            grads
                .remove(&tracer.id())
                .unwrap_or_else(|| ops::zeros_like(primal))
        })
        .collect();
    Ok((outputs, vjps))
}

/// Vector-Jacobian product: `(fun(primals), cotangents^T J)`.
///
/// `cotangents` must hold one array per output of `fun`, shaped like it.
pub fn vjp(
    fun: &dyn MultiaryFunction,
    primals: &[Array],
    cotangents: &[Array],
) -> Result<(Vec<Array>, Vec<Array>)> {
    vjp_with(fun, primals, |_| Ok(cotangents.to_vec()))
}

/// Jacobian-vector product: `(fun(primals), J tangents)`.
pub fn jvp(
    fun: &dyn MultiaryFunction,
    primals: &[Array],
    tangents: &[Array],
) -> Result<(Vec<Array>, Vec<Array>)> {
    if tangents.len() != primals.len() {
        return Err(Exception::invalid(format!(
            "expected {} tangents, got {}",
            primals.len(),
            tangents.len()
        )));
    }
    for (primal, tangent) in primals.iter().zip(tangents) {
        if primal.shape() != tangent.shape() {
            return Err(Exception::shape(format!(
                "tangent of shape {:?} does not match primal of shape {:?}",
                tangent.shape(),
                primal.shape()
            )));
        }
    }

    let tracers = trace_inputs(primals);
    let outputs = fun.call(&tracers)?;
    let tracer_ids: HashSet<u64> = tracers.iter().map(Array::id).collect();
    let tape = Tape::build(&outputs, &tracer_ids);

    let mut derived: HashMap<u64, Array> = HashMap::new();
    for ((tracer, primal), tangent) in tracers.iter().zip(primals).zip(tangents) {
        derived.insert(tracer.id(), ops::astype(tangent, primal.dtype())?);
    }
    for node in &tape.order {
        if tracer_ids.contains(&node.id()) || !tape.depends(node) {
            continue;
        }
        let inputs = node.inputs();
        let input_tangents: Vec<Option<Array>> =
            inputs.iter().map(|i| derived.get(&i.id()).cloned()).collect();
        if input_tangents.iter().all(Option::is_none) {
            continue;
        }
        if let Some(tangent) = jvp_rule(node, &inputs, &input_tangents)? {
            derived.insert(node.id(), tangent);
        }
    }

    let jvps = outputs
        .iter()
        .map(|o| {
            derived
                .get(&o.id())
                .cloned()
                .unwrap_or_else(|| ops::zeros_like(o))
        })
        .collect();
    Ok((outputs, jvps))
}

pub fn vjp_unary(
    fun: &dyn super::function::UnaryFunction,
    primal: &Array,
    cotangent: &Array,
) -> Result<(Array, Array)> {
    let wrapped = |xs: &[Array]| -> Result<Vec<Array>> { Ok(vec![fun.call(&xs[0])?]) };
    let (outputs, vjps) = vjp(&wrapped, std::slice::from_ref(primal), std::slice::from_ref(cotangent))?;
    first_pair(outputs, vjps)
}

pub fn jvp_unary(
    fun: &dyn super::function::UnaryFunction,
    primal: &Array,
    tangent: &Array,
) -> Result<(Array, Array)> {
    let wrapped = |xs: &[Array]| -> Result<Vec<Array>> { Ok(vec![fun.call(&xs[0])?]) };
    let (outputs, jvps) = jvp(&wrapped, std::slice::from_ref(primal), std::slice::from_ref(tangent))?;
    first_pair(outputs, jvps)
}

fn first_pair(a: Vec<Array>, b: Vec<Array>) -> Result<(Array, Array)> {
    match (a.into_iter().next(), b.into_iter().next()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(Exception::computation("unary transform produced no output")),
    }
}
