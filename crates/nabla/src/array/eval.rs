use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::{Array, NodeOp};
use crate::backend::registry::create_backend;
use crate::backend::{ArrayBackend, ArrayLiteral, BackendError};
use crate::device::DeviceType;
use crate::error::{Exception, Result};

/// Materializes every array in `arrays`, running each pending node once.
///
/// This is the only synchronization point: it blocks until all values exist.
pub fn eval(arrays: &[Array]) -> Result<()> {
    let order = schedule(arrays);
    if order.is_empty() {
        return Ok(());
    }
    log::trace!("evaluating {} pending nodes", order.len());
    let mut backends: HashMap<DeviceType, Arc<dyn ArrayBackend>> = HashMap::new();
    for array in &order {
        evaluate_node(array, &mut backends)?;
    }
    Ok(())
}

/// What has to be computed before `array`.
fn dependencies(array: &Array) -> Vec<Array> {
    let graph = array.graph();
    match graph.op {
        NodeOp::Leaf => Vec::new(),
        NodeOp::CustomVjp(..) | NodeOp::Checkpoint(..) => graph.forward.iter().cloned().collect(),
        _ => graph.inputs.clone(),
    }
}

/// Post-order of the unevaluated nodes reachable from `roots`.
fn schedule(roots: &[Array]) -> Vec<Array> {
    let mut order = Vec::new();
    let mut visited: HashSet<u64> = HashSet::new();
    let mut stack: Vec<(Array, bool)> = roots.iter().rev().map(|a| (a.clone(), false)).collect();

    while let Some((array, expanded)) = stack.pop() {
        if expanded {
            order.push(array);
            continue;
        }
        if array.is_evaluated() || !visited.insert(array.id()) {
            continue;
        }
        let deps = dependencies(&array);
        stack.push((array, true));
        for dep in deps.into_iter().rev() {
            if !dep.is_evaluated() && !visited.contains(&dep.id()) {
                stack.push((dep, false));
            }
        }
    }
    order
}

fn input_value(array: &Array) -> Result<ArrayLiteral> {
    array.value().cloned().ok_or_else(|| {
        Exception::computation(format!("input node {} was not evaluated", array.id()))
    })
}

fn evaluate_node(
    array: &Array,
    backends: &mut HashMap<DeviceType, Arc<dyn ArrayBackend>>,
) -> Result<()> {
    if array.is_evaluated() {
        return Ok(());
    }
    let (op, inputs, forward) = {
        let graph = array.graph();
        (graph.op.clone(), graph.inputs.clone(), graph.forward.clone())
    };

    let literal = match &op {
        NodeOp::Leaf => {
            return Err(Exception::computation(format!(
                "leaf node {} has no value",
                array.id()
            )))
        }
        NodeOp::Identity | NodeOp::StopGradient => {
            let input = inputs
                .first()
                .ok_or_else(|| Exception::computation("pass-through node without input"))?;
            input_value(input)?
        }
        NodeOp::CustomVjp(..) | NodeOp::Checkpoint(..) => {
            let source = forward.ok_or_else(|| {
                Exception::computation(format!(
                    "{} node {} lost its forward value",
                    op.name(),
                    array.id()
                ))
            })?;
            input_value(&source)?
        }
        NodeOp::Primitive(primitive) => {
            let device_type = array.stream().device.device_type;
            let backend = match backends.get(&device_type) {
                Some(backend) => Arc::clone(backend),
                None => {
                    let backend = create_backend(device_type).ok_or(BackendError::Unavailable {
                        device: device_type,
                    })?;
                    backends.insert(device_type, Arc::clone(&backend));
                    backend
                }
            };
            let values = inputs.iter().map(input_value).collect::<Result<Vec<_>>>()?;
            let literal = backend.execute(primitive, &values, array.spec())?;
            if &literal.spec != array.spec() || literal.data.len() != array.size() {
                return Err(BackendError::execution(format!(
                    "{} produced {:?} {} for expected {:?} {}",
                    primitive.name(),
                    literal.spec.shape,
                    literal.spec.dtype,
                    array.shape(),
                    array.dtype()
                ))
                .into());
            }
            literal
        }
    };

    array.set_value(literal);
    if matches!(op, NodeOp::CustomVjp(..) | NodeOp::Checkpoint(..)) {
        array.release_forward();
    }
    Ok(())
}
