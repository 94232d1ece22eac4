//! Graph capture and replay.
//!
//! A compiled function is traced once per input signature. The trace records
//! every node that depends on the arguments; later calls with the same
//! signature rebuild those nodes directly instead of running the function.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use once_cell::sync::Lazy;

use super::autodiff::{trace_inputs, Tape};
use super::function::{Multiary, MultiaryFunction};
use crate::array::{Array, NodeOp};
use crate::backend::{ArraySpec, Primitive};
use crate::device::Stream;
use crate::dtype::DType;
use crate::error::{Exception, Result};

/// Global switch for [`compile`]d functions.
///
/// The reference backend does not fuse kernels, so every mode other than
/// `Disabled` replays traces the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileMode {
    Disabled,
    NoSimplify,
    NoFuse,
    Enabled,
}

static COMPILE_MODE: Lazy<RwLock<CompileMode>> = Lazy::new(|| {
    RwLock::new(if crate::env::compile_disabled() {
        CompileMode::Disabled
    } else {
        CompileMode::Enabled
    })
});

pub fn compile_mode() -> CompileMode {
    *COMPILE_MODE.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn set_compile_mode(mode: CompileMode) {
    log::debug!("compile mode set to {mode:?}");
    *COMPILE_MODE.write().unwrap_or_else(PoisonError::into_inner) = mode;
}

pub fn enable_compile() {
    set_compile_mode(CompileMode::Enabled);
}

/// Compiled functions call straight through until compilation is enabled again.
pub fn disable_compile() {
    set_compile_mode(CompileMode::Disabled);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Dims {
    Exact(Vec<usize>),
    Rank(usize),
}

type Signature = Vec<(DType, Dims)>;

fn signature(args: &[Array], shapeless: bool) -> Signature {
    args.iter()
        .map(|a| {
            let dims = if shapeless {
                Dims::Rank(a.ndim())
            } else {
                Dims::Exact(a.shape().to_vec())
            };
            (a.dtype(), dims)
        })
        .collect()
}

#[derive(Clone)]
enum Slot {
    Input(usize),
    Step(usize),
    Captured(Array),
}

#[derive(Clone)]
enum StepOp {
    Primitive(Primitive),
    Identity,
    StopGradient,
}

impl StepOp {
    fn node_op(&self) -> NodeOp {
        match self {
            StepOp::Primitive(p) => NodeOp::Primitive(p.clone()),
            StepOp::Identity => NodeOp::Identity,
            StepOp::StopGradient => NodeOp::StopGradient,
        }
    }
}

struct Step {
    op: StepOp,
    spec: ArraySpec,
    stream: Stream,
    inputs: Vec<Slot>,
    /// Input shapes seen while tracing.
    traced_inputs: Vec<Vec<usize>>,
}

enum Trace {
    Graph { steps: Vec<Step>, outputs: Vec<Slot> },
    /// The function contains nodes that cannot be replayed; it is called as is.
    Opaque,
}

fn record(args: &[Array], fun: &dyn MultiaryFunction) -> Result<(Vec<Array>, Trace)> {
    let tracers = trace_inputs(args);
    let outputs = fun.call(&tracers)?;
    let tracer_ids: HashSet<u64> = tracers.iter().map(Array::id).collect();
    let tape = Tape::build(&outputs, &tracer_ids);

    let mut slots: HashMap<u64, Slot> = tracers
        .iter()
        .enumerate()
        .map(|(i, t)| (t.id(), Slot::Input(i)))
        .collect();
    let mut steps = Vec::new();
    for node in &tape.order {
        if slots.contains_key(&node.id()) {
            continue;
        }
        if !tape.depends(node) {
            slots.insert(node.id(), Slot::Captured(node.clone()));
            continue;
        }
        let op = match node.op() {
            NodeOp::Primitive(p) => StepOp::Primitive(p),
            NodeOp::Identity => StepOp::Identity,
            NodeOp::StopGradient => StepOp::StopGradient,
            other => {
                log::debug!("{} node makes the trace opaque", other.name());
                return Ok((outputs, Trace::Opaque));
            }
        };
        let node_inputs = node.inputs();
        let inputs = node_inputs
            .iter()
            .map(|i| {
                slots.get(&i.id()).cloned().ok_or_else(|| {
                    Exception::computation("trace visited a node before its inputs")
                })
            })
            .collect::<Result<Vec<_>>>()?;
        slots.insert(node.id(), Slot::Step(steps.len()));
        steps.push(Step {
            op,
            spec: node.spec().clone(),
            stream: node.stream(),
            inputs,
            traced_inputs: node_inputs.iter().map(|i| i.shape().to_vec()).collect(),
        });
    }

    let output_slots = outputs
        .iter()
        .map(|o| {
            slots
                .get(&o.id())
                .cloned()
                .ok_or_else(|| Exception::computation("output missing from trace"))
        })
        .collect::<Result<Vec<_>>>()?;
    log::debug!("traced {} steps for {} outputs", steps.len(), output_slots.len());
    Ok((
        outputs,
        Trace::Graph {
            steps,
            outputs: output_slots,
        },
    ))
}

fn resolve(slot: &Slot, args: &[Array], values: &[Array]) -> Array {
    match slot {
        Slot::Input(i) => args[*i].clone(),
        Slot::Step(j) => values[*j].clone(),
        Slot::Captured(a) => a.clone(),
    }
}

fn replay(steps: &[Step], outputs: &[Slot], args: &[Array]) -> Result<Vec<Array>> {
    let mut values: Vec<Array> = Vec::with_capacity(steps.len());
    for step in steps {
        let inputs: Vec<Array> = step
            .inputs
            .iter()
            .map(|s| resolve(s, args, &values))
            .collect();
        let unchanged = inputs
            .iter()
            .zip(&step.traced_inputs)
            .all(|(i, traced)| i.shape() == traced.as_slice());
        let spec = if unchanged {
            step.spec.clone()
        } else {
            ArraySpec::new(step.spec.dtype, infer_shape(step, &inputs)?)
        };
        values.push(Array::from_op(step.op.node_op(), spec, step.stream, inputs, None));
    }
    Ok(outputs.iter().map(|s| resolve(s, args, &values)).collect())
}

fn not_shapeless(step: &Step) -> Exception {
    let name = match &step.op {
        StepOp::Primitive(p) => p.name(),
        StepOp::Identity => "identity",
        StepOp::StopGradient => "stop_gradient",
    };
    Exception::invalid(format!(
        "{name} cannot be replayed on inputs of a different shape"
    ))
}

/// Axes of `from` dropped (all of size 1) to give `to`, if that is all the reshape did.
fn squeezed_axes(from: &[usize], to: &[usize]) -> Option<Vec<usize>> {
    let mut dropped = Vec::new();
    let mut j = 0;
    for (i, &d) in from.iter().enumerate() {
        if j < to.len() && to[j] == d {
            j += 1;
        } else if d == 1 {
            dropped.push(i);
        } else {
            return None;
        }
    }
    (j == to.len()).then_some(dropped)
}

fn infer_shape(step: &Step, inputs: &[Array]) -> Result<Vec<usize>> {
    let first = inputs.first().ok_or_else(|| not_shapeless(step))?.shape();
    let same_shapes = || inputs.iter().all(|i| i.shape() == first);
    match &step.op {
        StepOp::Identity | StepOp::StopGradient => Ok(first.to_vec()),
        StepOp::Primitive(p) => match p {
            Primitive::Unary(_) | Primitive::AsType => Ok(first.to_vec()),
            Primitive::Binary(_) | Primitive::Select if same_shapes() => Ok(first.to_vec()),
            Primitive::Transpose { perm } => Ok(perm.iter().map(|&p| first[p]).collect()),
            Primitive::Reduce { axes, .. } => {
                let mut shape = first.to_vec();
                for &axis in axes {
                    shape[axis] = 1;
                }
                Ok(shape)
            }
            Primitive::ArgMax { axis } => {
                let mut shape = first.to_vec();
                shape[*axis] = 1;
                Ok(shape)
            }
            Primitive::Matmul => {
                let b = inputs[1].shape();
                let n = first.len();
                if n < 2 || b.len() != n || first[..n - 2] != b[..n - 2] || first[n - 1] != b[n - 2] {
                    return Err(Exception::shape(format!(
                        "cannot replay matmul of {first:?} and {b:?}"
                    )));
                }
                let mut shape = first.to_vec();
                shape[n - 1] = b[n - 1];
                Ok(shape)
            }
            Primitive::Concatenate { axis } => {
                let mut shape = first.to_vec();
                shape[*axis] = inputs.iter().map(|i| i.dim(*axis)).sum();
                Ok(shape)
            }
            Primitive::Reshape => {
                let traced_in = &step.traced_inputs[0];
                let traced_out = &step.spec.shape;
                if let Some(dropped) = squeezed_axes(traced_in, traced_out) {
                    if dropped.iter().all(|&a| first.get(a) == Some(&1)) {
                        return Ok(first
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| !dropped.contains(i))
                            .map(|(_, &d)| d)
                            .collect());
                    }
                } else if let Some(inserted) = squeezed_axes(traced_out, traced_in) {
                    let mut shape = first.to_vec();
                    for &axis in &inserted {
                        shape.insert(axis, 1);
                    }
                    return Ok(shape);
                }
                Err(not_shapeless(step))
            }
            _ => Err(not_shapeless(step)),
        },
    }
}

struct CompiledFunction {
    fun: Multiary,
    shapeless: bool,
    cache: Mutex<HashMap<Signature, Arc<Trace>>>,
}

impl MultiaryFunction for CompiledFunction {
    fn call(&self, args: &[Array]) -> Result<Vec<Array>> {
        if compile_mode() == CompileMode::Disabled {
            return self.fun.call(args);
        }
        let key = signature(args, self.shapeless);
        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        match cached.as_deref() {
            Some(Trace::Graph { steps, outputs }) => replay(steps, outputs, args),
            Some(Trace::Opaque) => self.fun.call(args),
            None => {
                let (outputs, trace) = record(args, self.fun.as_ref())?;
                self.cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key, Arc::new(trace));
                Ok(outputs)
            }
        }
    }

    fn arity(&self) -> Option<usize> {
        self.fun.arity()
    }
}

/// Traces `fun` on first use for each input signature and replays the trace
/// afterwards.
///
/// With `shapeless` the signature ignores dimension sizes, so one trace
/// serves inputs of any shape with the same rank; replaying it fails with
/// `InvalidArgument` when a shape-dependent operation sees a new shape.
pub fn compile(fun: Multiary, shapeless: bool) -> Multiary {
    log::debug!("building compiled function (shapeless: {shapeless})");
    Arc::new(CompiledFunction {
        fun,
        shapeless,
        cache: Mutex::new(HashMap::new()),
    })
}
