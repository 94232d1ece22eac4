//! Lazily evaluated arrays.
//!
//! An [`Array`] is a cheap, shareable reference to a node in a computation
//! graph. Building an operation records a node; nothing runs until [`eval`]
//! (or a read such as [`Array::item`]) asks for values, at which point the
//! pending subgraph is executed through the backend registered for the
//! node's device.

mod element;
mod eval;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

pub use element::ArrayElement;
pub use eval::eval;

use crate::backend::{ArrayData, ArrayLiteral, ArraySpec, Primitive};
use crate::device::{Stream, StreamOrDevice};
use crate::dtype::DType;
use crate::error::{Exception, Result};
use crate::transforms::{CheckpointRule, CustomVjpRule};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// What produced a node.
#[derive(Clone)]
pub(crate) enum NodeOp {
    /// Holds a value and nothing else.
    Leaf,
    Primitive(Primitive),
    /// Passes its input through; used to mark traced arguments.
    Identity,
    /// Passes its input through and blocks gradients.
    StopGradient,
    /// Output `index` of a function with a caller-supplied vjp.
    CustomVjp(Arc<CustomVjpRule>, usize),
    /// Output `index` of a function whose intermediates are recomputed for gradients.
    Checkpoint(Arc<CheckpointRule>, usize),
}

impl NodeOp {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            NodeOp::Leaf => "leaf",
            NodeOp::Primitive(p) => p.name(),
            NodeOp::Identity => "identity",
            NodeOp::StopGradient => "stop_gradient",
            NodeOp::CustomVjp(..) => "custom_vjp",
            NodeOp::Checkpoint(..) => "checkpoint",
        }
    }
}

pub(crate) struct Graph {
    pub(crate) op: NodeOp,
    /// Differentiation inputs.
    pub(crate) inputs: Vec<Array>,
    /// Evaluation source for `CustomVjp` and `Checkpoint`; released once the value exists.
    pub(crate) forward: Option<Array>,
}

struct Node {
    id: u64,
    spec: ArraySpec,
    stream: Stream,
    graph: RwLock<Graph>,
    value: OnceLock<ArrayLiteral>,
}

/// A multi-dimensional, possibly not yet computed, array value.
#[derive(Clone)]
pub struct Array {
    node: Arc<Node>,
}

impl Array {
    pub(crate) fn from_op(
        op: NodeOp,
        spec: ArraySpec,
        stream: Stream,
        inputs: Vec<Array>,
        forward: Option<Array>,
    ) -> Array {
        let array = Array {
            node: Arc::new(Node {
                id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
                spec,
                stream,
                graph: RwLock::new(Graph {
                    op,
                    inputs,
                    forward,
                }),
                value: OnceLock::new(),
            }),
        };
        if crate::env::eager_enabled() {
            if let Err(err) = array.eval() {
                log::debug!("eager evaluation of node {} failed: {err}", array.id());
            }
        }
        array
    }

    pub(crate) fn from_primitive(
        primitive: Primitive,
        spec: ArraySpec,
        stream: Stream,
        inputs: Vec<Array>,
    ) -> Array {
        Array::from_op(NodeOp::Primitive(primitive), spec, stream, inputs, None)
    }

    /// Wraps an already materialized literal on the given stream or device.
    pub fn from_literal_on(literal: ArrayLiteral, stream: &StreamOrDevice) -> Array {
        let value = OnceLock::new();
        let spec = literal.spec.clone();
        let _ = value.set(literal);
        Array {
            node: Arc::new(Node {
                id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
                spec,
                stream: stream.resolve(),
                graph: RwLock::new(Graph {
                    op: NodeOp::Leaf,
                    inputs: Vec::new(),
                    forward: None,
                }),
                value,
            }),
        }
    }

    pub fn from_literal(literal: ArrayLiteral) -> Array {
        Array::from_literal_on(literal, &StreamOrDevice::Default)
    }

    pub fn from_vec<T: ArrayElement>(values: Vec<T>, shape: &[usize]) -> Result<Array> {
        let spec = ArraySpec::new(T::DTYPE, shape.to_vec());
        if spec.size() != values.len() {
            return Err(Exception::shape(format!(
                "{} values cannot fill shape {:?}",
                values.len(),
                shape
            )));
        }
        let literal = ArrayLiteral {
            spec,
            data: T::into_data(values),
        };
        Ok(Array::from_literal(literal))
    }

    pub fn from_slice<T: ArrayElement>(values: &[T], shape: &[usize]) -> Result<Array> {
        Array::from_vec(values.to_vec(), shape)
    }

    /// Zero-dimensional array holding `value`.
    pub fn scalar<T: ArrayElement>(value: T) -> Array {
        Array::from_literal(ArrayLiteral {
            spec: ArraySpec::new(T::DTYPE, Vec::new()),
            data: T::into_data(vec![value]),
        })
    }

    pub fn id(&self) -> u64 {
        self.node.id
    }

    pub fn spec(&self) -> &ArraySpec {
        &self.node.spec
    }

    pub fn shape(&self) -> &[usize] {
        &self.node.spec.shape
    }

    pub fn dim(&self, axis: usize) -> usize {
        self.node.spec.shape[axis]
    }

    pub fn ndim(&self) -> usize {
        self.node.spec.ndim()
    }

    pub fn size(&self) -> usize {
        self.node.spec.size()
    }

    pub fn nbytes(&self) -> usize {
        self.node.spec.nbytes()
    }

    pub fn dtype(&self) -> DType {
        self.node.spec.dtype
    }

    pub fn stream(&self) -> Stream {
        self.node.stream
    }

    pub fn is_evaluated(&self) -> bool {
        self.node.value.get().is_some()
    }

    pub fn eval(&self) -> Result<()> {
        eval(std::slice::from_ref(self))
    }

    /// Evaluates the array and returns its materialized value.
    pub fn literal(&self) -> Result<ArrayLiteral> {
        self.eval()?;
        self.value()
            .cloned()
            .ok_or_else(|| Exception::computation("array has no value after evaluation"))
    }

    /// Extracts the single element of a size-1 array.
    ///
    /// With `retain_graph == false` the array is detached from the graph that
    /// produced it once evaluated: its value stays readable but gradients no
    /// longer flow through it.
    pub fn item<T: ArrayElement>(&self, retain_graph: bool) -> Result<T> {
        if self.size() != 1 {
            return Err(Exception::shape(format!(
                "item() requires an array of size 1, got shape {:?}",
                self.shape()
            )));
        }
        if self.dtype() != T::DTYPE {
            return Err(Exception::dtype(format!(
                "cannot read {} array as {}",
                self.dtype(),
                T::DTYPE
            )));
        }
        let literal = self.literal()?;
        if !retain_graph {
            self.detach();
        }
        T::slice_of(&literal.data)
            .and_then(|values| values.first().copied())
            .ok_or_else(|| Exception::computation("scalar storage is empty"))
    }

    /// Copies the evaluated elements out in row-major order.
    pub fn to_vec<T: ArrayElement>(&self) -> Result<Vec<T>> {
        if self.dtype() != T::DTYPE {
            return Err(Exception::dtype(format!(
                "cannot read {} array as {}",
                self.dtype(),
                T::DTYPE
            )));
        }
        let literal = self.literal()?;
        T::slice_of(&literal.data)
            .map(|values| values.to_vec())
            .ok_or_else(|| Exception::computation("storage dtype does not match array dtype"))
    }

    /// Evaluated elements converted to `f64`, whatever the dtype.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        Ok(self.literal()?.data.to_f64_values())
    }

    pub(crate) fn value(&self) -> Option<&ArrayLiteral> {
        self.node.value.get()
    }

    pub(crate) fn set_value(&self, literal: ArrayLiteral) {
        let _ = self.node.value.set(literal);
    }

    pub(crate) fn graph(&self) -> std::sync::RwLockReadGuard<'_, Graph> {
        self.node.graph.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn op(&self) -> NodeOp {
        self.graph().op.clone()
    }

    pub(crate) fn inputs(&self) -> Vec<Array> {
        self.graph().inputs.clone()
    }

    pub(crate) fn release_forward(&self) {
        self.node
            .graph
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .forward = None;
    }

    /// Turns an evaluated node into a leaf.
    pub(crate) fn detach(&self) {
        if self.value().is_none() {
            return;
        }
        let mut graph = self.node.graph.write().unwrap_or_else(PoisonError::into_inner);
        graph.op = NodeOp::Leaf;
        graph.inputs.clear();
        graph.forward = None;
    }

    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self.graph().op, NodeOp::Leaf)
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("id", &self.id())
            .field("dtype", &self.dtype())
            .field("shape", &self.shape())
            .field("op", &self.op().name())
            .finish()
    }
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "array(")?;
        match self.value() {
            Some(literal) => write_values(f, &literal.data)?,
            None => write!(f, "<unevaluated>")?,
        }
        write!(f, ", shape={:?}, dtype={})", self.shape(), self.dtype())
    }
}

fn write_values(f: &mut fmt::Formatter<'_>, data: &ArrayData) -> fmt::Result {
    const MAX_SHOWN: usize = 16;
    let rendered: Vec<String> = match data {
        ArrayData::Bool(v) => v.iter().take(MAX_SHOWN).map(|x| x.to_string()).collect(),
        ArrayData::Complex64(v) => v.iter().take(MAX_SHOWN).map(|x| x.to_string()).collect(),
        other => other
            .to_f64_values()
            .into_iter()
            .take(MAX_SHOWN)
            .map(|x| x.to_string())
            .collect(),
    };
    write!(f, "[{}", rendered.join(", "))?;
    if data.len() > MAX_SHOWN {
        write!(f, ", ...")?;
    }
    write!(f, "]")
}
