//! Contract between the lazy graph and the kernels that execute it.

use std::sync::Arc;

use half::{bf16, f16};
use num_complex::{Complex32, Complex64};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DeviceType;
use crate::dtype::DType;
use crate::error::{Exception, Result as NablaResult};
use crate::shape::{checked_element_count, element_count, Axes};

/// Dtype and shape of an array, without its data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArraySpec {
    pub dtype: DType,
    pub shape: Vec<usize>,
}

impl ArraySpec {
    pub fn new(dtype: DType, shape: impl Into<Vec<usize>>) -> Self {
        Self {
            dtype,
            shape: shape.into(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn size(&self) -> usize {
        element_count(&self.shape)
    }

    pub fn nbytes(&self) -> usize {
        self.size().saturating_mul(self.dtype.size_in_bytes())
    }

    /// Byte size of the data, rejecting shapes whose size overflows or
    /// exceeds the largest possible allocation.
    pub fn checked_nbytes(&self) -> NablaResult<usize> {
        checked_element_count(&self.shape)?
            .checked_mul(self.dtype.size_in_bytes())
            .filter(|&bytes| bytes <= isize::MAX as usize)
            .ok_or_else(|| {
                Exception::invalid(format!(
                    "{} array of shape {:?} is too large",
                    self.dtype, self.shape
                ))
            })
    }

    /// A spec whose byte size fits in memory.
    pub fn checked(dtype: DType, shape: impl Into<Vec<usize>>) -> NablaResult<Self> {
        let spec = Self::new(dtype, shape);
        spec.checked_nbytes()?;
        Ok(spec)
    }
}

/// Host storage, one variant per element type.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Arc<[bool]>),
    Uint8(Arc<[u8]>),
    Uint16(Arc<[u16]>),
    Uint32(Arc<[u32]>),
    Uint64(Arc<[u64]>),
    Int8(Arc<[i8]>),
    Int16(Arc<[i16]>),
    Int32(Arc<[i32]>),
    Int64(Arc<[i64]>),
    Float16(Arc<[f16]>),
    Bfloat16(Arc<[bf16]>),
    Float32(Arc<[f32]>),
    Complex64(Arc<[Complex32]>),
}

/// Applies `$body` to the slice inside any variant and rewraps the result in
/// the same variant.
macro_rules! map_data {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            ArrayData::Bool($values) => ArrayData::Bool($body),
            ArrayData::Uint8($values) => ArrayData::Uint8($body),
            ArrayData::Uint16($values) => ArrayData::Uint16($body),
            ArrayData::Uint32($values) => ArrayData::Uint32($body),
            ArrayData::Uint64($values) => ArrayData::Uint64($body),
            ArrayData::Int8($values) => ArrayData::Int8($body),
            ArrayData::Int16($values) => ArrayData::Int16($body),
            ArrayData::Int32($values) => ArrayData::Int32($body),
            ArrayData::Int64($values) => ArrayData::Int64($body),
            ArrayData::Float16($values) => ArrayData::Float16($body),
            ArrayData::Bfloat16($values) => ArrayData::Bfloat16($body),
            ArrayData::Float32($values) => ArrayData::Float32($body),
            ArrayData::Complex64($values) => ArrayData::Complex64($body),
        }
    };
}

macro_rules! visit_data {
    ($data:expr, $values:ident => $body:expr) => {
        match $data {
            ArrayData::Bool($values) => $body,
            ArrayData::Uint8($values) => $body,
            ArrayData::Uint16($values) => $body,
            ArrayData::Uint32($values) => $body,
            ArrayData::Uint64($values) => $body,
            ArrayData::Int8($values) => $body,
            ArrayData::Int16($values) => $body,
            ArrayData::Int32($values) => $body,
            ArrayData::Int64($values) => $body,
            ArrayData::Float16($values) => $body,
            ArrayData::Bfloat16($values) => $body,
            ArrayData::Float32($values) => $body,
            ArrayData::Complex64($values) => $body,
        }
    };
}

impl ArrayData {
    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::Bool(_) => DType::Bool,
            ArrayData::Uint8(_) => DType::Uint8,
            ArrayData::Uint16(_) => DType::Uint16,
            ArrayData::Uint32(_) => DType::Uint32,
            ArrayData::Uint64(_) => DType::Uint64,
            ArrayData::Int8(_) => DType::Int8,
            ArrayData::Int16(_) => DType::Int16,
            ArrayData::Int32(_) => DType::Int32,
            ArrayData::Int64(_) => DType::Int64,
            ArrayData::Float16(_) => DType::Float16,
            ArrayData::Bfloat16(_) => DType::Bfloat16,
            ArrayData::Float32(_) => DType::Float32,
            ArrayData::Complex64(_) => DType::Complex64,
        }
    }

    pub fn len(&self) -> usize {
        visit_data!(self, values => values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Builds storage of `dtype` from real values. Integer targets truncate
    /// and saturate, bool is `value != 0`.
    pub fn from_f64_values(dtype: DType, values: &[f64]) -> ArrayData {
        let it = values.iter().copied();
        match dtype {
            DType::Bool => ArrayData::Bool(it.map(|v| v != 0.0).collect()),
            DType::Uint8 => ArrayData::Uint8(it.map(|v| v as u8).collect()),
            DType::Uint16 => ArrayData::Uint16(it.map(|v| v as u16).collect()),
            DType::Uint32 => ArrayData::Uint32(it.map(|v| v as u32).collect()),
            DType::Uint64 => ArrayData::Uint64(it.map(|v| v as u64).collect()),
            DType::Int8 => ArrayData::Int8(it.map(|v| v as i8).collect()),
            DType::Int16 => ArrayData::Int16(it.map(|v| v as i16).collect()),
            DType::Int32 => ArrayData::Int32(it.map(|v| v as i32).collect()),
            DType::Int64 => ArrayData::Int64(it.map(|v| v as i64).collect()),
            DType::Float16 => ArrayData::Float16(it.map(f16::from_f64).collect()),
            DType::Bfloat16 => ArrayData::Bfloat16(it.map(bf16::from_f64).collect()),
            DType::Float32 => ArrayData::Float32(it.map(|v| v as f32).collect()),
            DType::Complex64 => {
                ArrayData::Complex64(it.map(|v| Complex32::new(v as f32, 0.0)).collect())
            }
        }
    }

    /// Real view of the data. Complex values keep their real part.
    pub fn to_f64_values(&self) -> Vec<f64> {
        match self {
            ArrayData::Bool(v) => v.iter().map(|&x| if x { 1.0 } else { 0.0 }).collect(),
            ArrayData::Uint8(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Uint16(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Uint32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Uint64(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Int8(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Int16(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Int32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Int64(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Float16(v) => v.iter().map(|x| x.to_f64()).collect(),
            ArrayData::Bfloat16(v) => v.iter().map(|x| x.to_f64()).collect(),
            ArrayData::Float32(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::Complex64(v) => v.iter().map(|x| x.re as f64).collect(),
        }
    }

    pub fn from_complex_values(dtype: DType, values: &[Complex64]) -> ArrayData {
        match dtype {
            DType::Complex64 => ArrayData::Complex64(
                values
                    .iter()
                    .map(|v| Complex32::new(v.re as f32, v.im as f32))
                    .collect(),
            ),
            other => {
                let real: Vec<f64> = values.iter().map(|v| v.re).collect();
                ArrayData::from_f64_values(other, &real)
            }
        }
    }

    pub fn to_complex_values(&self) -> Vec<Complex64> {
        match self {
            ArrayData::Complex64(v) => v
                .iter()
                .map(|x| Complex64::new(x.re as f64, x.im as f64))
                .collect(),
            other => other
                .to_f64_values()
                .into_iter()
                .map(|re| Complex64::new(re, 0.0))
                .collect(),
        }
    }

    /// Picks elements by flat index, keeping the element type.
    pub fn gather(&self, indices: &[usize]) -> ArrayData {
        map_data!(self, values => indices.iter().map(|&i| values[i]).collect())
    }

    /// Like [`ArrayData::gather`], writing zero where the index is `None`.
    pub fn gather_or_zero(&self, indices: &[Option<usize>]) -> ArrayData {
        map_data!(self, values => indices
            .iter()
            .map(|i| match i {
                Some(i) => values[*i],
                None => Default::default(),
            })
            .collect())
    }

    /// Flat concatenation of same-typed buffers. Returns `None` on a dtype mix.
    pub fn concat(parts: &[&ArrayData]) -> Option<ArrayData> {
        macro_rules! join {
            ($variant:ident) => {{
                let mut out = Vec::new();
                for part in parts {
                    match part {
                        ArrayData::$variant(values) => out.extend_from_slice(values),
                        _ => return None,
                    }
                }
                ArrayData::$variant(out.into())
            }};
        }
        Some(match parts.first()? {
            ArrayData::Bool(_) => join!(Bool),
            ArrayData::Uint8(_) => join!(Uint8),
            ArrayData::Uint16(_) => join!(Uint16),
            ArrayData::Uint32(_) => join!(Uint32),
            ArrayData::Uint64(_) => join!(Uint64),
            ArrayData::Int8(_) => join!(Int8),
            ArrayData::Int16(_) => join!(Int16),
            ArrayData::Int32(_) => join!(Int32),
            ArrayData::Int64(_) => join!(Int64),
            ArrayData::Float16(_) => join!(Float16),
            ArrayData::Bfloat16(_) => join!(Bfloat16),
            ArrayData::Float32(_) => join!(Float32),
            ArrayData::Complex64(_) => join!(Complex64),
        })
    }
}

/// A fully materialized array.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayLiteral {
    pub spec: ArraySpec,
    pub data: ArrayData,
}

impl ArrayLiteral {
    pub fn new(spec: ArraySpec, data: ArrayData) -> BackendResult<Self> {
        if spec.dtype != data.dtype() {
            return Err(BackendError::execution(format!(
                "literal dtype {} does not match data dtype {}",
                spec.dtype,
                data.dtype()
            )));
        }
        if spec.size() != data.len() {
            return Err(BackendError::execution(format!(
                "literal shape {:?} holds {} elements, data has {}",
                spec.shape,
                spec.size(),
                data.len()
            )));
        }
        Ok(Self { spec, data })
    }

    pub fn scalar_f64(dtype: DType, value: f64) -> Self {
        Self {
            spec: ArraySpec::new(dtype, Vec::new()),
            data: ArrayData::from_f64_values(dtype, &[value]),
        }
    }

    pub fn zeros(spec: &ArraySpec) -> Self {
        Self {
            spec: spec.clone(),
            data: ArrayData::from_f64_values(spec.dtype, &vec![0.0; spec.size()]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sign,
    Exp,
    Log,
    Sin,
    Cos,
    Tanh,
    Sqrt,
    Rsqrt,
    Reciprocal,
    Sigmoid,
    Erf,
    ErfInv,
    Floor,
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Minimum,
    Power,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    /// Comparison and logical ops produce `bool` regardless of operand dtype.
    pub fn yields_bool(self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::Less
                | BinaryOp::LessEqual
                | BinaryOp::Greater
                | BinaryOp::GreaterEqual
                | BinaryOp::LogicalAnd
                | BinaryOp::LogicalOr
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceKind {
    Sum,
    Max,
    Min,
}

/// Operations a backend must execute. Output dtype and shape travel in the
/// accompanying [`ArraySpec`]; only what the spec cannot carry lives here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Primitive {
    Unary(UnaryOp),
    /// Operands already share dtype and shape.
    Binary(BinaryOp),
    /// `(condition, on_true, on_false)`, all of the output shape.
    Select,
    AsType,
    /// Input has the output rank; size-1 axes are repeated.
    Broadcast,
    Reshape,
    Transpose { perm: Vec<usize> },
    /// Reduced axes are kept with size 1.
    Reduce { kind: ReduceKind, axes: Axes },
    /// Index of the maximum along `axis`, kept with size 1, as `uint32`.
    ArgMax { axis: usize },
    /// `[..., m, k] x [..., k, n]` with identical batch axes.
    Matmul,
    /// Contiguous window starting at `starts`; sizes come from the output shape.
    Slice { starts: Vec<usize> },
    /// Zero padding with `low` leading elements per axis.
    Pad { low: Vec<usize> },
    Concatenate { axis: usize },
    /// Threefry-2x32 keyed bits, `width` bytes per element.
    RandomBits { width: usize },
}

impl Primitive {
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Unary(_) => "unary",
            Primitive::Binary(_) => "binary",
            Primitive::Select => "select",
            Primitive::AsType => "astype",
            Primitive::Broadcast => "broadcast",
            Primitive::Reshape => "reshape",
            Primitive::Transpose { .. } => "transpose",
            Primitive::Reduce { .. } => "reduce",
            Primitive::ArgMax { .. } => "argmax",
            Primitive::Matmul => "matmul",
            Primitive::Slice { .. } => "slice",
            Primitive::Pad { .. } => "pad",
            Primitive::Concatenate { .. } => "concatenate",
            Primitive::RandomBits { .. } => "random_bits",
        }
    }
}

/// Backend error surfaced to higher layers.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{op} is not implemented: {reason}")]
    Unimplemented { op: &'static str, reason: String },
    #[error("backend execution failure: {message}")]
    Execution { message: String },
    #[error("no backend registered for device {device}")]
    Unavailable { device: DeviceType },
}

impl BackendError {
    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;

/// Kernel provider for one device type.
pub trait ArrayBackend: Send + Sync {
    /// Human-readable identifier, e.g. `"cpu-reference"`.
    fn backend_name(&self) -> &str;

    /// Runs `primitive` over materialized inputs, producing a literal matching `output`.
    fn execute(
        &self,
        primitive: &Primitive,
        inputs: &[ArrayLiteral],
        output: &ArraySpec,
    ) -> BackendResult<ArrayLiteral>;
}
