pub mod registry;
pub mod spec;

pub use spec::{
    ArrayBackend, ArrayData, ArrayLiteral, ArraySpec, BackendError, BackendResult, BinaryOp,
    Primitive, ReduceKind, UnaryOp,
};
