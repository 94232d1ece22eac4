//! C ABI for nabla.
//!
//! Every value crossing the boundary lives in a process-wide handle table and
//! is referred to by a generational [`ArrayHandle`], [`VectorHandle`] or
//! [`CallableHandle`]. Every export returns a [`NablaStatus`]; the message for
//! a failure is read back with `nabla_last_error_message`.

mod array;
mod bridge;
mod callable;
mod fast;
mod handle;
mod optional;
mod ops;
mod random;
mod status;
mod stream;
mod transforms;

pub use array::*;
pub use bridge::{
    nabla_multi_input_single_output_new, nabla_multiary_new, nabla_pair_input_single_output_new,
    nabla_unary_new, nabla_vjp_new, DestroyCallback, MultiInputSingleOutputCallback,
    MultiaryCallback, PairInputSingleOutputCallback, UnaryCallback, VjpCallback,
};
pub use callable::*;
pub use fast::*;
pub use handle::{ArrayHandle, CallableHandle, KeySequenceHandle, VectorHandle};
pub use ops::*;
pub use optional::*;
pub use random::*;
pub use status::{
    nabla_clear_last_error, nabla_last_error_message, NablaStatus, NABLA_BACKEND,
    NABLA_COMPUTATION, NABLA_DTYPE_MISMATCH, NABLA_INVALID_ARGUMENT, NABLA_OK,
    NABLA_SHAPE_MISMATCH,
};
pub use stream::*;
pub use transforms::*;
