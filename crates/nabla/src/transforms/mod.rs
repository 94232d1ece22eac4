//! Function transformations: differentiation, vectorization, recomputation
//! and compilation.

mod autodiff;
mod compile;
mod custom;
pub mod function;
mod grad;
mod rules;
mod vmap;

pub use autodiff::{jvp, jvp_unary, vjp, vjp_unary};
pub use compile::{
    compile, compile_mode, disable_compile, enable_compile, set_compile_mode, CompileMode,
};
pub use custom::{checkpoint, custom_vjp, CheckpointRule, CustomVjpRule};
pub use function::{
    MultiInputSingleOutput, MultiInputSingleOutputFunction, Multiary, MultiaryFunction,
    PairInputSingleOutput, PairInputSingleOutputFunction, SimpleValueAndGrad,
    SimpleValueAndGradFunction, SingleInputPairOutput, SingleInputPairOutputFunction, Unary,
    UnaryFunction, ValueAndGrad, ValueAndGradFunction, Vjp, VjpFunction, WithArity,
};
pub use grad::{
    grad, grad_argnum, grad_unary, value_and_grad, value_and_grad_argnum, value_and_grad_simple,
    value_and_grad_unary,
};
pub use vmap::{vmap, vmap_pair, vmap_unary, UNMAPPED};
