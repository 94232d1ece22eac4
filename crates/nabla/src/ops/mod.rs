//! Array operations. Every builder validates its arguments eagerly and records
//! a graph node; values are produced at evaluation time.

mod creation;
mod elementwise;
mod linalg;
mod reduce;
mod shape;

pub use creation::{arange, full, full_like, ones, ones_like, scalar_like, zeros, zeros_like};
pub use elementwise::{
    abs, add, astype, clip, cos, divide, equal, erf, erfinv, exp, floor, greater, greater_equal,
    less, less_equal, log, logical_and, logical_not, logical_or, maximum, minimum, multiply,
    negative, not_equal, power, reciprocal, rsqrt, sigmoid, sign, sin, sqrt, square,
    stop_gradient, subtract, tanh, where_,
};
pub use linalg::matmul;
pub use reduce::{argmax, logsumexp, max, mean, min, softmax, sum};
pub use shape::{
    broadcast_to, concatenate, expand_dims, index_axis, pad, reshape, slice, slice_axis, squeeze,
    stack, swapaxes, transpose, transpose_all,
};
