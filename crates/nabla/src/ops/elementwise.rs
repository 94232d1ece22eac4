use crate::array::{Array, NodeOp};
use crate::backend::{ArraySpec, BinaryOp, Primitive, UnaryOp};
use crate::dtype::{promote_types, DType};
use crate::error::{Exception, Result};
use crate::shape::broadcast_shapes;

use super::shape::broadcast_to;

fn unary(a: &Array, op: UnaryOp, dtype: DType) -> Array {
    Array::from_primitive(
        Primitive::Unary(op),
        ArraySpec::new(dtype, a.shape().to_vec()),
        a.stream(),
        vec![a.clone()],
    )
}

/// Transcendental ops compute in floating point; integer inputs become `float32`.
fn floating_unary(a: &Array, op: UnaryOp, allow_complex: bool) -> Result<Array> {
    if a.dtype().is_complex() && !allow_complex {
        return Err(Exception::invalid(format!(
            "{op:?} is not defined for complex arrays"
        )));
    }
    let a = if a.dtype().is_inexact() {
        a.clone()
    } else {
        astype(a, DType::Float32)?
    };
    Ok(unary(&a, op, a.dtype()))
}

pub fn astype(a: &Array, dtype: DType) -> Result<Array> {
    if a.dtype() == dtype {
        return Ok(a.clone());
    }
    Ok(Array::from_primitive(
        Primitive::AsType,
        ArraySpec::new(dtype, a.shape().to_vec()),
        a.stream(),
        vec![a.clone()],
    ))
}

/// Identity in value; blocks gradients from flowing into `a`.
pub fn stop_gradient(a: &Array) -> Array {
    Array::from_op(
        NodeOp::StopGradient,
        a.spec().clone(),
        a.stream(),
        vec![a.clone()],
        None,
    )
}

pub fn negative(a: &Array) -> Result<Array> {
    if a.dtype().is_bool() {
        return Err(Exception::invalid("cannot negate a boolean array"));
    }
    Ok(unary(a, UnaryOp::Neg, a.dtype()))
}

/// Absolute value; complex inputs yield their magnitude as `float32`.
pub fn abs(a: &Array) -> Result<Array> {
    let dtype = if a.dtype().is_complex() {
        DType::Float32
    } else {
        a.dtype()
    };
    Ok(unary(a, UnaryOp::Abs, dtype))
}

pub fn sign(a: &Array) -> Result<Array> {
    Ok(unary(a, UnaryOp::Sign, a.dtype()))
}

pub fn exp(a: &Array) -> Result<Array> {
    floating_unary(a, UnaryOp::Exp, true)
}

pub fn log(a: &Array) -> Result<Array> {
    floating_unary(a, UnaryOp::Log, true)
}

pub fn sin(a: &Array) -> Result<Array> {
    floating_unary(a, UnaryOp::Sin, true)
}

pub fn cos(a: &Array) -> Result<Array> {
    floating_unary(a, UnaryOp::Cos, true)
}

pub fn tanh(a: &Array) -> Result<Array> {
    floating_unary(a, UnaryOp::Tanh, true)
}

pub fn sqrt(a: &Array) -> Result<Array> {
    floating_unary(a, UnaryOp::Sqrt, true)
}

pub fn rsqrt(a: &Array) -> Result<Array> {
    floating_unary(a, UnaryOp::Rsqrt, true)
}

pub fn reciprocal(a: &Array) -> Result<Array> {
    floating_unary(a, UnaryOp::Reciprocal, true)
}

pub fn sigmoid(a: &Array) -> Result<Array> {
    floating_unary(a, UnaryOp::Sigmoid, false)
}

pub fn erf(a: &Array) -> Result<Array> {
    floating_unary(a, UnaryOp::Erf, false)
}

pub fn erfinv(a: &Array) -> Result<Array> {
    floating_unary(a, UnaryOp::ErfInv, false)
}

pub fn floor(a: &Array) -> Result<Array> {
    if a.dtype().is_complex() {
        return Err(Exception::invalid("floor is not defined for complex arrays"));
    }
    if !a.dtype().is_float() {
        return Ok(a.clone());
    }
    Ok(unary(a, UnaryOp::Floor, a.dtype()))
}

pub fn logical_not(a: &Array) -> Result<Array> {
    let a = astype(a, DType::Bool)?;
    Ok(unary(&a, UnaryOp::LogicalNot, DType::Bool))
}

pub fn square(a: &Array) -> Result<Array> {
    multiply(a, a)
}

fn binary(a: &Array, b: &Array, op: BinaryOp) -> Result<Array> {
    let shape = broadcast_shapes(a.shape(), b.shape())?;
    let mut dtype = promote_types(a.dtype(), b.dtype());
    match op {
        BinaryOp::Divide if !dtype.is_inexact() => dtype = DType::Float32,
        BinaryOp::LogicalAnd | BinaryOp::LogicalOr => dtype = DType::Bool,
        BinaryOp::Maximum
        | BinaryOp::Minimum
        | BinaryOp::Less
        | BinaryOp::LessEqual
        | BinaryOp::Greater
        | BinaryOp::GreaterEqual
            if dtype.is_complex() =>
        {
            return Err(Exception::invalid(format!(
                "{op:?} is not defined for complex arrays"
            )))
        }
        _ => {}
    }
    let lhs = broadcast_to(&astype(a, dtype)?, &shape)?;
    let rhs = broadcast_to(&astype(b, dtype)?, &shape)?;
    let out_dtype = if op.yields_bool() { DType::Bool } else { dtype };
    Ok(Array::from_primitive(
        Primitive::Binary(op),
        ArraySpec::new(out_dtype, shape),
        a.stream(),
        vec![lhs, rhs],
    ))
}

pub fn add(a: &Array, b: &Array) -> Result<Array> {
    binary(a, b, BinaryOp::Add)
}

pub fn subtract(a: &Array, b: &Array) -> Result<Array> {
    binary(a, b, BinaryOp::Subtract)
}

pub fn multiply(a: &Array, b: &Array) -> Result<Array> {
    binary(a, b, BinaryOp::Multiply)
}

/// True division; integer operands produce `float32`.
pub fn divide(a: &Array, b: &Array) -> Result<Array> {
    binary(a, b, BinaryOp::Divide)
}

pub fn maximum(a: &Array, b: &Array) -> Result<Array> {
    binary(a, b, BinaryOp::Maximum)
}

pub fn minimum(a: &Array, b: &Array) -> Result<Array> {
    binary(a, b, BinaryOp::Minimum)
}

pub fn power(a: &Array, b: &Array) -> Result<Array> {
    binary(a, b, BinaryOp::Power)
}

pub fn equal(a: &Array, b: &Array) -> Result<Array> {
    binary(a, b, BinaryOp::Equal)
}

pub fn not_equal(a: &Array, b: &Array) -> Result<Array> {
    binary(a, b, BinaryOp::NotEqual)
}

pub fn less(a: &Array, b: &Array) -> Result<Array> {
    binary(a, b, BinaryOp::Less)
}

pub fn less_equal(a: &Array, b: &Array) -> Result<Array> {
    binary(a, b, BinaryOp::LessEqual)
}

pub fn greater(a: &Array, b: &Array) -> Result<Array> {
    binary(a, b, BinaryOp::Greater)
}

pub fn greater_equal(a: &Array, b: &Array) -> Result<Array> {
    binary(a, b, BinaryOp::GreaterEqual)
}

pub fn logical_and(a: &Array, b: &Array) -> Result<Array> {
    binary(a, b, BinaryOp::LogicalAnd)
}

pub fn logical_or(a: &Array, b: &Array) -> Result<Array> {
    binary(a, b, BinaryOp::LogicalOr)
}

/// Picks from `x` where `condition` holds and from `y` elsewhere.
pub fn where_(condition: &Array, x: &Array, y: &Array) -> Result<Array> {
    let shape = broadcast_shapes(&broadcast_shapes(condition.shape(), x.shape())?, y.shape())?;
    let dtype = promote_types(x.dtype(), y.dtype());
    let condition = broadcast_to(&astype(condition, DType::Bool)?, &shape)?;
    let x = broadcast_to(&astype(x, dtype)?, &shape)?;
    let y = broadcast_to(&astype(y, dtype)?, &shape)?;
    let stream = x.stream();
    Ok(Array::from_primitive(
        Primitive::Select,
        ArraySpec::new(dtype, shape),
        stream,
        vec![condition, x, y],
    ))
}

/// Limits `a` to `[low, high]` elementwise.
pub fn clip(a: &Array, low: &Array, high: &Array) -> Result<Array> {
    minimum(&maximum(a, low)?, high)
}
