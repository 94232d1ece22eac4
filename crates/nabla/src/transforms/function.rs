//! Call shapes accepted and produced by the transforms.
//!
//! Each shape is a capability trait with a single `call`. Closures satisfy
//! them through blanket impls; foreign callables implement them directly.

use std::sync::Arc;

use crate::array::Array;
use crate::error::Result;

/// `array -> array`
pub trait UnaryFunction: Send + Sync {
    fn call(&self, x: &Array) -> Result<Array>;
}

/// `[array] -> [array]`
pub trait MultiaryFunction: Send + Sync {
    fn call(&self, xs: &[Array]) -> Result<Vec<Array>>;

    /// Number of positional arguments, when known up front.
    fn arity(&self) -> Option<usize> {
        None
    }
}

/// `[array] -> array`
pub trait MultiInputSingleOutputFunction: Send + Sync {
    fn call(&self, xs: &[Array]) -> Result<Array>;

    fn arity(&self) -> Option<usize> {
        None
    }
}

/// `(array, array) -> array`
pub trait PairInputSingleOutputFunction: Send + Sync {
    fn call(&self, a: &Array, b: &Array) -> Result<Array>;
}

/// `(primals, cotangents, outputs) -> cotangents for the primals`
pub trait VjpFunction: Send + Sync {
    fn call(&self, primals: &[Array], cotangents: &[Array], outputs: &[Array])
        -> Result<Vec<Array>>;
}

/// `array -> (array, array)`, e.g. value and gradient of a unary function.
pub trait SingleInputPairOutputFunction: Send + Sync {
    fn call(&self, x: &Array) -> Result<(Array, Array)>;
}

/// `[array] -> ([values], [gradients])`
pub trait ValueAndGradFunction: Send + Sync {
    fn call(&self, xs: &[Array]) -> Result<(Vec<Array>, Vec<Array>)>;
}

/// `[array] -> (value, [gradients])`
pub trait SimpleValueAndGradFunction: Send + Sync {
    fn call(&self, xs: &[Array]) -> Result<(Array, Vec<Array>)>;
}

pub type Unary = Arc<dyn UnaryFunction>;
pub type Multiary = Arc<dyn MultiaryFunction>;
pub type MultiInputSingleOutput = Arc<dyn MultiInputSingleOutputFunction>;
pub type PairInputSingleOutput = Arc<dyn PairInputSingleOutputFunction>;
pub type Vjp = Arc<dyn VjpFunction>;
pub type SingleInputPairOutput = Arc<dyn SingleInputPairOutputFunction>;
pub type ValueAndGrad = Arc<dyn ValueAndGradFunction>;
pub type SimpleValueAndGrad = Arc<dyn SimpleValueAndGradFunction>;

impl<F> UnaryFunction for F
where
    F: Fn(&Array) -> Result<Array> + Send + Sync,
{
    fn call(&self, x: &Array) -> Result<Array> {
        self(x)
    }
}

impl<F> MultiaryFunction for F
where
    F: Fn(&[Array]) -> Result<Vec<Array>> + Send + Sync,
{
    fn call(&self, xs: &[Array]) -> Result<Vec<Array>> {
        self(xs)
    }
}

impl<F> MultiInputSingleOutputFunction for F
where
    F: Fn(&[Array]) -> Result<Array> + Send + Sync,
{
    fn call(&self, xs: &[Array]) -> Result<Array> {
        self(xs)
    }
}

impl<F> PairInputSingleOutputFunction for F
where
    F: Fn(&Array, &Array) -> Result<Array> + Send + Sync,
{
    fn call(&self, a: &Array, b: &Array) -> Result<Array> {
        self(a, b)
    }
}

impl<F> VjpFunction for F
where
    F: Fn(&[Array], &[Array], &[Array]) -> Result<Vec<Array>> + Send + Sync,
{
    fn call(
        &self,
        primals: &[Array],
        cotangents: &[Array],
        outputs: &[Array],
    ) -> Result<Vec<Array>> {
        self(primals, cotangents, outputs)
    }
}

impl<F> SingleInputPairOutputFunction for F
where
    F: Fn(&Array) -> Result<(Array, Array)> + Send + Sync,
{
    fn call(&self, x: &Array) -> Result<(Array, Array)> {
        self(x)
    }
}

impl<F> ValueAndGradFunction for F
where
    F: Fn(&[Array]) -> Result<(Vec<Array>, Vec<Array>)> + Send + Sync,
{
    fn call(&self, xs: &[Array]) -> Result<(Vec<Array>, Vec<Array>)> {
        self(xs)
    }
}

impl<F> SimpleValueAndGradFunction for F
where
    F: Fn(&[Array]) -> Result<(Array, Vec<Array>)> + Send + Sync,
{
    fn call(&self, xs: &[Array]) -> Result<(Array, Vec<Array>)> {
        self(xs)
    }
}

/// Declares the arity of a multiary closure so argument indices can be
/// checked when a transform is built rather than when it is called.
pub struct WithArity<F> {
    pub arity: usize,
    pub fun: F,
}

impl<F> MultiaryFunction for WithArity<F>
where
    F: Fn(&[Array]) -> Result<Vec<Array>> + Send + Sync,
{
    fn call(&self, xs: &[Array]) -> Result<Vec<Array>> {
        (self.fun)(xs)
    }

    fn arity(&self) -> Option<usize> {
        Some(self.arity)
    }
}

impl<F> MultiInputSingleOutputFunction for WithArity<F>
where
    F: Fn(&[Array]) -> Result<Array> + Send + Sync,
{
    fn call(&self, xs: &[Array]) -> Result<Array> {
        (self.fun)(xs)
    }

    fn arity(&self) -> Option<usize> {
        Some(self.arity)
    }
}

/// Views a unary function as a one-argument multiary one.
pub(crate) struct UnaryAsMultiary(pub Unary);

impl MultiaryFunction for UnaryAsMultiary {
    fn call(&self, xs: &[Array]) -> Result<Vec<Array>> {
        match xs {
            [x] => Ok(vec![self.0.call(x)?]),
            _ => Err(crate::error::Exception::invalid(format!(
                "unary function called with {} arguments",
                xs.len()
            ))),
        }
    }

    fn arity(&self) -> Option<usize> {
        Some(1)
    }
}

/// Views a single-output function as a multiary one.
pub(crate) struct SingleOutputAsMultiary(pub MultiInputSingleOutput);

impl MultiaryFunction for SingleOutputAsMultiary {
    fn call(&self, xs: &[Array]) -> Result<Vec<Array>> {
        Ok(vec![self.0.call(xs)?])
    }

    fn arity(&self) -> Option<usize> {
        self.0.arity()
    }
}
