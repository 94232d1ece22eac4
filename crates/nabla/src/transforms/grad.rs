use std::sync::Arc;

use super::autodiff::vjp_with;
use super::function::{
    MultiInputSingleOutput, Multiary, MultiaryFunction, SimpleValueAndGrad,
    SimpleValueAndGradFunction, SingleInputPairOutput, SingleInputPairOutputFunction,
    SingleOutputAsMultiary, Unary, UnaryAsMultiary, UnaryFunction, ValueAndGrad,
    ValueAndGradFunction,
};
use crate::array::Array;
use crate::error::{Exception, Result};
use crate::ops;

/// Checks `argnums` against the callable's declared arity, when it has one.
fn validate_argnums(argnums: &[i32], arity: Option<usize>) -> Result<Vec<usize>> {
    if argnums.is_empty() {
        return Err(Exception::invalid("argnums must select at least one argument"));
    }
    let mut out: Vec<usize> = Vec::with_capacity(argnums.len());
    for &argnum in argnums {
        let index = usize::try_from(argnum)
            .map_err(|_| Exception::invalid(format!("argnum {argnum} is negative")))?;
        if out.contains(&index) {
            return Err(Exception::invalid(format!("argnum {argnum} is repeated")));
        }
        if let Some(arity) = arity {
            if index >= arity {
                return Err(Exception::invalid(format!(
                    "argnum {argnum} is out of range for a function of {arity} arguments"
                )));
            }
        }
        out.push(index);
    }
    Ok(out)
}

/// Differentiates the first output of `fun` with respect to `argnums`.
struct ValueAndGradImpl {
    fun: Multiary,
    argnums: Vec<usize>,
}

impl ValueAndGradImpl {
    fn new(fun: Multiary, argnums: &[i32]) -> Result<Self> {
        let argnums = validate_argnums(argnums, fun.arity())?;
        log::debug!("building value_and_grad over argnums {argnums:?}");
        Ok(Self { fun, argnums })
    }

    fn run(&self, args: &[Array]) -> Result<(Vec<Array>, Vec<Array>)> {
        if let Some(&bad) = self.argnums.iter().find(|&&i| i >= args.len()) {
            return Err(Exception::invalid(format!(
                "argnum {bad} is out of range for a call with {} arguments",
                args.len()
            )));
        }
        let selected: Vec<Array> = self.argnums.iter().map(|&i| args[i].clone()).collect();
        let partial = |xs: &[Array]| -> Result<Vec<Array>> {
            let mut full = args.to_vec();
            for (&slot, x) in self.argnums.iter().zip(xs) {
                full[slot] = x.clone();
            }
            self.fun.call(&full)
        };
        vjp_with(&partial, &selected, |outputs| {
            let first = outputs.first().ok_or_else(|| {
                Exception::invalid("differentiated function returned no outputs")
            })?;
            if first.size() != 1 {
                return Err(Exception::invalid(format!(
                    "gradient requires a scalar output, got shape {:?}",
                    first.shape()
                )));
            }
            Ok(outputs
                .iter()
                .enumerate()
                .map(|(i, o)| {
                    if i == 0 {
                        ops::ones_like(o)
                    } else {
                        ops::zeros_like(o)
                    }
                })
                .collect())
        })
    }
}

impl ValueAndGradFunction for ValueAndGradImpl {
    fn call(&self, xs: &[Array]) -> Result<(Vec<Array>, Vec<Array>)> {
        self.run(xs)
    }
}

impl SimpleValueAndGradFunction for ValueAndGradImpl {
    fn call(&self, xs: &[Array]) -> Result<(Array, Vec<Array>)> {
        let (values, grads) = self.run(xs)?;
        let value = values
            .into_iter()
            .next()
            .ok_or_else(|| Exception::computation("value_and_grad produced no value"))?;
        Ok((value, grads))
    }
}

impl SingleInputPairOutputFunction for ValueAndGradImpl {
    fn call(&self, x: &Array) -> Result<(Array, Array)> {
        let (values, grads) = self.run(std::slice::from_ref(x))?;
        match (values.into_iter().next(), grads.into_iter().next()) {
            (Some(value), Some(grad)) => Ok((value, grad)),
            _ => Err(Exception::computation("value_and_grad produced no value")),
        }
    }
}

struct GradImpl(ValueAndGradImpl);

impl MultiaryFunction for GradImpl {
    fn call(&self, xs: &[Array]) -> Result<Vec<Array>> {
        Ok(self.0.run(xs)?.1)
    }

    fn arity(&self) -> Option<usize> {
        self.0.fun.arity()
    }
}

impl UnaryFunction for GradImpl {
    fn call(&self, x: &Array) -> Result<Array> {
        self.0
            .run(std::slice::from_ref(x))?
            .1
            .into_iter()
            .next()
            .ok_or_else(|| Exception::computation("grad produced no gradient"))
    }
}

/// Values of `fun` and gradients of its first (scalar) output.
pub fn value_and_grad(fun: Multiary, argnums: &[i32]) -> Result<ValueAndGrad> {
    Ok(Arc::new(ValueAndGradImpl::new(fun, argnums)?))
}

pub fn value_and_grad_argnum(fun: Multiary, argnum: i32) -> Result<ValueAndGrad> {
    value_and_grad(fun, &[argnum])
}

/// Value and derivative of a unary function.
pub fn value_and_grad_unary(fun: Unary) -> SingleInputPairOutput {
    Arc::new(ValueAndGradImpl {
        fun: Arc::new(UnaryAsMultiary(fun)),
        argnums: vec![0],
    })
}

/// Value and gradients of a single-output function.
pub fn value_and_grad_simple(
    fun: MultiInputSingleOutput,
    argnums: &[i32],
) -> Result<SimpleValueAndGrad> {
    Ok(Arc::new(ValueAndGradImpl::new(
        Arc::new(SingleOutputAsMultiary(fun)),
        argnums,
    )?))
}

/// Gradients of a single-output function with respect to `argnums`.
///
/// Fails with `InvalidArgument` when `argnums` is empty, repeats an index,
/// or names an argument beyond the function's declared arity.
pub fn grad(fun: MultiInputSingleOutput, argnums: &[i32]) -> Result<Multiary> {
    Ok(Arc::new(GradImpl(ValueAndGradImpl::new(
        Arc::new(SingleOutputAsMultiary(fun)),
        argnums,
    )?)))
}

pub fn grad_argnum(fun: MultiInputSingleOutput, argnum: i32) -> Result<Multiary> {
    grad(fun, &[argnum])
}

/// Derivative of a unary function.
pub fn grad_unary(fun: Unary) -> Unary {
    Arc::new(GradImpl(ValueAndGradImpl {
        fun: Arc::new(UnaryAsMultiary(fun)),
        argnums: vec![0],
    }))
}

#[cfg(test)]
mod tests {
    use super::validate_argnums;
    use crate::error::Exception;

    #[test]
    fn argnums_are_checked_against_declared_arity() {
        assert_eq!(validate_argnums(&[1, 0], Some(2)).unwrap(), vec![1, 0]);
        assert!(matches!(
            validate_argnums(&[2], Some(2)),
            Err(Exception::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_argnums(&[-1], None),
            Err(Exception::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_argnums(&[0, 0], None),
            Err(Exception::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_argnums(&[], None),
            Err(Exception::InvalidArgument(_))
        ));
    }
}
