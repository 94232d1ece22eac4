//! Transform entry points over callable handles.
//!
//! Every export builds or applies a transform from `nabla::transforms` and
//! hands the result back as a fresh handle. Input callables are borrowed,
//! except for [`nabla_custom_vjp`] and [`nabla_checkpoint`], which consume
//! theirs.

use nabla::transforms::{self, CompileMode};
use nabla::{Exception, Result};

use crate::array::slice_arg;
use crate::callable::{write_pair, Callable};
use crate::handle::{emit_new, ArrayHandle, CallableHandle, Handle, VectorHandle};
use crate::status::{guard, NablaStatus};

fn emit(out: *mut CallableHandle, callable: Callable) -> Result<()> {
    unsafe { emit_new(out, callable) }
}

#[no_mangle]
/// Multiary vector-Jacobian product. Writes the outputs of `f` and one
/// cotangent-weighted gradient per primal.
///
/// # Safety
/// `out_outputs` and `out_vjps` must be valid for writes.
pub unsafe extern "C" fn nabla_vjp(
    f: CallableHandle,
    primals: VectorHandle,
    cotangents: VectorHandle,
    out_outputs: *mut VectorHandle,
    out_vjps: *mut VectorHandle,
) -> NablaStatus {
    guard(|| {
        let f = f.multiary()?;
        let (outputs, vjps) = transforms::vjp(f.as_ref(), &primals.get()?, &cotangents.get()?)?;
        unsafe { write_pair::<VectorHandle, VectorHandle>(out_outputs, outputs, out_vjps, vjps) }
    })
}

#[no_mangle]
/// # Safety
/// `out_outputs` and `out_jvps` must be valid for writes.
pub unsafe extern "C" fn nabla_jvp(
    f: CallableHandle,
    primals: VectorHandle,
    tangents: VectorHandle,
    out_outputs: *mut VectorHandle,
    out_jvps: *mut VectorHandle,
) -> NablaStatus {
    guard(|| {
        let f = f.multiary()?;
        let (outputs, jvps) = transforms::jvp(f.as_ref(), &primals.get()?, &tangents.get()?)?;
        unsafe { write_pair::<VectorHandle, VectorHandle>(out_outputs, outputs, out_jvps, jvps) }
    })
}

#[no_mangle]
/// # Safety
/// `out_output` and `out_vjp` must be valid for writes.
pub unsafe extern "C" fn nabla_vjp_unary(
    f: CallableHandle,
    primal: ArrayHandle,
    cotangent: ArrayHandle,
    out_output: *mut ArrayHandle,
    out_vjp: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let f = f.unary()?;
        let (output, vjp) = transforms::vjp_unary(f.as_ref(), &primal.get()?, &cotangent.get()?)?;
        unsafe { write_pair::<ArrayHandle, ArrayHandle>(out_output, output, out_vjp, vjp) }
    })
}

#[no_mangle]
/// # Safety
/// `out_output` and `out_jvp` must be valid for writes.
pub unsafe extern "C" fn nabla_jvp_unary(
    f: CallableHandle,
    primal: ArrayHandle,
    tangent: ArrayHandle,
    out_output: *mut ArrayHandle,
    out_jvp: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let f = f.unary()?;
        let (output, jvp) = transforms::jvp_unary(f.as_ref(), &primal.get()?, &tangent.get()?)?;
        unsafe { write_pair::<ArrayHandle, ArrayHandle>(out_output, output, out_jvp, jvp) }
    })
}

#[no_mangle]
/// Derivative of a unary callable, itself unary.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_grad_unary(f: CallableHandle, out: *mut CallableHandle) -> NablaStatus {
    guard(|| emit(out, Callable::Unary(transforms::grad_unary(f.unary()?))))
}

#[no_mangle]
/// Gradients of a multi-input/single-output callable with respect to
/// `argnums`, returned as a multiary callable.
///
/// # Safety
/// `argnums` must be readable for `count` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_grad(
    f: CallableHandle,
    argnums: *const i32,
    count: usize,
    out: *mut CallableHandle,
) -> NablaStatus {
    guard(|| {
        let argnums = unsafe { slice_arg(argnums, count)? };
        let grad = transforms::grad(f.multi_input_single_output()?, argnums)?;
        emit(out, Callable::Multiary(grad))
    })
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_grad_argnum(
    f: CallableHandle,
    argnum: i32,
    out: *mut CallableHandle,
) -> NablaStatus {
    guard(|| {
        let grad = transforms::grad_argnum(f.multi_input_single_output()?, argnum)?;
        emit(out, Callable::Multiary(grad))
    })
}

#[no_mangle]
/// # Safety
/// `argnums` must be readable for `count` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_value_and_grad(
    f: CallableHandle,
    argnums: *const i32,
    count: usize,
    out: *mut CallableHandle,
) -> NablaStatus {
    guard(|| {
        let argnums = unsafe { slice_arg(argnums, count)? };
        let value_and_grad = transforms::value_and_grad(f.multiary()?, argnums)?;
        emit(out, Callable::ValueAndGrad(value_and_grad))
    })
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_value_and_grad_argnum(
    f: CallableHandle,
    argnum: i32,
    out: *mut CallableHandle,
) -> NablaStatus {
    guard(|| {
        let value_and_grad = transforms::value_and_grad_argnum(f.multiary()?, argnum)?;
        emit(out, Callable::ValueAndGrad(value_and_grad))
    })
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_value_and_grad_unary(
    f: CallableHandle,
    out: *mut CallableHandle,
) -> NablaStatus {
    guard(|| {
        let value_and_grad = transforms::value_and_grad_unary(f.unary()?);
        emit(out, Callable::SingleInputPairOutput(value_and_grad))
    })
}

#[no_mangle]
/// # Safety
/// `argnums` must be readable for `count` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_value_and_grad_simple(
    f: CallableHandle,
    argnums: *const i32,
    count: usize,
    out: *mut CallableHandle,
) -> NablaStatus {
    guard(|| {
        let argnums = unsafe { slice_arg(argnums, count)? };
        let value_and_grad =
            transforms::value_and_grad_simple(f.multi_input_single_output()?, argnums)?;
        emit(out, Callable::SimpleValueAndGrad(value_and_grad))
    })
}

#[no_mangle]
/// Maps a unary callable over `in_axis`; an `in_axis` of -1 leaves the
/// input unmapped.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_vmap_unary(
    f: CallableHandle,
    in_axis: i32,
    out_axis: i32,
    out: *mut CallableHandle,
) -> NablaStatus {
    guard(|| {
        let mapped = transforms::vmap_unary(f.unary()?, in_axis, out_axis);
        emit(out, Callable::Unary(mapped))
    })
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_vmap_pair(
    f: CallableHandle,
    in_axis_a: i32,
    in_axis_b: i32,
    out_axis: i32,
    out: *mut CallableHandle,
) -> NablaStatus {
    guard(|| {
        let mapped =
            transforms::vmap_pair(f.pair_input_single_output()?, in_axis_a, in_axis_b, out_axis);
        emit(out, Callable::PairInputSingleOutput(mapped))
    })
}

#[no_mangle]
/// Maps a multiary callable. Empty axis lists mean axis 0 everywhere.
///
/// # Safety
/// `in_axes` and `out_axes` must be readable for their counts, and `out`
/// valid for a write.
pub unsafe extern "C" fn nabla_vmap(
    f: CallableHandle,
    in_axes: *const i32,
    in_count: usize,
    out_axes: *const i32,
    out_count: usize,
    out: *mut CallableHandle,
) -> NablaStatus {
    guard(|| {
        let (in_axes, out_axes) =
            unsafe { (slice_arg(in_axes, in_count)?, slice_arg(out_axes, out_count)?) };
        let mapped = transforms::vmap(f.multiary()?, in_axes, out_axes);
        emit(out, Callable::Multiary(mapped))
    })
}

/// Removes `f` from its table and returns it as the expected kind.
fn consume<T>(f: CallableHandle, accessor: fn(Callable) -> Option<T>, expected: &str) -> Result<T> {
    let callable = f.take()?;
    let kind = callable.kind();
    accessor(callable)
        .ok_or_else(|| Exception::invalid(format!("expected a {expected} callable, got {kind:?}")))
}

fn as_multiary(callable: Callable) -> Option<transforms::Multiary> {
    match callable {
        Callable::Multiary(f) => Some(f),
        _ => None,
    }
}

fn as_vjp(callable: Callable) -> Option<transforms::Vjp> {
    match callable {
        Callable::Vjp(f) => Some(f),
        _ => None,
    }
}

#[no_mangle]
/// `fun` with its backward pass replaced by `fun_vjp`.
///
/// Both handles are released by this call, whether or not it succeeds.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_custom_vjp(
    fun: CallableHandle,
    fun_vjp: CallableHandle,
    out: *mut CallableHandle,
) -> NablaStatus {
    guard(|| {
        let fun = consume(fun, as_multiary, "Multiary");
        let fun_vjp = consume(fun_vjp, as_vjp, "Vjp");
        emit(out, Callable::Multiary(transforms::custom_vjp(fun?, fun_vjp?)))
    })
}

#[no_mangle]
/// `fun` recomputed during the backward pass instead of keeping its
/// intermediates. Releases `fun`.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_checkpoint(fun: CallableHandle, out: *mut CallableHandle) -> NablaStatus {
    guard(|| {
        let fun = consume(fun, as_multiary, "Multiary")?;
        emit(out, Callable::Multiary(transforms::checkpoint(fun)))
    })
}

#[no_mangle]
/// Traces `fun` once per input signature and replays the captured graph.
/// With `shapeless`, one trace serves every input shape of the same rank.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_compile(
    fun: CallableHandle,
    shapeless: bool,
    out: *mut CallableHandle,
) -> NablaStatus {
    guard(|| emit(out, Callable::Multiary(transforms::compile(fun.multiary()?, shapeless))))
}

pub const NABLA_COMPILE_DISABLED: u32 = 0;
pub const NABLA_COMPILE_NO_SIMPLIFY: u32 = 1;
pub const NABLA_COMPILE_NO_FUSE: u32 = 2;
pub const NABLA_COMPILE_ENABLED: u32 = 3;

fn compile_mode_from_code(code: u32) -> Result<CompileMode> {
    match code {
        NABLA_COMPILE_DISABLED => Ok(CompileMode::Disabled),
        NABLA_COMPILE_NO_SIMPLIFY => Ok(CompileMode::NoSimplify),
        NABLA_COMPILE_NO_FUSE => Ok(CompileMode::NoFuse),
        NABLA_COMPILE_ENABLED => Ok(CompileMode::Enabled),
        other => Err(Exception::invalid(format!("unknown compile mode {other}"))),
    }
}

#[no_mangle]
pub extern "C" fn nabla_set_compile_mode(mode: u32) -> NablaStatus {
    guard(|| {
        transforms::set_compile_mode(compile_mode_from_code(mode)?);
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn nabla_enable_compile() -> NablaStatus {
    guard(|| {
        transforms::enable_compile();
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn nabla_disable_compile() -> NablaStatus {
    guard(|| {
        transforms::disable_compile();
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_mode_codes_are_checked() {
        assert_eq!(compile_mode_from_code(3).unwrap(), CompileMode::Enabled);
        assert_eq!(compile_mode_from_code(0).unwrap(), CompileMode::Disabled);
        assert!(matches!(
            compile_mode_from_code(9),
            Err(Exception::InvalidArgument(_))
        ));
    }
}
