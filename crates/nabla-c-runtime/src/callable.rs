//! Callables held behind [`CallableHandle`]s and the exports that invoke them.

use std::os::raw::c_int;

use nabla::transforms::{
    Multiary, MultiInputSingleOutput, PairInputSingleOutput, SimpleValueAndGrad,
    SingleInputPairOutput, Unary, ValueAndGrad, Vjp,
};
use nabla::{Exception, Result};

use crate::handle::{emit_new, ArrayHandle, CallableHandle, Handle, VectorHandle};
use crate::status::{guard, write_out, NablaStatus};

/// Call shape of a callable, as reported to the caller.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableKind {
    Unary = 0,
    Multiary = 1,
    MultiInputSingleOutput = 2,
    PairInputSingleOutput = 3,
    Vjp = 4,
    SingleInputPairOutput = 5,
    ValueAndGrad = 6,
    SimpleValueAndGrad = 7,
}

/// Every call shape the transforms accept or produce. Each keeps its own
/// variant; a callable is only ever used as the shape it was created with.
#[derive(Clone)]
pub enum Callable {
    Unary(Unary),
    Multiary(Multiary),
    MultiInputSingleOutput(MultiInputSingleOutput),
    PairInputSingleOutput(PairInputSingleOutput),
    Vjp(Vjp),
    SingleInputPairOutput(SingleInputPairOutput),
    ValueAndGrad(ValueAndGrad),
    SimpleValueAndGrad(SimpleValueAndGrad),
}

impl Callable {
    pub fn kind(&self) -> CallableKind {
        match self {
            Callable::Unary(_) => CallableKind::Unary,
            Callable::Multiary(_) => CallableKind::Multiary,
            Callable::MultiInputSingleOutput(_) => CallableKind::MultiInputSingleOutput,
            Callable::PairInputSingleOutput(_) => CallableKind::PairInputSingleOutput,
            Callable::Vjp(_) => CallableKind::Vjp,
            Callable::SingleInputPairOutput(_) => CallableKind::SingleInputPairOutput,
            Callable::ValueAndGrad(_) => CallableKind::ValueAndGrad,
            Callable::SimpleValueAndGrad(_) => CallableKind::SimpleValueAndGrad,
        }
    }

    fn mismatch(&self, expected: CallableKind) -> Exception {
        Exception::invalid(format!(
            "expected a {expected:?} callable, got {:?}",
            self.kind()
        ))
    }
}

macro_rules! callable_accessors {
    ($($fn_name:ident => $variant:ident: $ty:ty),* $(,)?) => {
        impl CallableHandle {
            $(
                pub(crate) fn $fn_name(self) -> Result<$ty> {
                    match self.get()? {
                        Callable::$variant(f) => Ok(f),
                        other => Err(other.mismatch(CallableKind::$variant)),
                    }
                }
            )*
        }
    };
}

callable_accessors! {
    unary => Unary: Unary,
    multiary => Multiary: Multiary,
    multi_input_single_output => MultiInputSingleOutput: MultiInputSingleOutput,
    pair_input_single_output => PairInputSingleOutput: PairInputSingleOutput,
    vjp => Vjp: Vjp,
    single_input_pair_output => SingleInputPairOutput: SingleInputPairOutput,
    value_and_grad => ValueAndGrad: ValueAndGrad,
    simple_value_and_grad => SimpleValueAndGrad: SimpleValueAndGrad,
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_callable_kind(f: CallableHandle, out: *mut CallableKind) -> NablaStatus {
    guard(|| unsafe { write_out(out, f.get()?.kind()) })
}

#[no_mangle]
/// Releases the handle. The wrapped callable lives on inside any callable
/// composed from it.
pub extern "C" fn nabla_callable_free(f: CallableHandle) -> NablaStatus {
    guard(|| f.take().map(drop))
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_unary_call(
    f: CallableHandle,
    x: ArrayHandle,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let y = f.unary()?.call(&x.get()?)?;
        unsafe { emit_new(out, y) }
    })
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_multiary_call(
    f: CallableHandle,
    xs: VectorHandle,
    out: *mut VectorHandle,
) -> NablaStatus {
    guard(|| {
        let ys = f.multiary()?.call(&xs.get()?)?;
        unsafe { emit_new(out, ys) }
    })
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_multi_input_single_output_call(
    f: CallableHandle,
    xs: VectorHandle,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let y = f.multi_input_single_output()?.call(&xs.get()?)?;
        unsafe { emit_new(out, y) }
    })
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_pair_input_single_output_call(
    f: CallableHandle,
    a: ArrayHandle,
    b: ArrayHandle,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let y = f.pair_input_single_output()?.call(&a.get()?, &b.get()?)?;
        unsafe { emit_new(out, y) }
    })
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_vjp_function_call(
    f: CallableHandle,
    primals: VectorHandle,
    cotangents: VectorHandle,
    outputs: VectorHandle,
    out: *mut VectorHandle,
) -> NablaStatus {
    guard(|| {
        let grads = f
            .vjp()?
            .call(&primals.get()?, &cotangents.get()?, &outputs.get()?)?;
        unsafe { emit_new(out, grads) }
    })
}

/// Writes two fresh handles, or neither when an out pointer is null.
///
/// # Safety
/// Non-null pointers must be valid for writes.
pub(crate) unsafe fn write_pair<A: Handle, B: Handle>(
    out_a: *mut A,
    a: A::Value,
    out_b: *mut B,
    b: B::Value,
) -> Result<()> {
    if out_a.is_null() || out_b.is_null() {
        return Err(Exception::invalid("output pointer is null"));
    }
    unsafe {
        out_a.write(A::insert(a));
        out_b.write(B::insert(b));
    }
    Ok(())
}

#[no_mangle]
/// # Safety
/// `out_value` and `out_grad` must be valid for writes.
pub unsafe extern "C" fn nabla_single_input_pair_output_call(
    f: CallableHandle,
    x: ArrayHandle,
    out_value: *mut ArrayHandle,
    out_grad: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let (value, grad) = f.single_input_pair_output()?.call(&x.get()?)?;
        unsafe { write_pair::<ArrayHandle, ArrayHandle>(out_value, value, out_grad, grad) }
    })
}

#[no_mangle]
/// # Safety
/// `out_values` and `out_grads` must be valid for writes.
pub unsafe extern "C" fn nabla_value_and_grad_call(
    f: CallableHandle,
    xs: VectorHandle,
    out_values: *mut VectorHandle,
    out_grads: *mut VectorHandle,
) -> NablaStatus {
    guard(|| {
        let (values, grads) = f.value_and_grad()?.call(&xs.get()?)?;
        unsafe { write_pair::<VectorHandle, VectorHandle>(out_values, values, out_grads, grads) }
    })
}

#[no_mangle]
/// # Safety
/// `out_value` and `out_grads` must be valid for writes.
pub unsafe extern "C" fn nabla_simple_value_and_grad_call(
    f: CallableHandle,
    xs: VectorHandle,
    out_value: *mut ArrayHandle,
    out_grads: *mut VectorHandle,
) -> NablaStatus {
    guard(|| {
        let (value, grads) = f.simple_value_and_grad()?.call(&xs.get()?)?;
        unsafe { write_pair::<ArrayHandle, VectorHandle>(out_value, value, out_grads, grads) }
    })
}

#[no_mangle]
/// Live entries per handle table, for leak checks.
///
/// # Safety
/// Each pointer must be null or valid for a write.
pub unsafe extern "C" fn nabla_live_handles(
    arrays: *mut usize,
    vectors: *mut usize,
    callables: *mut usize,
) -> c_int {
    let (a, v, c) = crate::handle::live_counts();
    for (out, count) in [(arrays, a), (vectors, v), (callables, c)] {
        if !out.is_null() {
            unsafe { out.write(count) };
        }
    }
    0
}
