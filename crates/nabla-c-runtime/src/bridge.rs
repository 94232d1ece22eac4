//! Caller callbacks wrapped as native callables.
//!
//! Inputs are lent to the callback through fresh handles that the bridge
//! frees after the call. Outputs written by the callback are taken over by
//! the bridge. A non-zero callback status becomes
//! [`Exception::External`] carrying that same status.

use std::os::raw::c_void;
use std::sync::Arc;

use nabla::transforms::{
    MultiInputSingleOutputFunction, MultiaryFunction, PairInputSingleOutputFunction,
    UnaryFunction, VjpFunction,
};
use nabla::{Array, Exception, Result};

use crate::callable::Callable;
use crate::handle::{emit_new, ArrayHandle, CallableHandle, Handle, Lent, VectorHandle};
use crate::status::{clear_last_error, guard, last_error, NablaStatus, NABLA_OK};

pub type UnaryCallback =
    unsafe extern "C" fn(ctx: *mut c_void, x: ArrayHandle, out: *mut ArrayHandle) -> NablaStatus;
pub type MultiaryCallback =
    unsafe extern "C" fn(ctx: *mut c_void, xs: VectorHandle, out: *mut VectorHandle) -> NablaStatus;
pub type MultiInputSingleOutputCallback =
    unsafe extern "C" fn(ctx: *mut c_void, xs: VectorHandle, out: *mut ArrayHandle) -> NablaStatus;
pub type PairInputSingleOutputCallback = unsafe extern "C" fn(
    ctx: *mut c_void,
    a: ArrayHandle,
    b: ArrayHandle,
    out: *mut ArrayHandle,
) -> NablaStatus;
pub type VjpCallback = unsafe extern "C" fn(
    ctx: *mut c_void,
    primals: VectorHandle,
    cotangents: VectorHandle,
    outputs: VectorHandle,
    out: *mut VectorHandle,
) -> NablaStatus;
/// Releases a callback context once no callable refers to it.
pub type DestroyCallback = unsafe extern "C" fn(ctx: *mut c_void);

/// Caller context pointer plus its optional destructor.
struct Context {
    ptr: *mut c_void,
    destroy: Option<DestroyCallback>,
}

// The caller guarantees the context may be used from whichever thread
// invokes the callable.
unsafe impl Send for Context {}
unsafe impl Sync for Context {}

impl Drop for Context {
    fn drop(&mut self) {
        if let Some(destroy) = self.destroy {
            unsafe { destroy(self.ptr) };
        }
    }
}

fn check_status(status: NablaStatus) -> Result<()> {
    if status == NABLA_OK {
        return Ok(());
    }
    let message = last_error().unwrap_or_else(|| format!("callback returned status {status}"));
    Err(Exception::External {
        code: status,
        message,
    })
}

/// Runs a callback with an out slot and takes ownership of what it wrote.
fn invoke<H: Handle>(call: impl FnOnce(*mut H) -> NablaStatus) -> Result<H::Value> {
    let mut out = H::from_parts(0, 0);
    clear_last_error();
    let status = call(&mut out as *mut H);
    if let Err(err) = check_status(status) {
        // a failing callback yields no partial result
        if out.parts() != (0, 0) {
            let _ = out.take();
        }
        return Err(err);
    }
    out.take()
}

struct CUnary {
    callback: UnaryCallback,
    ctx: Context,
}

impl UnaryFunction for CUnary {
    fn call(&self, x: &Array) -> Result<Array> {
        let x = Lent::<ArrayHandle>::new(x.clone());
        invoke::<ArrayHandle>(|out| unsafe { (self.callback)(self.ctx.ptr, x.0, out) })
    }
}

struct CMultiary {
    callback: MultiaryCallback,
    ctx: Context,
    arity: Option<usize>,
}

impl MultiaryFunction for CMultiary {
    fn call(&self, xs: &[Array]) -> Result<Vec<Array>> {
        let xs = Lent::<VectorHandle>::new(xs.to_vec());
        invoke::<VectorHandle>(|out| unsafe { (self.callback)(self.ctx.ptr, xs.0, out) })
    }

    fn arity(&self) -> Option<usize> {
        self.arity
    }
}

struct CMultiInputSingleOutput {
    callback: MultiInputSingleOutputCallback,
    ctx: Context,
    arity: Option<usize>,
}

impl MultiInputSingleOutputFunction for CMultiInputSingleOutput {
    fn call(&self, xs: &[Array]) -> Result<Array> {
        let xs = Lent::<VectorHandle>::new(xs.to_vec());
        invoke::<ArrayHandle>(|out| unsafe { (self.callback)(self.ctx.ptr, xs.0, out) })
    }

    fn arity(&self) -> Option<usize> {
        self.arity
    }
}

struct CPairInputSingleOutput {
    callback: PairInputSingleOutputCallback,
    ctx: Context,
}

impl PairInputSingleOutputFunction for CPairInputSingleOutput {
    fn call(&self, a: &Array, b: &Array) -> Result<Array> {
        let a = Lent::<ArrayHandle>::new(a.clone());
        let b = Lent::<ArrayHandle>::new(b.clone());
        invoke::<ArrayHandle>(|out| unsafe { (self.callback)(self.ctx.ptr, a.0, b.0, out) })
    }
}

struct CVjp {
    callback: VjpCallback,
    ctx: Context,
}

impl VjpFunction for CVjp {
    fn call(&self, primals: &[Array], cotangents: &[Array], outputs: &[Array]) -> Result<Vec<Array>> {
        let primals = Lent::<VectorHandle>::new(primals.to_vec());
        let cotangents = Lent::<VectorHandle>::new(cotangents.to_vec());
        let outputs = Lent::<VectorHandle>::new(outputs.to_vec());
        invoke::<VectorHandle>(|out| unsafe {
            (self.callback)(self.ctx.ptr, primals.0, cotangents.0, outputs.0, out)
        })
    }
}

/// A negative declared arity means "not declared".
fn declared_arity(arity: i32) -> Option<usize> {
    usize::try_from(arity).ok()
}

/// On a null `out` the dropped `callable` runs the destructor the caller
/// handed over.
fn register(callable: Callable, out: *mut CallableHandle) -> Result<()> {
    unsafe { emit_new(out, callable) }
}

#[no_mangle]
/// Wraps a unary callback. `destroy`, when given, runs on `ctx` once the
/// last callable using it is released.
///
/// # Safety
/// `callback` must be safe to call with `ctx` from any thread, and `out`
/// must be valid for a write.
pub unsafe extern "C" fn nabla_unary_new(
    callback: UnaryCallback,
    ctx: *mut c_void,
    destroy: Option<DestroyCallback>,
    out: *mut CallableHandle,
) -> NablaStatus {
    let ctx = Context { ptr: ctx, destroy };
    guard(move || register(Callable::Unary(Arc::new(CUnary { callback, ctx })), out))
}

#[no_mangle]
/// Wraps a multiary callback. A non-negative `arity` lets argument indices
/// be checked when a transform is built.
///
/// # Safety
/// As for [`nabla_unary_new`].
pub unsafe extern "C" fn nabla_multiary_new(
    callback: MultiaryCallback,
    ctx: *mut c_void,
    destroy: Option<DestroyCallback>,
    arity: i32,
    out: *mut CallableHandle,
) -> NablaStatus {
    let ctx = Context { ptr: ctx, destroy };
    guard(move || {
        register(
            Callable::Multiary(Arc::new(CMultiary {
                callback,
                ctx,
                arity: declared_arity(arity),
            })),
            out,
        )
    })
}

#[no_mangle]
/// # Safety
/// As for [`nabla_unary_new`].
pub unsafe extern "C" fn nabla_multi_input_single_output_new(
    callback: MultiInputSingleOutputCallback,
    ctx: *mut c_void,
    destroy: Option<DestroyCallback>,
    arity: i32,
    out: *mut CallableHandle,
) -> NablaStatus {
    let ctx = Context { ptr: ctx, destroy };
    guard(move || {
        register(
            Callable::MultiInputSingleOutput(Arc::new(CMultiInputSingleOutput {
                callback,
                ctx,
                arity: declared_arity(arity),
            })),
            out,
        )
    })
}

#[no_mangle]
/// # Safety
/// As for [`nabla_unary_new`].
pub unsafe extern "C" fn nabla_pair_input_single_output_new(
    callback: PairInputSingleOutputCallback,
    ctx: *mut c_void,
    destroy: Option<DestroyCallback>,
    out: *mut CallableHandle,
) -> NablaStatus {
    let ctx = Context { ptr: ctx, destroy };
    guard(move || {
        register(
            Callable::PairInputSingleOutput(Arc::new(CPairInputSingleOutput { callback, ctx })),
            out,
        )
    })
}

#[no_mangle]
/// Wraps a vjp rule for [`nabla_custom_vjp`](crate::transforms::nabla_custom_vjp).
///
/// # Safety
/// As for [`nabla_unary_new`].
pub unsafe extern "C" fn nabla_vjp_new(
    callback: VjpCallback,
    ctx: *mut c_void,
    destroy: Option<DestroyCallback>,
    out: *mut CallableHandle,
) -> NablaStatus {
    let ctx = Context { ptr: ctx, destroy };
    guard(move || register(Callable::Vjp(Arc::new(CVjp { callback, ctx })), out))
}
