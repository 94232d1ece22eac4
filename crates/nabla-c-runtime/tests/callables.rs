use std::os::raw::{c_char, c_void};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Result};
use nabla_c_runtime::*;

fn check(status: NablaStatus) -> Result<()> {
    if status != NABLA_OK {
        bail!("status {status}: {}", last_message());
    }
    Ok(())
}

fn last_message() -> String {
    let mut buf = [0 as c_char; 256];
    let len = unsafe { nabla_last_error_message(buf.as_mut_ptr(), buf.len()) };
    let bytes: Vec<u8> = buf[..len.min(255)].iter().map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn scalar(value: f32) -> Result<ArrayHandle> {
    let mut h = ArrayHandle::default();
    check(unsafe { nabla_array_from_float32(value, &mut h) })?;
    Ok(h)
}

fn row(values: &[f32], shape: &[usize]) -> Result<ArrayHandle> {
    let mut h = ArrayHandle::default();
    check(unsafe {
        nabla_array_from_data(
            values.as_ptr().cast::<c_void>(),
            shape.as_ptr(),
            shape.len(),
            11,
            StreamOrDevice::default(),
            &mut h,
        )
    })?;
    Ok(h)
}

fn value(h: ArrayHandle) -> Result<f32> {
    let mut v = 0f32;
    check(unsafe { nabla_array_item_float32(h, true, &mut v) })?;
    Ok(v)
}

fn values(h: ArrayHandle, n: usize) -> Result<Vec<f32>> {
    let mut out = vec![0f32; n];
    let mut len = 0usize;
    check(unsafe { nabla_array_copy_data(h, out.as_mut_ptr().cast::<c_void>(), n * 4, &mut len) })?;
    Ok(out)
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-4, "expected {expected:?}, got {actual:?}");
    }
}

fn vector(items: &[ArrayHandle]) -> Result<VectorHandle> {
    let mut v = VectorHandle::default();
    check(unsafe { nabla_vector_from_arrays(items.as_ptr(), items.len(), &mut v) })?;
    Ok(v)
}

fn element(v: VectorHandle, index: usize) -> Result<ArrayHandle> {
    let mut h = ArrayHandle::default();
    check(unsafe { nabla_vector_get(v, index, &mut h) })?;
    Ok(h)
}

fn counter<'a>(ctx: *mut c_void) -> &'a AtomicUsize {
    unsafe { &*(ctx as *const AtomicUsize) }
}

fn context(counter: &'static AtomicUsize) -> *mut c_void {
    counter as *const AtomicUsize as *mut c_void
}

unsafe extern "C" fn square(_ctx: *mut c_void, x: ArrayHandle, out: *mut ArrayHandle) -> NablaStatus {
    unsafe { nabla_multiply(x, x, out) }
}

unsafe extern "C" fn cube(_ctx: *mut c_void, x: ArrayHandle, out: *mut ArrayHandle) -> NablaStatus {
    let mut x2 = ArrayHandle::default();
    let status = unsafe { nabla_multiply(x, x, &mut x2) };
    if status != NABLA_OK {
        return status;
    }
    let status = unsafe { nabla_multiply(x2, x, out) };
    nabla_array_free(x2);
    status
}

unsafe extern "C" fn row_sum(_ctx: *mut c_void, x: ArrayHandle, out: *mut ArrayHandle) -> NablaStatus {
    unsafe { nabla_sum(x, std::ptr::null(), 0, false, out) }
}

unsafe extern "C" fn failing(_ctx: *mut c_void, _x: ArrayHandle, _out: *mut ArrayHandle) -> NablaStatus {
    42
}

/// `[x0 * x1]`, counting invocations through `ctx`.
unsafe extern "C" fn counted_product(
    ctx: *mut c_void,
    xs: VectorHandle,
    out: *mut VectorHandle,
) -> NablaStatus {
    counter(ctx).fetch_add(1, Ordering::SeqCst);
    let (mut a, mut b, mut y) = (ArrayHandle::default(), ArrayHandle::default(), ArrayHandle::default());
    unsafe {
        nabla_vector_get(xs, 0, &mut a);
        nabla_vector_get(xs, 1, &mut b);
        let status = nabla_multiply(a, b, &mut y);
        nabla_array_free(a);
        nabla_array_free(b);
        if status != NABLA_OK {
            return status;
        }
        let status = nabla_vector_from_arrays(&y, 1, out);
        nabla_array_free(y);
        status
    }
}

/// `sum(x0 * x1)` as a single output.
unsafe extern "C" fn dot(_ctx: *mut c_void, xs: VectorHandle, out: *mut ArrayHandle) -> NablaStatus {
    let (mut a, mut b, mut y) = (ArrayHandle::default(), ArrayHandle::default(), ArrayHandle::default());
    unsafe {
        let status = nabla_vector_get(xs, 0, &mut a);
        if status != NABLA_OK {
            return status;
        }
        let status = nabla_vector_get(xs, 1, &mut b);
        if status != NABLA_OK {
            return status;
        }
        let status = nabla_multiply(a, b, &mut y);
        nabla_array_free(a);
        nabla_array_free(b);
        if status != NABLA_OK {
            return status;
        }
        let status = nabla_sum(y, std::ptr::null(), 0, false, out);
        nabla_array_free(y);
        status
    }
}

/// `[sin(x0)]`.
unsafe extern "C" fn sine(_ctx: *mut c_void, xs: VectorHandle, out: *mut VectorHandle) -> NablaStatus {
    let (mut x, mut y) = (ArrayHandle::default(), ArrayHandle::default());
    unsafe {
        nabla_vector_get(xs, 0, &mut x);
        let status = nabla_sin(x, &mut y);
        nabla_array_free(x);
        if status != NABLA_OK {
            return status;
        }
        let status = nabla_vector_from_arrays(&y, 1, out);
        nabla_array_free(y);
        status
    }
}

/// `[x0^3]`.
unsafe extern "C" fn cube_all(_ctx: *mut c_void, xs: VectorHandle, out: *mut VectorHandle) -> NablaStatus {
    let (mut x, mut y) = (ArrayHandle::default(), ArrayHandle::default());
    unsafe {
        nabla_vector_get(xs, 0, &mut x);
        let status = cube(std::ptr::null_mut(), x, &mut y);
        nabla_array_free(x);
        if status != NABLA_OK {
            return status;
        }
        let status = nabla_vector_from_arrays(&y, 1, out);
        nabla_array_free(y);
        status
    }
}

/// Backward rule returning `cotangent * primal` instead of the true derivative.
unsafe extern "C" fn primal_times_cotangent(
    _ctx: *mut c_void,
    primals: VectorHandle,
    cotangents: VectorHandle,
    _outputs: VectorHandle,
    out: *mut VectorHandle,
) -> NablaStatus {
    let (mut x, mut ct, mut g) = (ArrayHandle::default(), ArrayHandle::default(), ArrayHandle::default());
    unsafe {
        nabla_vector_get(primals, 0, &mut x);
        nabla_vector_get(cotangents, 0, &mut ct);
        let status = nabla_multiply(x, ct, &mut g);
        nabla_array_free(x);
        nabla_array_free(ct);
        if status != NABLA_OK {
            return status;
        }
        let status = nabla_vector_from_arrays(&g, 1, out);
        nabla_array_free(g);
        status
    }
}

unsafe extern "C" fn count_destroy(ctx: *mut c_void) {
    counter(ctx).fetch_add(1, Ordering::SeqCst);
}

fn unary(callback: UnaryCallback) -> Result<CallableHandle> {
    let mut f = CallableHandle::default();
    check(unsafe { nabla_unary_new(callback, std::ptr::null_mut(), None, &mut f) })?;
    Ok(f)
}

fn multiary(callback: MultiaryCallback, ctx: *mut c_void, arity: i32) -> Result<CallableHandle> {
    let mut f = CallableHandle::default();
    check(unsafe { nabla_multiary_new(callback, ctx, None, arity, &mut f) })?;
    Ok(f)
}

fn call_unary(f: CallableHandle, x: ArrayHandle) -> Result<ArrayHandle> {
    let mut y = ArrayHandle::default();
    check(unsafe { nabla_unary_call(f, x, &mut y) })?;
    Ok(y)
}

#[test]
fn unary_callbacks_differentiate_twice() -> Result<()> {
    let f = unary(cube)?;
    let mut df = CallableHandle::default();
    check(unsafe { nabla_grad_unary(f, &mut df) })?;
    let mut ddf = CallableHandle::default();
    check(unsafe { nabla_grad_unary(df, &mut ddf) })?;

    let x = scalar(2.0)?;
    assert!((value(call_unary(df, x)?)? - 12.0).abs() < 1e-4);
    assert!((value(call_unary(ddf, x)?)? - 12.0).abs() < 1e-4);

    let mut kind = CallableKind::Vjp;
    check(unsafe { nabla_callable_kind(ddf, &mut kind) })?;
    assert_eq!(kind, CallableKind::Unary);
    Ok(())
}

#[test]
fn value_and_grad_of_a_unary_callback() -> Result<()> {
    let f = unary(square)?;
    let mut vg = CallableHandle::default();
    check(unsafe { nabla_value_and_grad_unary(f, &mut vg) })?;
    let (mut v, mut g) = (ArrayHandle::default(), ArrayHandle::default());
    check(unsafe { nabla_single_input_pair_output_call(vg, scalar(3.0)?, &mut v, &mut g) })?;
    assert_eq!(value(v)?, 9.0);
    assert!((value(g)? - 6.0).abs() < 1e-5);

    // the result has its own call shape
    let mut y = ArrayHandle::default();
    let status = unsafe { nabla_unary_call(vg, scalar(3.0)?, &mut y) };
    assert_eq!(status, NABLA_INVALID_ARGUMENT);
    Ok(())
}

#[test]
fn vjp_runs_the_callback_and_checks_cotangents() -> Result<()> {
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    let f = multiary(counted_product, context(&CALLS), 2)?;

    let x = row(&[1.0, 2.0, 3.0], &[3])?;
    let y = row(&[4.0, 5.0, 6.0], &[3])?;
    let ones = row(&[1.0, 1.0, 1.0], &[3])?;
    let primals = vector(&[x, y])?;

    let (mut outputs, mut vjps) = (VectorHandle::default(), VectorHandle::default());
    check(unsafe { nabla_vjp(f, primals, vector(&[ones])?, &mut outputs, &mut vjps) })?;
    assert!(CALLS.load(Ordering::SeqCst) >= 1);
    assert_eq!(values(element(outputs, 0)?, 3)?, vec![4.0, 10.0, 18.0]);
    assert_close(&values(element(vjps, 0)?, 3)?, &[4.0, 5.0, 6.0]);
    assert_close(&values(element(vjps, 1)?, 3)?, &[1.0, 2.0, 3.0]);
    check(nabla_vector_free(outputs))?;
    check(nabla_vector_free(vjps))?;

    let status = unsafe { nabla_vjp(f, primals, vector(&[ones, ones])?, &mut outputs, &mut vjps) };
    assert_eq!(status, NABLA_INVALID_ARGUMENT);
    Ok(())
}

#[test]
fn grad_checks_argnums_against_the_declared_arity() -> Result<()> {
    let mut f = CallableHandle::default();
    check(unsafe { nabla_multi_input_single_output_new(dot, std::ptr::null_mut(), None, 2, &mut f) })?;

    let mut g = CallableHandle::default();
    let status = unsafe { nabla_grad(f, [2].as_ptr(), 1, &mut g) };
    assert_eq!(status, NABLA_INVALID_ARGUMENT);
    assert_eq!(g, CallableHandle::default(), "no callable is produced");
    assert_eq!(unsafe { nabla_grad(f, std::ptr::null(), 0, &mut g) }, NABLA_INVALID_ARGUMENT);
    assert_eq!(unsafe { nabla_grad(f, [0, 0].as_ptr(), 2, &mut g) }, NABLA_INVALID_ARGUMENT);

    check(unsafe { nabla_grad(f, [1].as_ptr(), 1, &mut g) })?;
    let a = row(&[1.0, 2.0], &[2])?;
    let b = row(&[3.0, 4.0], &[2])?;
    let mut grads = VectorHandle::default();
    check(unsafe { nabla_multiary_call(g, vector(&[a, b])?, &mut grads) })?;
    let mut len = 0usize;
    check(unsafe { nabla_vector_len(grads, &mut len) })?;
    assert_eq!(len, 1);
    assert_close(&values(element(grads, 0)?, 2)?, &[1.0, 2.0]);

    // a unary callable is not a multi-input one
    let u = unary(square)?;
    assert_eq!(unsafe { nabla_grad_argnum(u, 0, &mut g) }, NABLA_INVALID_ARGUMENT);
    Ok(())
}

#[test]
fn simple_value_and_grad_returns_value_and_gradients() -> Result<()> {
    let mut f = CallableHandle::default();
    check(unsafe { nabla_multi_input_single_output_new(dot, std::ptr::null_mut(), None, -1, &mut f) })?;
    let mut vg = CallableHandle::default();
    check(unsafe { nabla_value_and_grad_simple(f, [0, 1].as_ptr(), 2, &mut vg) })?;

    let a = row(&[1.0, 2.0], &[2])?;
    let b = row(&[3.0, 4.0], &[2])?;
    let (mut v, mut grads) = (ArrayHandle::default(), VectorHandle::default());
    check(unsafe { nabla_simple_value_and_grad_call(vg, vector(&[a, b])?, &mut v, &mut grads) })?;
    assert_eq!(value(v)?, 11.0);
    assert_close(&values(element(grads, 0)?, 2)?, &[3.0, 4.0]);
    assert_close(&values(element(grads, 1)?, 2)?, &[1.0, 2.0]);
    Ok(())
}

#[test]
fn callback_status_passes_through_transforms() -> Result<()> {
    let f = unary(failing)?;
    let x = scalar(1.0)?;

    let mut y = ArrayHandle::default();
    assert_eq!(unsafe { nabla_unary_call(f, x, &mut y) }, 42);
    assert!(last_message().contains("42"), "got {:?}", last_message());

    let mut df = CallableHandle::default();
    check(unsafe { nabla_grad_unary(f, &mut df) })?;
    assert_eq!(unsafe { nabla_unary_call(df, x, &mut y) }, 42);

    let mut mapped = CallableHandle::default();
    check(unsafe { nabla_vmap_unary(f, 0, 0, &mut mapped) })?;
    let xs = row(&[1.0, 2.0], &[2])?;
    assert_eq!(unsafe { nabla_unary_call(mapped, xs, &mut y) }, 42);

    let (mut out, mut vjp) = (ArrayHandle::default(), ArrayHandle::default());
    assert_eq!(unsafe { nabla_vjp_unary(f, x, x, &mut out, &mut vjp) }, 42);
    assert_eq!(y, ArrayHandle::default());
    Ok(())
}

#[test]
fn custom_vjp_uses_the_supplied_rule_and_consumes_its_inputs() -> Result<()> {
    let fun = multiary(sine, std::ptr::null_mut(), 1)?;
    let mut rule = CallableHandle::default();
    check(unsafe { nabla_vjp_new(primal_times_cotangent, std::ptr::null_mut(), None, &mut rule) })?;

    let mut custom = CallableHandle::default();
    check(unsafe { nabla_custom_vjp(fun, rule, &mut custom) })?;
    let mut kind = CallableKind::Unary;
    assert_eq!(unsafe { nabla_callable_kind(fun, &mut kind) }, NABLA_INVALID_ARGUMENT);
    assert_eq!(unsafe { nabla_callable_kind(rule, &mut kind) }, NABLA_INVALID_ARGUMENT);

    let x = row(&[0.5, 2.0], &[2])?;
    let ones = row(&[1.0, 1.0], &[2])?;
    let (mut outputs, mut vjps) = (VectorHandle::default(), VectorHandle::default());
    check(unsafe { nabla_vjp(custom, vector(&[x])?, vector(&[ones])?, &mut outputs, &mut vjps) })?;
    let out = values(element(outputs, 0)?, 2)?;
    assert!((out[0] - 0.5f32.sin()).abs() < 1e-6);
    assert_close(&values(element(vjps, 0)?, 2)?, &[0.5, 2.0]);
    Ok(())
}

#[test]
fn checkpointed_gradients_match_plain_ones() -> Result<()> {
    let plain = multiary(cube_all, std::ptr::null_mut(), 1)?;
    let mut checkpointed = CallableHandle::default();
    check(unsafe { nabla_checkpoint(multiary(cube_all, std::ptr::null_mut(), 1)?, &mut checkpointed) })?;

    let x = row(&[1.0, -2.0, 0.5], &[3])?;
    let ones = row(&[1.0, 1.0, 1.0], &[3])?;
    let grads_of = |f: CallableHandle| -> Result<Vec<f32>> {
        let (mut outputs, mut vjps) = (VectorHandle::default(), VectorHandle::default());
        check(unsafe { nabla_vjp(f, vector(&[x])?, vector(&[ones])?, &mut outputs, &mut vjps) })?;
        values(element(vjps, 0)?, 3)
    };
    let expected = grads_of(plain)?;
    assert_close(&expected, &[3.0, 12.0, 0.75]);
    assert_close(&grads_of(checkpointed)?, &expected);
    Ok(())
}

#[test]
fn vmap_over_a_unary_callback_matches_each_row() -> Result<()> {
    let f = unary(row_sum)?;
    let mut mapped = CallableHandle::default();
    check(unsafe { nabla_vmap_unary(f, 0, 0, &mut mapped) })?;

    let x = row(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3])?;
    let y = call_unary(mapped, x)?;
    assert_eq!(values(y, 2)?, vec![6.0, 15.0]);

    let mut by_column = CallableHandle::default();
    check(unsafe { nabla_vmap_unary(f, 1, 0, &mut by_column) })?;
    assert_eq!(values(call_unary(by_column, x)?, 3)?, vec![5.0, 7.0, 9.0]);
    Ok(())
}

#[test]
fn compiled_callbacks_trace_once_per_signature() -> Result<()> {
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    let f = multiary(counted_product, context(&CALLS), 2)?;
    let mut compiled = CallableHandle::default();
    check(unsafe { nabla_compile(f, false, &mut compiled) })?;

    let run = |a: &[f32], b: &[f32]| -> Result<Vec<f32>> {
        let inputs = vector(&[row(a, &[2])?, row(b, &[2])?])?;
        let mut out = VectorHandle::default();
        check(unsafe { nabla_multiary_call(compiled, inputs, &mut out) })?;
        values(element(out, 0)?, 2)
    };
    assert_eq!(run(&[1.0, 2.0], &[3.0, 4.0])?, vec![3.0, 8.0]);
    assert_eq!(run(&[5.0, 6.0], &[7.0, 8.0])?, vec![35.0, 48.0]);
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn context_is_destroyed_after_the_last_dependent_is_released() -> Result<()> {
    static DESTROYED: AtomicUsize = AtomicUsize::new(0);
    let mut f = CallableHandle::default();
    check(unsafe { nabla_unary_new(square, context(&DESTROYED), Some(count_destroy), &mut f) })?;
    let mut df = CallableHandle::default();
    check(unsafe { nabla_grad_unary(f, &mut df) })?;

    check(nabla_callable_free(f))?;
    assert_eq!(DESTROYED.load(Ordering::SeqCst), 0, "the gradient still uses the callback");
    assert!((value(call_unary(df, scalar(4.0)?)?)? - 8.0).abs() < 1e-5);

    check(nabla_callable_free(df))?;
    assert_eq!(DESTROYED.load(Ordering::SeqCst), 1);
    assert_eq!(nabla_callable_free(df), NABLA_INVALID_ARGUMENT);
    Ok(())
}
