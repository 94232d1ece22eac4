//! Status codes and the per-thread error slot every export reports through.

use std::any::Any;
use std::cell::RefCell;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use nabla::Exception;

/// Return type of every exported function. A status returned by a caller
/// callback is passed through unchanged.
pub type NablaStatus = i32;

pub const NABLA_OK: NablaStatus = 0;
pub const NABLA_SHAPE_MISMATCH: NablaStatus = 1;
pub const NABLA_DTYPE_MISMATCH: NablaStatus = 2;
pub const NABLA_INVALID_ARGUMENT: NablaStatus = 3;
pub const NABLA_COMPUTATION: NablaStatus = 4;
pub const NABLA_BACKEND: NablaStatus = 5;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

pub(crate) fn status_of(err: &Exception) -> NablaStatus {
    match err {
        Exception::ShapeMismatch(_) => NABLA_SHAPE_MISMATCH,
        Exception::DtypeMismatch(_) => NABLA_DTYPE_MISMATCH,
        Exception::InvalidArgument(_) => NABLA_INVALID_ARGUMENT,
        Exception::Computation(_) => NABLA_COMPUTATION,
        Exception::Backend(_) => NABLA_BACKEND,
        Exception::External { code, .. } => *code,
    }
}

fn record(message: String) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

pub(crate) fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

pub(crate) fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

fn report(err: Exception) -> NablaStatus {
    let status = status_of(&err);
    log::debug!("boundary call failed with status {status}: {err}");
    match err {
        // keep the callback's own message, not the wrapper's prefix
        Exception::External { message, .. } => record(message),
        other => record(other.to_string()),
    }
    status
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs the body of an export: makes sure the reference backend is present,
/// converts failures and panics into a status and fills the error slot.
pub(crate) fn guard<F>(body: F) -> NablaStatus
where
    F: FnOnce() -> nabla::Result<()>,
{
    nabla_backend_ref_cpu::install();
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => NABLA_OK,
        Ok(Err(err)) => report(err),
        Err(payload) => report(Exception::computation(format!(
            "panic at the boundary: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

/// Writes `value` through a caller-provided out pointer.
///
/// # Safety
/// `out` must be null or valid for a write of `T`.
pub(crate) unsafe fn write_out<T>(out: *mut T, value: T) -> nabla::Result<()> {
    if out.is_null() {
        return Err(Exception::invalid("output pointer is null"));
    }
    unsafe { out.write(value) };
    Ok(())
}

/// Copies `text` into `buf` (truncated, NUL terminated) and returns its full
/// length in bytes, so callers can size a second attempt.
///
/// # Safety
/// `buf` must be null or valid for `cap` bytes of writes.
pub(crate) unsafe fn copy_text(text: &str, buf: *mut c_char, cap: usize) -> usize {
    let bytes = text.as_bytes();
    if !buf.is_null() && cap > 0 {
        let n = bytes.len().min(cap - 1);
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf.cast::<u8>(), n);
            *buf.add(n) = 0;
        }
    }
    bytes.len()
}

#[no_mangle]
/// Message of the latest failure on the calling thread.
///
/// Returns the message length in bytes, 0 when nothing failed yet.
///
/// # Safety
/// `buf` must be null or valid for `cap` bytes of writes.
pub unsafe extern "C" fn nabla_last_error_message(buf: *mut c_char, cap: usize) -> usize {
    match last_error() {
        Some(message) => unsafe { copy_text(&message, buf, cap) },
        None => unsafe { copy_text("", buf, cap) },
    }
}

#[no_mangle]
pub extern "C" fn nabla_clear_last_error() {
    clear_last_error();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panics_become_computation_failures() {
        let status = guard(|| panic!("boom"));
        assert_eq!(status, NABLA_COMPUTATION);
        assert!(last_error().unwrap_or_default().contains("boom"));
    }

    #[test]
    fn external_codes_pass_through() {
        let status = guard(|| {
            Err(Exception::External {
                code: 77,
                message: "from the callback".into(),
            })
        });
        assert_eq!(status, 77);
        assert_eq!(last_error().as_deref(), Some("from the callback"));
    }

    #[test]
    fn copy_text_truncates_and_terminates() {
        let mut buf = [1 as c_char; 4];
        let len = unsafe { copy_text("hello", buf.as_mut_ptr(), buf.len()) };
        assert_eq!(len, 5);
        assert_eq!(buf[3], 0);
        assert_eq!(buf[0] as u8, b'h');
    }
}
