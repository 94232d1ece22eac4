//! Array operations forwarded one-to-one to `nabla::ops`.

use nabla::{ops, Exception};

use crate::array::{emit_array, shape_arg, slice_arg};
use crate::handle::{ArrayHandle, Handle, VectorHandle};
use crate::status::{guard, NablaStatus};
use crate::stream::{dtype_from_code, StreamOrDevice};

macro_rules! unary_exports {
    ($($name:ident => $op:path;)*) => {
        $(
            #[no_mangle]
            /// # Safety
            /// `out` must be valid for a write.
            pub unsafe extern "C" fn $name(a: ArrayHandle, out: *mut ArrayHandle) -> NablaStatus {
                guard(|| emit_array(out, $op(&a.get()?)?))
            }
        )*
    };
}

macro_rules! binary_exports {
    ($($name:ident => $op:path;)*) => {
        $(
            #[no_mangle]
            /// # Safety
            /// `out` must be valid for a write.
            pub unsafe extern "C" fn $name(
                a: ArrayHandle,
                b: ArrayHandle,
                out: *mut ArrayHandle,
            ) -> NablaStatus {
                guard(|| emit_array(out, $op(&a.get()?, &b.get()?)?))
            }
        )*
    };
}

macro_rules! reduce_exports {
    ($($name:ident => $op:path;)*) => {
        $(
            #[no_mangle]
            /// Reduces over `axes` (all axes when `naxes` is 0).
            ///
            /// # Safety
            /// `axes` must be readable for `naxes` elements and `out` valid for a write.
            pub unsafe extern "C" fn $name(
                a: ArrayHandle,
                axes: *const i32,
                naxes: usize,
                keepdims: bool,
                out: *mut ArrayHandle,
            ) -> NablaStatus {
                guard(|| {
                    let axes = unsafe { slice_arg(axes, naxes)? };
                    emit_array(out, $op(&a.get()?, axes, keepdims)?)
                })
            }
        )*
    };
}

unary_exports! {
    nabla_negative => ops::negative;
    nabla_abs => ops::abs;
    nabla_sign => ops::sign;
    nabla_exp => ops::exp;
    nabla_log => ops::log;
    nabla_sin => ops::sin;
    nabla_cos => ops::cos;
    nabla_tanh => ops::tanh;
    nabla_sqrt => ops::sqrt;
    nabla_rsqrt => ops::rsqrt;
    nabla_square => ops::square;
    nabla_reciprocal => ops::reciprocal;
    nabla_sigmoid => ops::sigmoid;
    nabla_erf => ops::erf;
    nabla_erfinv => ops::erfinv;
    nabla_floor => ops::floor;
    nabla_logical_not => ops::logical_not;
}

binary_exports! {
    nabla_add => ops::add;
    nabla_subtract => ops::subtract;
    nabla_multiply => ops::multiply;
    nabla_divide => ops::divide;
    nabla_maximum => ops::maximum;
    nabla_minimum => ops::minimum;
    nabla_power => ops::power;
    nabla_equal => ops::equal;
    nabla_not_equal => ops::not_equal;
    nabla_less => ops::less;
    nabla_less_equal => ops::less_equal;
    nabla_greater => ops::greater;
    nabla_greater_equal => ops::greater_equal;
    nabla_logical_and => ops::logical_and;
    nabla_logical_or => ops::logical_or;
    nabla_matmul => ops::matmul;
}

reduce_exports! {
    nabla_sum => ops::sum;
    nabla_mean => ops::mean;
    nabla_max => ops::max;
    nabla_min => ops::min;
    nabla_logsumexp => ops::logsumexp;
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_stop_gradient(a: ArrayHandle, out: *mut ArrayHandle) -> NablaStatus {
    guard(|| emit_array(out, ops::stop_gradient(&a.get()?)))
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_astype(a: ArrayHandle, dtype: u32, out: *mut ArrayHandle) -> NablaStatus {
    guard(|| emit_array(out, ops::astype(&a.get()?, dtype_from_code(dtype)?)?))
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_where(
    condition: ArrayHandle,
    x: ArrayHandle,
    y: ArrayHandle,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| emit_array(out, ops::where_(&condition.get()?, &x.get()?, &y.get()?)?))
}

#[no_mangle]
/// # Safety
/// `shape` must be readable for `ndim` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_full(
    shape: *const usize,
    ndim: usize,
    value: f64,
    dtype: u32,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let shape = unsafe { shape_arg(shape, ndim)? };
        emit_array(out, ops::full(&shape, value, dtype_from_code(dtype)?, &s.to_native()?))
    })
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_arange(
    start: f64,
    stop: f64,
    step: f64,
    dtype: u32,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| emit_array(out, ops::arange(start, stop, step, dtype_from_code(dtype)?, &s.to_native()?)?))
}

#[no_mangle]
/// # Safety
/// `shape` must be readable for `ndim` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_reshape(
    a: ArrayHandle,
    shape: *const usize,
    ndim: usize,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| emit_array(out, ops::reshape(&a.get()?, &unsafe { shape_arg(shape, ndim)? })?))
}

#[no_mangle]
/// # Safety
/// `shape` must be readable for `ndim` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_broadcast_to(
    a: ArrayHandle,
    shape: *const usize,
    ndim: usize,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| emit_array(out, ops::broadcast_to(&a.get()?, &unsafe { shape_arg(shape, ndim)? })?))
}

#[no_mangle]
/// Permutes axes; `naxes == 0` reverses them.
///
/// # Safety
/// `axes` must be readable for `naxes` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_transpose(
    a: ArrayHandle,
    axes: *const i32,
    naxes: usize,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let a = a.get()?;
        let result = if naxes == 0 {
            ops::transpose_all(&a)?
        } else {
            ops::transpose(&a, unsafe { slice_arg(axes, naxes)? })?
        };
        emit_array(out, result)
    })
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_swapaxes(
    a: ArrayHandle,
    axis1: i32,
    axis2: i32,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| emit_array(out, ops::swapaxes(&a.get()?, axis1, axis2)?))
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_expand_dims(a: ArrayHandle, axis: i32, out: *mut ArrayHandle) -> NablaStatus {
    guard(|| emit_array(out, ops::expand_dims(&a.get()?, axis)?))
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_squeeze(a: ArrayHandle, axis: i32, out: *mut ArrayHandle) -> NablaStatus {
    guard(|| emit_array(out, ops::squeeze(&a.get()?, axis)?))
}

#[no_mangle]
/// Window `[start, stop)` along `axis`.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_slice_axis(
    a: ArrayHandle,
    axis: i32,
    start: usize,
    stop: usize,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| emit_array(out, ops::slice_axis(&a.get()?, axis, start, stop)?))
}

#[no_mangle]
/// Element `index` along `axis`, with the axis removed.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_index_axis(
    a: ArrayHandle,
    axis: i32,
    index: usize,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| emit_array(out, ops::index_axis(&a.get()?, axis, index)?))
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_concatenate(xs: VectorHandle, axis: i32, out: *mut ArrayHandle) -> NablaStatus {
    guard(|| emit_array(out, ops::concatenate(&xs.get()?, axis)?))
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_stack(xs: VectorHandle, axis: i32, out: *mut ArrayHandle) -> NablaStatus {
    guard(|| emit_array(out, ops::stack(&xs.get()?, axis)?))
}

#[no_mangle]
/// # Safety
/// `axes` must be readable for `naxes` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_softmax(
    a: ArrayHandle,
    axes: *const i32,
    naxes: usize,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| emit_array(out, ops::softmax(&a.get()?, unsafe { slice_arg(axes, naxes)? })?))
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_argmax(
    a: ArrayHandle,
    axis: i32,
    keepdims: bool,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| emit_array(out, ops::argmax(&a.get()?, axis, keepdims)?))
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_clip(
    a: ArrayHandle,
    low: ArrayHandle,
    high: ArrayHandle,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| emit_array(out, ops::clip(&a.get()?, &low.get()?, &high.get()?)?))
}

#[no_mangle]
/// Zero padding with `low[i]` leading and `high[i]` trailing elements on axis `i`.
///
/// # Safety
/// `low` and `high` must be readable for `ndim` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_pad(
    a: ArrayHandle,
    low: *const usize,
    high: *const usize,
    ndim: usize,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let a = a.get()?;
        if ndim != a.ndim() {
            return Err(Exception::invalid(format!(
                "padding covers {ndim} axes, array has {}",
                a.ndim()
            )));
        }
        let (low, high) = unsafe { (slice_arg(low, ndim)?, slice_arg(high, ndim)?) };
        emit_array(out, ops::pad(&a, low, high)?)
    })
}
