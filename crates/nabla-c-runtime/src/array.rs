//! Array construction, inspection and release, plus the array vector API.

use std::os::raw::{c_char, c_void};

use half::{bf16, f16};
use nabla::backend::{ArrayData, ArrayLiteral, ArraySpec};
use nabla::shape::checked_element_count;
use nabla::{Array, ArrayElement, DType, Exception, Result};
use num_complex::Complex32;

use crate::handle::{emit_new, ArrayHandle, Handle, VectorHandle};
use crate::status::{copy_text, guard, write_out, NablaStatus};
use crate::stream::{dtype_code, dtype_from_code, StreamOrDevice};

/// Reads a `(pointer, length)` shape argument.
///
/// # Safety
/// `shape` must be null or valid for `ndim` reads.
pub(crate) unsafe fn shape_arg(shape: *const usize, ndim: usize) -> Result<Vec<usize>> {
    if ndim == 0 {
        return Ok(Vec::new());
    }
    if shape.is_null() {
        return Err(Exception::invalid("shape pointer is null"));
    }
    let dims = unsafe { std::slice::from_raw_parts(shape, ndim) }.to_vec();
    checked_element_count(&dims)?;
    Ok(dims)
}

/// Like [`shape_arg`], but a null pointer means "no explicit shape".
///
/// # Safety
/// `shape` must be null or valid for `ndim` reads.
pub(crate) unsafe fn optional_shape_arg(shape: *const usize, ndim: usize) -> Result<Option<Vec<usize>>> {
    if shape.is_null() {
        return Ok(None);
    }
    unsafe { shape_arg(shape, ndim) }.map(Some)
}

/// # Safety
/// `values` must be null or valid for `count` reads.
pub(crate) unsafe fn slice_arg<'a, T>(values: *const T, count: usize) -> Result<&'a [T]> {
    if count == 0 {
        return Ok(&[]);
    }
    if values.is_null() {
        return Err(Exception::invalid("argument pointer is null"));
    }
    Ok(unsafe { std::slice::from_raw_parts(values, count) })
}

/// Hands `array` to the caller through `out`.
pub(crate) fn emit_array(out: *mut ArrayHandle, array: Array) -> Result<()> {
    unsafe { emit_new(out, array) }
}

/// Copies `count` possibly unaligned elements of `T` out of `bytes`.
unsafe fn read_elements<T: ArrayElement>(bytes: *const u8, count: usize) -> ArrayData {
    let ptr = bytes.cast::<T>();
    let values = (0..count)
        .map(|i| unsafe { ptr.add(i).read_unaligned() })
        .collect();
    T::into_data(values)
}

unsafe fn data_from_bytes(dtype: DType, bytes: *const u8, count: usize) -> ArrayData {
    unsafe {
        match dtype {
            // any non-zero byte is true; never reinterpret a byte as `bool`
            DType::Bool => ArrayData::Bool(
                (0..count).map(|i| bytes.add(i).read() != 0).collect(),
            ),
            DType::Uint8 => read_elements::<u8>(bytes, count),
            DType::Uint16 => read_elements::<u16>(bytes, count),
            DType::Uint32 => read_elements::<u32>(bytes, count),
            DType::Uint64 => read_elements::<u64>(bytes, count),
            DType::Int8 => read_elements::<i8>(bytes, count),
            DType::Int16 => read_elements::<i16>(bytes, count),
            DType::Int32 => read_elements::<i32>(bytes, count),
            DType::Int64 => read_elements::<i64>(bytes, count),
            DType::Float16 => read_elements::<f16>(bytes, count),
            DType::Bfloat16 => read_elements::<bf16>(bytes, count),
            DType::Float32 => read_elements::<f32>(bytes, count),
            DType::Complex64 => read_elements::<Complex32>(bytes, count),
        }
    }
}

fn as_bytes<T>(values: &[T]) -> &[u8] {
    // element types are plain old data without padding
    unsafe { std::slice::from_raw_parts(values.as_ptr().cast::<u8>(), std::mem::size_of_val(values)) }
}

fn data_bytes(data: &ArrayData) -> Vec<u8> {
    match data {
        ArrayData::Bool(v) => v.iter().map(|&b| u8::from(b)).collect(),
        ArrayData::Uint8(v) => v.to_vec(),
        ArrayData::Uint16(v) => as_bytes(&v[..]).to_vec(),
        ArrayData::Uint32(v) => as_bytes(&v[..]).to_vec(),
        ArrayData::Uint64(v) => as_bytes(&v[..]).to_vec(),
        ArrayData::Int8(v) => as_bytes(&v[..]).to_vec(),
        ArrayData::Int16(v) => as_bytes(&v[..]).to_vec(),
        ArrayData::Int32(v) => as_bytes(&v[..]).to_vec(),
        ArrayData::Int64(v) => as_bytes(&v[..]).to_vec(),
        ArrayData::Float16(v) => as_bytes(&v[..]).to_vec(),
        ArrayData::Bfloat16(v) => as_bytes(&v[..]).to_vec(),
        ArrayData::Float32(v) => as_bytes(&v[..]).to_vec(),
        ArrayData::Complex64(v) => as_bytes(&v[..]).to_vec(),
    }
}

#[no_mangle]
/// Builds an array by copying `prod(shape)` elements of `dtype` from `data`.
/// Booleans are read one byte each.
///
/// # Safety
/// `data` must be readable for the implied byte count, `shape` for `ndim`
/// elements and `out` must be valid for a write.
pub unsafe extern "C" fn nabla_array_from_data(
    data: *const c_void,
    shape: *const usize,
    ndim: usize,
    dtype: u32,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let dtype = dtype_from_code(dtype)?;
        let shape = unsafe { shape_arg(shape, ndim)? };
        let spec = ArraySpec::checked(dtype, shape)?;
        let count = spec.size();
        if count > 0 && data.is_null() {
            return Err(Exception::invalid("data pointer is null"));
        }
        let data = unsafe { data_from_bytes(dtype, data.cast::<u8>(), count) };
        let literal = ArrayLiteral::new(spec, data)?;
        let array = Array::from_literal_on(literal, &s.to_native()?);
        unsafe { emit_new(out, array) }
    })
}

#[no_mangle]
/// Evaluates the array and copies its elements, row-major, into `buf`.
/// `out_len` receives the byte count of the full array even when `cap` is
/// too small, in which case nothing is copied and InvalidArgument is
/// returned.
///
/// # Safety
/// `buf` must be writable for `cap` bytes and `out_len` valid for a write.
pub unsafe extern "C" fn nabla_array_copy_data(
    h: ArrayHandle,
    buf: *mut c_void,
    cap: usize,
    out_len: *mut usize,
) -> NablaStatus {
    guard(|| {
        let literal = h.get()?.literal()?;
        let bytes = data_bytes(&literal.data);
        unsafe { write_out(out_len, bytes.len())? };
        if bytes.len() > cap || (buf.is_null() && !bytes.is_empty()) {
            return Err(Exception::invalid(format!(
                "buffer of {cap} bytes cannot hold {} bytes",
                bytes.len()
            )));
        }
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf.cast::<u8>(), bytes.len()) };
        Ok(())
    })
}

macro_rules! array_metadata {
    ($($name:ident: $ty:ty => |$a:ident| $value:expr;)*) => {
        $(
            #[no_mangle]
            /// # Safety
            /// `out` must be valid for a write.
            pub unsafe extern "C" fn $name(h: ArrayHandle, out: *mut $ty) -> NablaStatus {
                guard(|| {
                    let $a = h.get()?;
                    unsafe { write_out(out, $value) }
                })
            }
        )*
    };
}

array_metadata! {
    nabla_array_ndim: usize => |a| a.ndim();
    nabla_array_size: usize => |a| a.size();
    nabla_array_nbytes: usize => |a| a.nbytes();
    nabla_array_itemsize: usize => |a| a.dtype().size_in_bytes();
    nabla_array_dtype: u32 => |a| dtype_code(a.dtype());
    nabla_array_is_evaluated: bool => |a| a.is_evaluated();
}

#[no_mangle]
/// Writes up to `cap` dimensions into `out`; `out_ndim` receives the rank.
///
/// # Safety
/// `out` must be writable for `cap` elements and `out_ndim` valid for a write.
pub unsafe extern "C" fn nabla_array_shape(
    h: ArrayHandle,
    out: *mut usize,
    cap: usize,
    out_ndim: *mut usize,
) -> NablaStatus {
    guard(|| {
        let array = h.get()?;
        let shape = array.shape();
        unsafe { write_out(out_ndim, shape.len())? };
        let n = shape.len().min(cap);
        if n > 0 {
            if out.is_null() {
                return Err(Exception::invalid("shape output pointer is null"));
            }
            unsafe { std::ptr::copy_nonoverlapping(shape.as_ptr(), out, n) };
        }
        Ok(())
    })
}

#[no_mangle]
/// Metadata as JSON, e.g. `{"dtype":"float32","shape":[2,3],"device":"cpu:0"}`.
/// Copies into `buf` like [`nabla_last_error_message`](crate::status::nabla_last_error_message)
/// and writes the full length to `out_len`.
///
/// # Safety
/// `buf` must be writable for `cap` bytes and `out_len` valid for a write.
pub unsafe extern "C" fn nabla_array_spec_json(
    h: ArrayHandle,
    buf: *mut c_char,
    cap: usize,
    out_len: *mut usize,
) -> NablaStatus {
    guard(|| {
        let array = h.get()?;
        let mut value = serde_json::to_value(array.spec())
            .map_err(|err| Exception::computation(format!("cannot serialize array spec: {err}")))?;
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "device".to_string(),
                serde_json::Value::String(array.stream().device.to_string()),
            );
        }
        let text = value.to_string();
        unsafe { write_out(out_len, copy_text(&text, buf, cap)) }
    })
}

#[no_mangle]
/// Evaluates the array and renders it as text.
///
/// # Safety
/// `buf` must be writable for `cap` bytes and `out_len` valid for a write.
pub unsafe extern "C" fn nabla_array_tostring(
    h: ArrayHandle,
    buf: *mut c_char,
    cap: usize,
    out_len: *mut usize,
) -> NablaStatus {
    guard(|| {
        let array = h.get()?;
        array.eval()?;
        let text = array.to_string();
        unsafe { write_out(out_len, copy_text(&text, buf, cap)) }
    })
}

#[no_mangle]
pub extern "C" fn nabla_array_eval(h: ArrayHandle) -> NablaStatus {
    guard(|| h.get()?.eval())
}

#[no_mangle]
/// Evaluates several arrays in one pass, sharing common subgraphs.
///
/// # Safety
/// `handles` must be readable for `count` elements.
pub unsafe extern "C" fn nabla_array_eval_many(handles: *const ArrayHandle, count: usize) -> NablaStatus {
    guard(|| {
        let arrays = unsafe { slice_arg(handles, count)? }
            .iter()
            .map(|h| h.get())
            .collect::<Result<Vec<_>>>()?;
        nabla::eval(&arrays)
    })
}

#[no_mangle]
/// Releases the handle. Later use of it fails with InvalidArgument.
pub extern "C" fn nabla_array_free(h: ArrayHandle) -> NablaStatus {
    guard(|| h.take().map(drop))
}

#[no_mangle]
/// A second, independently owned handle to the same array value.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_array_clone(h: ArrayHandle, out: *mut ArrayHandle) -> NablaStatus {
    guard(|| unsafe { emit_new(out, h.get()?) })
}

/// One scalar constructor and one scalar extractor per element type.
macro_rules! scalar_fan_out {
    ($($from:ident, $item:ident: $ty:ty;)*) => {
        $(
            #[no_mangle]
            /// # Safety
            /// `out` must be valid for a write.
            pub unsafe extern "C" fn $from(value: $ty, out: *mut ArrayHandle) -> NablaStatus {
                guard(|| unsafe { emit_new(out, Array::scalar(value)) })
            }

            #[no_mangle]
            /// Reads the single element. With `retain_graph` false the array
            /// is detached from its graph after evaluation.
            ///
            /// # Safety
            /// `out` must be valid for a write.
            pub unsafe extern "C" fn $item(h: ArrayHandle, retain_graph: bool, out: *mut $ty) -> NablaStatus {
                guard(|| {
                    let value = h.get()?.item::<$ty>(retain_graph)?;
                    unsafe { write_out(out, value) }
                })
            }
        )*
    };
}

scalar_fan_out! {
    nabla_array_from_bool, nabla_array_item_bool: bool;
    nabla_array_from_uint8, nabla_array_item_uint8: u8;
    nabla_array_from_uint16, nabla_array_item_uint16: u16;
    nabla_array_from_uint32, nabla_array_item_uint32: u32;
    nabla_array_from_uint64, nabla_array_item_uint64: u64;
    nabla_array_from_int8, nabla_array_item_int8: i8;
    nabla_array_from_int16, nabla_array_item_int16: i16;
    nabla_array_from_int32, nabla_array_item_int32: i32;
    nabla_array_from_int64, nabla_array_item_int64: i64;
    nabla_array_from_float16, nabla_array_item_float16: f16;
    nabla_array_from_bfloat16, nabla_array_item_bfloat16: bf16;
    nabla_array_from_float32, nabla_array_item_float32: f32;
    nabla_array_from_complex64, nabla_array_item_complex64: Complex32;
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_vector_new(out: *mut VectorHandle) -> NablaStatus {
    guard(|| unsafe { emit_new(out, Vec::new()) })
}

#[no_mangle]
/// A vector holding the given arrays, in order. The array handles stay
/// owned by the caller.
///
/// # Safety
/// `handles` must be readable for `count` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_vector_from_arrays(
    handles: *const ArrayHandle,
    count: usize,
    out: *mut VectorHandle,
) -> NablaStatus {
    guard(|| {
        let arrays = unsafe { slice_arg(handles, count)? }
            .iter()
            .map(|h| h.get())
            .collect::<Result<Vec<_>>>()?;
        unsafe { emit_new(out, arrays) }
    })
}

#[no_mangle]
/// Appends the array referenced by `h`; `h` stays owned by the caller.
pub extern "C" fn nabla_vector_push(v: VectorHandle, h: ArrayHandle) -> NablaStatus {
    guard(|| {
        let array = h.get()?;
        let (index, generation) = v.parts();
        let mut table = VectorHandle::table()
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let arrays = table.get_mut(index, generation).ok_or_else(|| v.stale())?;
        arrays.push(array);
        Ok(())
    })
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_vector_len(v: VectorHandle, out: *mut usize) -> NablaStatus {
    guard(|| unsafe { write_out(out, v.get()?.len()) })
}

#[no_mangle]
/// A new handle to element `index` of the vector.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_vector_get(
    v: VectorHandle,
    index: usize,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let arrays = v.get()?;
        let array = arrays.get(index).cloned().ok_or_else(|| {
            Exception::invalid(format!(
                "index {index} out of range for a vector of {} arrays",
                arrays.len()
            ))
        })?;
        unsafe { emit_new(out, array) }
    })
}

#[no_mangle]
pub extern "C" fn nabla_vector_free(v: VectorHandle) -> NablaStatus {
    guard(|| v.take().map(drop))
}
