//! Random sampling exports.
//!
//! Scalar-bound overloads come in one export per element type, generated by
//! `random_fan_out!`. Every sampler takes an optional `key`; when absent
//! the global key sequence advances.

use std::sync::{Arc, Mutex, PoisonError};

use half::{bf16, f16};
use nabla::random::{self, KeySequence};
use num_complex::Complex32;

use crate::array::{emit_array, optional_shape_arg, shape_arg};
use crate::callable::write_pair;
use crate::handle::{emit_new, ArrayHandle, Handle, KeySequenceHandle};
use crate::optional::{to_std_optional, OptionalArray};
use crate::status::{guard, NablaStatus};
use crate::stream::{dtype_from_code, StreamOrDevice};

macro_rules! random_fan_out {
    ($($ty:ty => $uniform:ident, $randint:ident, $bernoulli:ident, $bernoulli_with_shape:ident;)*) => {
        $(
            #[no_mangle]
            /// # Safety
            /// `shape` must be readable for `ndim` elements and `out` valid for a write.
            pub unsafe extern "C" fn $uniform(
                low: $ty,
                high: $ty,
                shape: *const usize,
                ndim: usize,
                dtype: u32,
                key: OptionalArray,
                s: StreamOrDevice,
                out: *mut ArrayHandle,
            ) -> NablaStatus {
                guard(|| {
                    let shape = unsafe { shape_arg(shape, ndim)? };
                    let key = to_std_optional(&key)?;
                    let sampled = random::uniform_scalars(
                        low,
                        high,
                        &shape,
                        dtype_from_code(dtype)?,
                        key.as_ref(),
                        &s.to_native()?,
                    )?;
                    emit_array(out, sampled)
                })
            }

            #[no_mangle]
            /// # Safety
            /// `shape` must be readable for `ndim` elements and `out` valid for a write.
            pub unsafe extern "C" fn $randint(
                low: $ty,
                high: $ty,
                shape: *const usize,
                ndim: usize,
                dtype: u32,
                key: OptionalArray,
                s: StreamOrDevice,
                out: *mut ArrayHandle,
            ) -> NablaStatus {
                guard(|| {
                    let shape = unsafe { shape_arg(shape, ndim)? };
                    let key = to_std_optional(&key)?;
                    let sampled = random::randint_scalars(
                        low,
                        high,
                        &shape,
                        dtype_from_code(dtype)?,
                        key.as_ref(),
                        &s.to_native()?,
                    )?;
                    emit_array(out, sampled)
                })
            }

            #[no_mangle]
            /// Scalar draw with probability `p`.
            ///
            /// # Safety
            /// `out` must be valid for a write.
            pub unsafe extern "C" fn $bernoulli(
                p: $ty,
                key: OptionalArray,
                s: StreamOrDevice,
                out: *mut ArrayHandle,
            ) -> NablaStatus {
                guard(|| {
                    let key = to_std_optional(&key)?;
                    emit_array(out, random::bernoulli_scalar(p, None, key.as_ref(), &s.to_native()?)?)
                })
            }

            #[no_mangle]
            /// # Safety
            /// `shape` must be readable for `ndim` elements and `out` valid for a write.
            pub unsafe extern "C" fn $bernoulli_with_shape(
                p: $ty,
                shape: *const usize,
                ndim: usize,
                key: OptionalArray,
                s: StreamOrDevice,
                out: *mut ArrayHandle,
            ) -> NablaStatus {
                guard(|| {
                    let shape = unsafe { shape_arg(shape, ndim)? };
                    let key = to_std_optional(&key)?;
                    emit_array(
                        out,
                        random::bernoulli_scalar(p, Some(&shape), key.as_ref(), &s.to_native()?)?,
                    )
                })
            }
        )*
    };
}

random_fan_out! {
    bool => nabla_random_uniform_bool, nabla_random_randint_bool,
        nabla_random_bernoulli_bool, nabla_random_bernoulli_with_shape_bool;
    u8 => nabla_random_uniform_uint8, nabla_random_randint_uint8,
        nabla_random_bernoulli_uint8, nabla_random_bernoulli_with_shape_uint8;
    u16 => nabla_random_uniform_uint16, nabla_random_randint_uint16,
        nabla_random_bernoulli_uint16, nabla_random_bernoulli_with_shape_uint16;
    u32 => nabla_random_uniform_uint32, nabla_random_randint_uint32,
        nabla_random_bernoulli_uint32, nabla_random_bernoulli_with_shape_uint32;
    u64 => nabla_random_uniform_uint64, nabla_random_randint_uint64,
        nabla_random_bernoulli_uint64, nabla_random_bernoulli_with_shape_uint64;
    i8 => nabla_random_uniform_int8, nabla_random_randint_int8,
        nabla_random_bernoulli_int8, nabla_random_bernoulli_with_shape_int8;
    i16 => nabla_random_uniform_int16, nabla_random_randint_int16,
        nabla_random_bernoulli_int16, nabla_random_bernoulli_with_shape_int16;
    i32 => nabla_random_uniform_int32, nabla_random_randint_int32,
        nabla_random_bernoulli_int32, nabla_random_bernoulli_with_shape_int32;
    i64 => nabla_random_uniform_int64, nabla_random_randint_int64,
        nabla_random_bernoulli_int64, nabla_random_bernoulli_with_shape_int64;
    f16 => nabla_random_uniform_float16, nabla_random_randint_float16,
        nabla_random_bernoulli_float16, nabla_random_bernoulli_with_shape_float16;
    bf16 => nabla_random_uniform_bfloat16, nabla_random_randint_bfloat16,
        nabla_random_bernoulli_bfloat16, nabla_random_bernoulli_with_shape_bfloat16;
    f32 => nabla_random_uniform_float32, nabla_random_randint_float32,
        nabla_random_bernoulli_float32, nabla_random_bernoulli_with_shape_float32;
    Complex32 => nabla_random_uniform_complex64, nabla_random_randint_complex64,
        nabla_random_bernoulli_complex64, nabla_random_bernoulli_with_shape_complex64;
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_random_key(seed: u64, out: *mut ArrayHandle) -> NablaStatus {
    guard(|| emit_array(out, random::key(seed)))
}

#[no_mangle]
/// Reseeds the global key sequence used when no key is passed.
pub extern "C" fn nabla_random_seed(seed: u64) -> NablaStatus {
    guard(|| {
        random::seed(seed);
        Ok(())
    })
}

#[no_mangle]
/// A key sequence of its own, independent of the global one.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_key_sequence_new(seed: u64, out: *mut KeySequenceHandle) -> NablaStatus {
    guard(|| unsafe { emit_new(out, Arc::new(Mutex::new(KeySequence::new(seed)))) })
}

#[no_mangle]
/// Advances `seq` and hands out the key it yields.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_key_sequence_next(seq: KeySequenceHandle, out: *mut ArrayHandle) -> NablaStatus {
    guard(|| {
        let seq = seq.get()?;
        let next = seq.lock().unwrap_or_else(PoisonError::into_inner).next()?;
        emit_array(out, next)
    })
}

#[no_mangle]
pub extern "C" fn nabla_key_sequence_free(seq: KeySequenceHandle) -> NablaStatus {
    guard(|| seq.take().map(drop))
}

#[no_mangle]
/// # Safety
/// `out_first` and `out_second` must be valid for writes.
pub unsafe extern "C" fn nabla_random_split(
    key: ArrayHandle,
    s: StreamOrDevice,
    out_first: *mut ArrayHandle,
    out_second: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let (first, second) = random::split(&key.get()?, &s.to_native()?)?;
        unsafe { write_pair::<ArrayHandle, ArrayHandle>(out_first, first, out_second, second) }
    })
}

#[no_mangle]
/// `n` keys stacked into a `[n, 2]` array.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_random_split_n(
    key: ArrayHandle,
    n: usize,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| emit_array(out, random::split_n(&key.get()?, n, &s.to_native()?)?))
}

#[no_mangle]
/// Raw random bits, `width` bytes per element.
///
/// # Safety
/// `shape` must be readable for `ndim` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_random_bits(
    shape: *const usize,
    ndim: usize,
    width: usize,
    key: OptionalArray,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let shape = unsafe { shape_arg(shape, ndim)? };
        let key = to_std_optional(&key)?;
        emit_array(out, random::bits(&shape, width, key.as_ref(), &s.to_native()?)?)
    })
}

#[no_mangle]
/// Uniform draw between array bounds. A null `shape` samples the broadcast
/// shape of the bounds.
///
/// # Safety
/// `shape` must be null or readable for `ndim` elements, and `out` valid for a write.
pub unsafe extern "C" fn nabla_random_uniform(
    low: ArrayHandle,
    high: ArrayHandle,
    shape: *const usize,
    ndim: usize,
    dtype: u32,
    key: OptionalArray,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let shape = unsafe { optional_shape_arg(shape, ndim)? };
        let key = to_std_optional(&key)?;
        let sampled = random::uniform(
            &low.get()?,
            &high.get()?,
            shape.as_deref(),
            dtype_from_code(dtype)?,
            key.as_ref(),
            &s.to_native()?,
        )?;
        emit_array(out, sampled)
    })
}

#[no_mangle]
/// Integer draw in `[low, high)`. A null `shape` samples the broadcast shape
/// of the bounds.
///
/// # Safety
/// As for [`nabla_random_uniform`].
pub unsafe extern "C" fn nabla_random_randint(
    low: ArrayHandle,
    high: ArrayHandle,
    shape: *const usize,
    ndim: usize,
    dtype: u32,
    key: OptionalArray,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let shape = unsafe { optional_shape_arg(shape, ndim)? };
        let key = to_std_optional(&key)?;
        let sampled = random::randint(
            &low.get()?,
            &high.get()?,
            shape.as_deref(),
            dtype_from_code(dtype)?,
            key.as_ref(),
            &s.to_native()?,
        )?;
        emit_array(out, sampled)
    })
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_random_bernoulli(
    p: ArrayHandle,
    key: OptionalArray,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let key = to_std_optional(&key)?;
        emit_array(out, random::bernoulli(&p.get()?, None, key.as_ref(), &s.to_native()?)?)
    })
}

#[no_mangle]
/// # Safety
/// `shape` must be readable for `ndim` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_random_bernoulli_with_shape(
    p: ArrayHandle,
    shape: *const usize,
    ndim: usize,
    key: OptionalArray,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let shape = unsafe { shape_arg(shape, ndim)? };
        let key = to_std_optional(&key)?;
        emit_array(
            out,
            random::bernoulli(&p.get()?, Some(&shape), key.as_ref(), &s.to_native()?)?,
        )
    })
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_random_truncated_normal(
    lower: ArrayHandle,
    upper: ArrayHandle,
    dtype: u32,
    key: OptionalArray,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let key = to_std_optional(&key)?;
        let sampled = random::truncated_normal(
            &lower.get()?,
            &upper.get()?,
            None,
            dtype_from_code(dtype)?,
            key.as_ref(),
            &s.to_native()?,
        )?;
        emit_array(out, sampled)
    })
}

#[no_mangle]
/// # Safety
/// `shape` must be readable for `ndim` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_random_truncated_normal_with_shape(
    lower: ArrayHandle,
    upper: ArrayHandle,
    shape: *const usize,
    ndim: usize,
    dtype: u32,
    key: OptionalArray,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let shape = unsafe { shape_arg(shape, ndim)? };
        let key = to_std_optional(&key)?;
        let sampled = random::truncated_normal(
            &lower.get()?,
            &upper.get()?,
            Some(&shape),
            dtype_from_code(dtype)?,
            key.as_ref(),
            &s.to_native()?,
        )?;
        emit_array(out, sampled)
    })
}

#[no_mangle]
/// # Safety
/// `shape` must be readable for `ndim` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_random_normal(
    shape: *const usize,
    ndim: usize,
    dtype: u32,
    loc: f32,
    scale: f32,
    key: OptionalArray,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let shape = unsafe { shape_arg(shape, ndim)? };
        let key = to_std_optional(&key)?;
        let sampled = random::normal(
            &shape,
            dtype_from_code(dtype)?,
            loc,
            scale,
            key.as_ref(),
            &s.to_native()?,
        )?;
        emit_array(out, sampled)
    })
}

#[no_mangle]
/// # Safety
/// `shape` must be readable for `ndim` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_random_gumbel(
    shape: *const usize,
    ndim: usize,
    dtype: u32,
    key: OptionalArray,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let shape = unsafe { shape_arg(shape, ndim)? };
        let key = to_std_optional(&key)?;
        emit_array(
            out,
            random::gumbel(&shape, dtype_from_code(dtype)?, key.as_ref(), &s.to_native()?)?,
        )
    })
}

#[no_mangle]
/// Category indices drawn along `axis` of the unnormalised `logits`.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_random_categorical(
    logits: ArrayHandle,
    axis: i32,
    key: OptionalArray,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let key = to_std_optional(&key)?;
        emit_array(
            out,
            random::categorical(&logits.get()?, axis, key.as_ref(), &s.to_native()?)?,
        )
    })
}

#[no_mangle]
/// `shape` is the shape of the result; its trailing axes must match the
/// logits with `axis` removed.
///
/// # Safety
/// `shape` must be readable for `ndim` elements and `out` valid for a write.
pub unsafe extern "C" fn nabla_random_categorical_with_shape(
    logits: ArrayHandle,
    axis: i32,
    shape: *const usize,
    ndim: usize,
    key: OptionalArray,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let shape = unsafe { shape_arg(shape, ndim)? };
        let key = to_std_optional(&key)?;
        let sampled = random::categorical_with_shape(
            &logits.get()?,
            axis,
            &shape,
            key.as_ref(),
            &s.to_native()?,
        )?;
        emit_array(out, sampled)
    })
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_random_categorical_num_samples(
    logits: ArrayHandle,
    axis: i32,
    num_samples: usize,
    key: OptionalArray,
    s: StreamOrDevice,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let key = to_std_optional(&key)?;
        let sampled = random::categorical_num_samples(
            &logits.get()?,
            axis,
            num_samples,
            key.as_ref(),
            &s.to_native()?,
        )?;
        emit_array(out, sampled)
    })
}
