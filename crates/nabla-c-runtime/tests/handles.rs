use std::os::raw::{c_char, c_void};

use anyhow::{bail, Result};
use nabla::Exception;
use nabla_c_runtime::*;

const FLOAT32: u32 = 11;
const INT32: u32 = 7;

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

fn floats(values: &[f32], shape: &[usize]) -> Result<ArrayHandle> {
    let mut out = ArrayHandle::default();
    check(unsafe {
        nabla_array_from_data(
            values.as_ptr().cast::<c_void>(),
            shape.as_ptr(),
            shape.len(),
            FLOAT32,
            StreamOrDevice::default(),
            &mut out,
        )
    })?;
    Ok(out)
}

fn read_floats(h: ArrayHandle, n: usize) -> Result<Vec<f32>> {
    let mut values = vec![0f32; n];
    let mut len = 0usize;
    check(unsafe {
        nabla_array_copy_data(h, values.as_mut_ptr().cast::<c_void>(), n * 4, &mut len)
    })?;
    assert_eq!(len, n * 4);
    Ok(values)
}

#[test]
fn arrays_round_trip_through_raw_data() -> Result<()> {
    let a = floats(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3])?;

    let mut ndim = 0usize;
    let mut dims = [0usize; 4];
    check(unsafe { nabla_array_shape(a, dims.as_mut_ptr(), dims.len(), &mut ndim) })?;
    assert_eq!(&dims[..ndim], &[2, 3]);

    let mut dtype = 0u32;
    check(unsafe { nabla_array_dtype(a, &mut dtype) })?;
    assert_eq!(dtype, FLOAT32);
    let mut nbytes = 0usize;
    check(unsafe { nabla_array_nbytes(a, &mut nbytes) })?;
    assert_eq!(nbytes, 24);

    assert_eq!(read_floats(a, 6)?, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

    let mut small = [0f32; 2];
    let mut len = 0usize;
    let status = unsafe { nabla_array_copy_data(a, small.as_mut_ptr().cast(), 8, &mut len) };
    assert_eq!(status, NABLA_INVALID_ARGUMENT);
    assert_eq!(len, 24);

    check(nabla_array_free(a))
}

#[test]
fn operations_stay_lazy_until_read() -> Result<()> {
    let a = floats(&[1.0, 2.0], &[2])?;
    let b = floats(&[10.0, 20.0], &[2])?;
    let mut sum = ArrayHandle::default();
    check(unsafe { nabla_add(a, b, &mut sum) })?;

    let mut evaluated = true;
    check(unsafe { nabla_array_is_evaluated(sum, &mut evaluated) })?;
    assert!(!evaluated);
    check(nabla_array_eval(sum))?;
    check(unsafe { nabla_array_is_evaluated(sum, &mut evaluated) })?;
    assert!(evaluated);
    assert_eq!(read_floats(sum, 2)?, vec![11.0, 22.0]);

    let mut total = ArrayHandle::default();
    check(unsafe { nabla_sum(sum, std::ptr::null(), 0, false, &mut total) })?;
    let mut value = 0f32;
    check(unsafe { nabla_array_item_float32(total, false, &mut value) })?;
    assert_eq!(value, 33.0);

    for h in [a, b, sum, total] {
        check(nabla_array_free(h))?;
    }
    Ok(())
}

#[test]
fn scalar_extraction_checks_size_and_dtype() -> Result<()> {
    let mut scalar = ArrayHandle::default();
    check(unsafe { nabla_array_from_int32(7, &mut scalar) })?;
    let mut value = 0i32;
    check(unsafe { nabla_array_item_int32(scalar, true, &mut value) })?;
    assert_eq!(value, 7);

    let mut wrong_type = 0f32;
    let status = unsafe { nabla_array_item_float32(scalar, true, &mut wrong_type) };
    assert_eq!(status, NABLA_DTYPE_MISMATCH);

    let pair = floats(&[1.0, 2.0], &[2])?;
    let status = unsafe { nabla_array_item_float32(pair, true, &mut wrong_type) };
    assert_eq!(status, NABLA_SHAPE_MISMATCH);

    let mut cast = ArrayHandle::default();
    check(unsafe { nabla_astype(pair, INT32, &mut cast) })?;
    let mut dtype = 0u32;
    check(unsafe { nabla_array_dtype(cast, &mut dtype) })?;
    assert_eq!(dtype, INT32);
    Ok(())
}

#[test]
fn freed_handles_are_rejected() -> Result<()> {
    let a = floats(&[1.0], &[1])?;
    check(nabla_array_free(a))?;

    let mut ndim = 0usize;
    let status = unsafe { nabla_array_ndim(a, &mut ndim) };
    assert_eq!(status, NABLA_INVALID_ARGUMENT);
    assert!(last_message().contains("stale"), "got {:?}", last_message());
    assert_eq!(nabla_array_free(a), NABLA_INVALID_ARGUMENT);

    // a reused slot carries a new generation
    let b = floats(&[2.0], &[1])?;
    assert_ne!((a.index, a.generation), (b.index, b.generation));
    let status = unsafe { nabla_array_ndim(a, &mut ndim) };
    assert_eq!(status, NABLA_INVALID_ARGUMENT);
    check(nabla_array_free(b))
}

#[test]
fn null_outputs_are_invalid_arguments() -> Result<()> {
    let status = unsafe { nabla_array_from_float32(1.0, std::ptr::null_mut()) };
    assert_eq!(status, NABLA_INVALID_ARGUMENT);
    assert!(last_message().contains("null"));
    Ok(())
}

#[test]
fn failures_report_their_status_and_message() -> Result<()> {
    let a = floats(&[1.0, 2.0, 3.0], &[3])?;
    let b = floats(&[1.0, 2.0], &[2])?;
    let mut out = ArrayHandle::default();
    let status = unsafe { nabla_add(a, b, &mut out) };
    assert_eq!(status, NABLA_SHAPE_MISMATCH);
    assert!(!last_message().is_empty());
    assert_eq!(out, ArrayHandle::default(), "a failing call writes no handle");

    nabla_clear_last_error();
    assert_eq!(last_message(), "");
    Ok(())
}

#[test]
fn overflowing_shapes_are_rejected_before_allocation() -> Result<()> {
    let data = [0f32; 4];
    let huge = 1usize << 32;
    let mut out = ArrayHandle::default();
    for shape in [[huge, huge], [1usize << 62, 1]] {
        let status = unsafe {
            nabla_array_from_data(
                data.as_ptr().cast::<c_void>(),
                shape.as_ptr(),
                shape.len(),
                FLOAT32,
                StreamOrDevice::default(),
                &mut out,
            )
        };
        assert_eq!(status, NABLA_INVALID_ARGUMENT, "shape {shape:?}");
        assert!(last_message().contains("too"), "got {:?}", last_message());
        assert_eq!(out, ArrayHandle::default());
    }

    let status = unsafe {
        nabla_full([huge, huge].as_ptr(), 2, 0.0, FLOAT32, StreamOrDevice::default(), &mut out)
    };
    assert_eq!(status, NABLA_INVALID_ARGUMENT);
    Ok(())
}

#[test]
fn optional_bridge_maps_presence() -> Result<()> {
    assert!(to_std_optional(&OptionalArray::ABSENT)?.is_none());

    let a = floats(&[3.0, 4.0], &[2])?;
    let present = to_std_optional(&nabla_optional_array_present(a))?;
    let array = present.expect("present handle yields an array");
    assert_eq!(array.to_vec::<f32>()?, vec![3.0, 4.0]);

    let round_trip = from_std_optional(Some(array));
    assert_eq!(round_trip.tag, NABLA_OPTIONAL_PRESENT);
    assert_ne!(round_trip.handle, a, "the reverse bridge inserts a new handle");
    assert_eq!(from_std_optional(None), nabla_optional_array_absent());

    check(nabla_array_free(a))?;
    let stale = to_std_optional(&OptionalArray::present(a));
    assert!(matches!(stale, Err(Exception::InvalidArgument(_))));

    let garbled = OptionalArray {
        tag: 7,
        handle: round_trip.handle,
    };
    let unknown = to_std_optional(&garbled);
    assert!(matches!(unknown, Err(Exception::InvalidArgument(_))));
    check(nabla_array_free(round_trip.handle))
}

#[test]
fn vectors_collect_arrays() -> Result<()> {
    let a = floats(&[1.0], &[1])?;
    let b = floats(&[2.0], &[1])?;
    let mut v = VectorHandle::default();
    check(unsafe { nabla_vector_new(&mut v) })?;
    check(nabla_vector_push(v, a))?;
    check(nabla_vector_push(v, b))?;

    let mut len = 0usize;
    check(unsafe { nabla_vector_len(v, &mut len) })?;
    assert_eq!(len, 2);

    let mut stacked = ArrayHandle::default();
    check(unsafe { nabla_concatenate(v, 0, &mut stacked) })?;
    assert_eq!(read_floats(stacked, 2)?, vec![1.0, 2.0]);

    let mut second = ArrayHandle::default();
    check(unsafe { nabla_vector_get(v, 1, &mut second) })?;
    assert_eq!(read_floats(second, 1)?, vec![2.0]);
    let status = unsafe { nabla_vector_get(v, 2, &mut second) };
    assert_eq!(status, NABLA_INVALID_ARGUMENT);

    check(nabla_vector_free(v))?;
    assert_eq!(nabla_vector_push(v, a), NABLA_INVALID_ARGUMENT);
    Ok(())
}

#[test]
fn spec_json_and_text_describe_the_array() -> Result<()> {
    let a = floats(&[1.5, 2.5], &[2])?;
    let mut buf = [0 as c_char; 128];
    let mut len = 0usize;
    check(unsafe { nabla_array_spec_json(a, buf.as_mut_ptr(), buf.len(), &mut len) })?;
    let bytes: Vec<u8> = buf[..len].iter().map(|&c| c as u8).collect();
    let json: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert_eq!(json["shape"], serde_json::json!([2]));
    assert!(json["device"].as_str().unwrap_or_default().starts_with("cpu"));

    check(unsafe { nabla_array_tostring(a, buf.as_mut_ptr(), buf.len(), &mut len) })?;
    let bytes: Vec<u8> = buf[..len].iter().map(|&c| c as u8).collect();
    let text = String::from_utf8(bytes)?;
    assert!(text.starts_with("array("), "got {text}");
    Ok(())
}

#[test]
fn dtype_sizes_follow_codes() {
    assert_eq!(nabla_dtype_size(0), 1);
    assert_eq!(nabla_dtype_size(FLOAT32), 4);
    assert_eq!(nabla_dtype_size(12), 8);
    assert_eq!(nabla_dtype_size(99), 0);
}
