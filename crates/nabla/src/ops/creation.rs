use crate::array::Array;
use crate::backend::{ArrayData, ArrayLiteral, ArraySpec};
use crate::device::StreamOrDevice;
use crate::dtype::DType;
use crate::error::{Exception, Result};

/// Array of `shape` filled with `value` converted to `dtype`.
pub fn full(shape: &[usize], value: f64, dtype: DType, stream: &StreamOrDevice) -> Array {
    let spec = ArraySpec::new(dtype, shape.to_vec());
    let data = ArrayData::from_f64_values(dtype, &vec![value; spec.size()]);
    Array::from_literal_on(ArrayLiteral { spec, data }, stream)
}

pub fn zeros(shape: &[usize], dtype: DType, stream: &StreamOrDevice) -> Array {
    full(shape, 0.0, dtype, stream)
}

pub fn ones(shape: &[usize], dtype: DType, stream: &StreamOrDevice) -> Array {
    full(shape, 1.0, dtype, stream)
}

pub fn full_like(a: &Array, value: f64) -> Array {
    full(a.shape(), value, a.dtype(), &a.stream().into())
}

pub fn zeros_like(a: &Array) -> Array {
    full_like(a, 0.0)
}

pub fn ones_like(a: &Array) -> Array {
    full_like(a, 1.0)
}

/// Zero-dimensional constant with the dtype and stream of `a`.
pub fn scalar_like(a: &Array, value: f64) -> Array {
    full(&[], value, a.dtype(), &a.stream().into())
}

/// Values `start, start + step, ...` strictly below `stop` (above, for negative steps).
pub fn arange(
    start: f64,
    stop: f64,
    step: f64,
    dtype: DType,
    stream: &StreamOrDevice,
) -> Result<Array> {
    if step == 0.0 || !step.is_finite() {
        return Err(Exception::invalid(format!("arange step must be finite and non-zero, got {step}")));
    }
    if !start.is_finite() || !stop.is_finite() {
        return Err(Exception::invalid(format!(
            "arange bounds must be finite, got [{start}, {stop})"
        )));
    }
    let span = ((stop - start) / step).ceil().max(0.0);
    let limit = isize::MAX as usize / dtype.size_in_bytes();
    if !span.is_finite() || span >= limit as f64 {
        return Err(Exception::invalid(format!(
            "arange from {start} to {stop} by {step} has too many elements"
        )));
    }
    let count = span as usize;
    let values: Vec<f64> = (0..count).map(|i| start + i as f64 * step).collect();
    let spec = ArraySpec::new(dtype, vec![count]);
    let data = ArrayData::from_f64_values(dtype, &values);
    Ok(Array::from_literal_on(ArrayLiteral { spec, data }, stream))
}
