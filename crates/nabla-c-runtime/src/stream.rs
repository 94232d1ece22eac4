//! Boundary forms of devices, streams and dtypes.

use nabla::device::{self, Device, DeviceType, Stream};
use nabla::{DType, Exception, Result};

use crate::status::{guard, write_out, NablaStatus};

pub const NABLA_TARGET_DEFAULT: u32 = 0;
pub const NABLA_TARGET_DEVICE: u32 = 1;
pub const NABLA_TARGET_STREAM: u32 = 2;

/// Where an operation runs. The zero value selects the default device.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamOrDevice {
    /// One of the `NABLA_TARGET_*` constants.
    pub kind: u32,
    /// 0 for cpu, 1 for gpu.
    pub device_type: u32,
    pub device_index: i32,
    pub stream_index: i32,
}

fn device_type_from_code(code: u32) -> Result<DeviceType> {
    match code {
        0 => Ok(DeviceType::Cpu),
        1 => Ok(DeviceType::Gpu),
        other => Err(Exception::invalid(format!("unknown device type {other}"))),
    }
}

fn device_type_code(device_type: DeviceType) -> u32 {
    match device_type {
        DeviceType::Cpu => 0,
        DeviceType::Gpu => 1,
    }
}

impl StreamOrDevice {
    pub fn to_native(self) -> Result<nabla::StreamOrDevice> {
        let device = || -> Result<Device> {
            Ok(Device::new(
                device_type_from_code(self.device_type)?,
                self.device_index,
            ))
        };
        match self.kind {
            NABLA_TARGET_DEFAULT => Ok(nabla::StreamOrDevice::Default),
            NABLA_TARGET_DEVICE => Ok(nabla::StreamOrDevice::Device(device()?)),
            NABLA_TARGET_STREAM => Ok(nabla::StreamOrDevice::Stream(Stream {
                index: self.stream_index,
                device: device()?,
            })),
            other => Err(Exception::invalid(format!("unknown stream selector kind {other}"))),
        }
    }

    pub fn from_stream(stream: Stream) -> Self {
        StreamOrDevice {
            kind: NABLA_TARGET_STREAM,
            device_type: device_type_code(stream.device.device_type),
            device_index: stream.device.index,
            stream_index: stream.index,
        }
    }
}

/// Dtype codes follow [`DType::ALL`]: bool is 0, complex64 is 12.
pub fn dtype_from_code(code: u32) -> Result<DType> {
    DType::ALL
        .get(code as usize)
        .copied()
        .ok_or_else(|| Exception::invalid(format!("unknown dtype code {code}")))
}

pub fn dtype_code(dtype: DType) -> u32 {
    DType::ALL.iter().position(|&d| d == dtype).unwrap_or_default() as u32
}

#[no_mangle]
/// Size in bytes of one element of the dtype, 0 for an unknown code.
pub extern "C" fn nabla_dtype_size(dtype: u32) -> usize {
    dtype_from_code(dtype).map(DType::size_in_bytes).unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn nabla_set_default_device(device_type: u32, index: i32) -> NablaStatus {
    guard(|| device::set_default_device(Device::new(device_type_from_code(device_type)?, index)))
}

#[no_mangle]
/// # Safety
/// `out_type` and `out_index` must be valid for writes.
pub unsafe extern "C" fn nabla_default_device(out_type: *mut u32, out_index: *mut i32) -> NablaStatus {
    guard(|| {
        let device = device::default_device();
        unsafe {
            write_out(out_type, device_type_code(device.device_type))?;
            write_out(out_index, device.index)
        }
    })
}

#[no_mangle]
/// A fresh stream on the given device.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_new_stream(
    device_type: u32,
    index: i32,
    out: *mut StreamOrDevice,
) -> NablaStatus {
    guard(|| {
        let stream = device::new_stream(Device::new(device_type_from_code(device_type)?, index));
        unsafe { write_out(out, StreamOrDevice::from_stream(stream)) }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_selector_is_the_default_device() {
        assert_eq!(
            StreamOrDevice::default().to_native().ok(),
            Some(nabla::StreamOrDevice::Default)
        );
    }

    #[test]
    fn dtype_codes_follow_declaration_order() {
        assert_eq!(dtype_from_code(0).ok(), Some(DType::Bool));
        assert_eq!(dtype_from_code(12).ok(), Some(DType::Complex64));
        assert!(dtype_from_code(13).is_err());
        for dtype in DType::ALL {
            assert_eq!(dtype_from_code(dtype_code(dtype)).ok(), Some(dtype));
        }
    }
}
