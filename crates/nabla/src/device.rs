//! Devices, streams and the selector every operation is routed through.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{PoisonError, RwLock};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::backend::registry::has_backend;
use crate::error::{Exception, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Cpu,
    Gpu,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => f.write_str("cpu"),
            DeviceType::Gpu => f.write_str("gpu"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    pub device_type: DeviceType,
    pub index: i32,
}

impl Device {
    pub const fn new(device_type: DeviceType, index: i32) -> Self {
        Self { device_type, index }
    }

    pub const fn cpu() -> Self {
        Self::new(DeviceType::Cpu, 0)
    }

    pub const fn gpu() -> Self {
        Self::new(DeviceType::Gpu, 0)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.device_type, self.index)
    }
}

/// An ordered queue of work on a device. Index 0 is the device's default stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stream {
    pub index: i32,
    pub device: Device,
}

impl Stream {
    pub fn default_for(device: Device) -> Self {
        Stream { index: 0, device }
    }
}

/// Where an operation runs. `Default` resolves to the current default device
/// when the operation is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamOrDevice {
    #[default]
    Default,
    Device(Device),
    Stream(Stream),
}

impl StreamOrDevice {
    pub fn resolve(&self) -> Stream {
        match self {
            StreamOrDevice::Default => Stream::default_for(default_device()),
            StreamOrDevice::Device(device) => Stream::default_for(*device),
            StreamOrDevice::Stream(stream) => *stream,
        }
    }
}

impl From<Device> for StreamOrDevice {
    fn from(device: Device) -> Self {
        StreamOrDevice::Device(device)
    }
}

impl From<Stream> for StreamOrDevice {
    fn from(stream: Stream) -> Self {
        StreamOrDevice::Stream(stream)
    }
}

static DEFAULT_DEVICE: Lazy<RwLock<Device>> =
    Lazy::new(|| RwLock::new(Device::new(crate::env::initial_device_type(), 0)));
static NEXT_STREAM: AtomicI32 = AtomicI32::new(1);

pub fn default_device() -> Device {
    *DEFAULT_DEVICE.read().unwrap_or_else(PoisonError::into_inner)
}

/// Makes `device` the target of `StreamOrDevice::Default`.
///
/// Fails with `InvalidArgument` when no backend is registered for the device type.
pub fn set_default_device(device: Device) -> Result<()> {
    if !has_backend(device.device_type) {
        return Err(Exception::invalid(format!(
            "no backend registered for device {device}"
        )));
    }
    log::debug!("default device set to {device}");
    *DEFAULT_DEVICE.write().unwrap_or_else(PoisonError::into_inner) = device;
    Ok(())
}

pub fn default_stream(device: Device) -> Stream {
    Stream::default_for(device)
}

pub fn new_stream(device: Device) -> Stream {
    Stream {
        index: NEXT_STREAM.fetch_add(1, Ordering::Relaxed),
        device,
    }
}
