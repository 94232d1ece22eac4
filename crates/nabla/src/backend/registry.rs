//! Runtime backend registry keyed by device type.
//!
//! Backend crates register a constructor for the device type they serve; the
//! evaluator asks the registry for a backend whenever it runs nodes placed on
//! that device.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use super::spec::ArrayBackend;
use crate::device::DeviceType;

/// Factory function that creates a new backend instance.
pub type BackendConstructor = Box<dyn Fn() -> Arc<dyn ArrayBackend> + Send + Sync>;

struct BackendRegistry {
    backends: RwLock<HashMap<DeviceType, BackendConstructor>>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, device_type: DeviceType, constructor: BackendConstructor) {
        self.backends
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_type, constructor);
    }

    fn create(&self, device_type: DeviceType) -> Option<Arc<dyn ArrayBackend>> {
        let registry = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        let constructor = registry.get(&device_type)?;
        Some(constructor())
    }

    fn list_backends(&self) -> Vec<DeviceType> {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    fn has_backend(&self, device_type: DeviceType) -> bool {
        self.backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&device_type)
    }
}

static GLOBAL_REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();

fn global_registry() -> &'static BackendRegistry {
    GLOBAL_REGISTRY.get_or_init(BackendRegistry::new)
}

/// Register the backend serving `device_type`, replacing any previous one.
///
/// The constructor runs each time the evaluator needs a backend, so it should
/// be cheap; backends are expected to keep shared state behind an `Arc`.
///
/// # Example
/// ```ignore
/// use nabla::backend::registry::register_backend;
/// use nabla::DeviceType;
///
/// register_backend(DeviceType::Cpu, || MyBackend::new());
/// ```
pub fn register_backend<B, F>(device_type: DeviceType, constructor: F)
where
    B: ArrayBackend + 'static,
    F: Fn() -> B + Send + Sync + 'static,
{
    log::info!("registering backend for device type {device_type}");
    global_registry().register(
        device_type,
        Box::new(move || Arc::new(constructor()) as Arc<dyn ArrayBackend>),
    );
}

/// Create the backend serving `device_type`, if one has been registered.
pub fn create_backend(device_type: DeviceType) -> Option<Arc<dyn ArrayBackend>> {
    global_registry().create(device_type)
}

/// List the device types that currently have a backend.
pub fn list_backends() -> Vec<DeviceType> {
    global_registry().list_backends()
}

pub fn has_backend(device_type: DeviceType) -> bool {
    global_registry().has_backend(device_type)
}
