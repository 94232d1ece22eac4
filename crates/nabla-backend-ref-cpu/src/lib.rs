pub mod cpu;

use std::sync::Once;

use nabla::DeviceType;

pub use cpu::CpuBackend;

static INSTALL: Once = Once::new();

/// Register the CPU backend with the global backend registry.
///
/// This function is called automatically via a static initializer on Linux,
/// but can also be called manually; repeated calls do nothing.
pub fn install() {
    INSTALL.call_once(|| {
        nabla::backend::registry::register_backend(DeviceType::Cpu, CpuBackend::new);
    });
}

// Auto-register on library load
#[cfg(target_os = "linux")]
#[used]
#[link_section = ".init_array"]
static REGISTER_CPU_BACKEND: extern "C" fn() = {
    extern "C" fn register() {
        install();
    }
    register
};
