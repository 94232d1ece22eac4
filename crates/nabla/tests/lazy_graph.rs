use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use nabla::backend::registry::{create_backend, has_backend, register_backend};
use nabla::backend::{ArrayBackend, ArrayLiteral, ArraySpec, BackendResult, Primitive};
use nabla::device::Device;
use nabla::{ops, Array, DType, DeviceType, StreamOrDevice};
use nabla_backend_ref_cpu::CpuBackend;

/// Reference kernels that count how many primitives they run. Registered for
/// the GPU device type so the plain CPU backend stays untouched.
#[derive(Clone)]
struct CountingBackend {
    inner: CpuBackend,
    runs: Arc<AtomicUsize>,
}

impl ArrayBackend for CountingBackend {
    fn backend_name(&self) -> &str {
        "cpu-counting"
    }

    fn execute(
        &self,
        primitive: &Primitive,
        inputs: &[ArrayLiteral],
        output: &ArraySpec,
    ) -> BackendResult<ArrayLiteral> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(primitive, inputs, output)
    }
}

fn counting_device() -> (StreamOrDevice, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let backend = CountingBackend {
        inner: CpuBackend::new(),
        runs: Arc::clone(&runs),
    };
    register_backend(DeviceType::Gpu, move || backend.clone());
    (StreamOrDevice::Device(Device::gpu()), runs)
}

fn matrix(s: &StreamOrDevice, value: f64) -> Array {
    ops::full(&[2, 2], value, DType::Float32, s)
}

#[test]
fn incremental_eval_skips_evaluated_nodes() -> Result<()> {
    let (gpu, runs) = counting_device();

    let a = matrix(&gpu, 1.0);
    let b = matrix(&gpu, 2.0);
    let c = ops::add(&a, &b)?;
    assert_eq!(runs.load(Ordering::SeqCst), 0, "building a node must not run it");

    c.eval()?;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let d = ops::add(&c, &a)?;
    let e = ops::multiply(&d, &b)?;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    e.eval()?;
    assert_eq!(runs.load(Ordering::SeqCst), 3, "only the two new nodes run");

    e.eval()?;
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(e.to_vec::<f32>()?, vec![8.0; 4]);
    Ok(())
}

#[test]
fn cpu_backend_is_registered_and_named() {
    nabla_backend_ref_cpu::install();
    nabla_backend_ref_cpu::install();
    assert!(has_backend(DeviceType::Cpu));
    let backend = create_backend(DeviceType::Cpu).expect("cpu backend registered");
    assert_eq!(backend.backend_name(), "cpu-reference");
}

#[test]
fn item_checks_size_and_dtype() -> Result<()> {
    nabla_backend_ref_cpu::install();
    let x = Array::from_vec(vec![1.0f32, 2.0], &[2])?;
    assert!(matches!(x.item::<f32>(true), Err(nabla::Exception::ShapeMismatch(_))));

    let s = Array::scalar(3i32);
    assert!(matches!(s.item::<f32>(true), Err(nabla::Exception::DtypeMismatch(_))));
    assert_eq!(s.item::<i32>(true)?, 3);
    Ok(())
}

#[test]
fn item_without_retained_graph_keeps_the_value() -> Result<()> {
    nabla_backend_ref_cpu::install();
    let x = Array::scalar(2.0f32);
    let y = ops::multiply(&x, &x)?;
    assert_eq!(y.item::<f32>(false)?, 4.0);
    assert!(y.is_evaluated());
    assert_eq!(y.item::<f32>(true)?, 4.0);
    Ok(())
}
