use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use nabla::transforms::{compile, custom_vjp, grad, Multiary, MultiInputSingleOutput};
use nabla::{ops, Array, Exception};

fn setup() {
    nabla_backend_ref_cpu::install();
}

fn counted(calls: &Arc<AtomicUsize>) -> Multiary {
    let calls = Arc::clone(calls);
    Arc::new(move |xs: &[Array]| -> nabla::Result<Vec<Array>> {
        calls.fetch_add(1, Ordering::SeqCst);
        let y = ops::add(&ops::multiply(&xs[0], &xs[0])?, &xs[1])?;
        Ok(vec![ops::sum(&y, &[-1], false)?])
    })
}

fn pair(values: &[f32], shape: &[usize]) -> Result<Vec<Array>> {
    Ok(vec![
        Array::from_slice(values, shape)?,
        ops::ones(shape, nabla::DType::Float32, &Default::default()),
    ])
}

#[test]
fn traces_once_per_signature() -> Result<()> {
    setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let compiled = compile(counted(&calls), false);

    let first = compiled.call(&pair(&[1.0, 2.0], &[2])?)?;
    assert_eq!(first[0].item::<f32>(true)?, 7.0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let second = compiled.call(&pair(&[3.0, 4.0], &[2])?)?;
    assert_eq!(second[0].item::<f32>(true)?, 27.0);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "same signature replays the trace");

    let third = compiled.call(&pair(&[1.0, 1.0, 1.0], &[3])?)?;
    assert_eq!(third[0].item::<f32>(true)?, 6.0);
    assert_eq!(calls.load(Ordering::SeqCst), 2, "a new shape is traced again");
    Ok(())
}

#[test]
fn shapeless_traces_serve_other_sizes() -> Result<()> {
    setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let compiled = compile(counted(&calls), true);

    compiled.call(&pair(&[1.0, 2.0], &[2])?)?;
    let out = compiled.call(&pair(&[1.0, 2.0, 3.0, 4.0], &[4])?)?;
    assert_eq!(out[0].item::<f32>(true)?, 34.0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let batched = compiled.call(&pair(&[1.0, 2.0, 3.0, 4.0], &[2, 2])?)?;
    assert_eq!(batched[0].to_vec::<f32>()?, vec![7.0, 27.0]);
    assert_eq!(calls.load(Ordering::SeqCst), 2, "a new rank is traced again");
    Ok(())
}

#[test]
fn shapeless_replay_rejects_shape_dependent_ops() -> Result<()> {
    setup();
    let f: Multiary = Arc::new(|xs: &[Array]| -> nabla::Result<Vec<Array>> {
        Ok(vec![ops::slice_axis(&xs[0], 0, 0, 1)?])
    });
    let compiled = compile(f, true);
    compiled.call(&[Array::from_vec(vec![1.0f32, 2.0], &[2])?])?;
    let err = compiled
        .call(&[Array::from_vec(vec![1.0f32, 2.0, 3.0], &[3])?])
        .unwrap_err();
    assert!(matches!(err, Exception::InvalidArgument(_)));
    Ok(())
}

#[test]
fn compiled_functions_still_differentiate() -> Result<()> {
    setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let compiled = compile(counted(&calls), false);
    let single: MultiInputSingleOutput = Arc::new(move |xs: &[Array]| -> nabla::Result<Array> {
        let out = compiled.call(xs)?;
        ops::sum(&out[0], &[], false)
    });
    let df = grad(single, &[0])?;
    let grads = df.call(&pair(&[1.0, 2.0], &[2])?)?;
    assert_eq!(grads[0].to_vec::<f32>()?, vec![2.0, 4.0]);
    let grads = df.call(&pair(&[3.0, 5.0], &[2])?)?;
    assert_eq!(grads[0].to_vec::<f32>()?, vec![6.0, 10.0]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn functions_with_custom_rules_are_called_directly() -> Result<()> {
    setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let rule = Arc::new(
        |_: &[Array], cotangents: &[Array], _: &[Array]| -> nabla::Result<Vec<Array>> {
            Ok(vec![cotangents[0].clone(), cotangents[0].clone()])
        },
    );
    let compiled = compile(custom_vjp(counted(&calls), rule), false);
    compiled.call(&pair(&[1.0, 2.0], &[2])?)?;
    let out = compiled.call(&pair(&[2.0, 2.0], &[2])?)?;
    assert_eq!(out[0].item::<f32>(true)?, 10.0);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}
