use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use nabla::transforms::{
    checkpoint, custom_vjp, grad, grad_unary, jvp, value_and_grad, value_and_grad_unary, vjp,
    Multiary, Unary, WithArity,
};
use nabla::{ops, Array, Exception};

fn setup() {
    nabla_backend_ref_cpu::install();
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-4, "expected {expected:?}, got {actual:?}");
    }
}

fn cube(x: &Array) -> nabla::Result<Array> {
    ops::multiply(&ops::multiply(x, x)?, x)
}

#[test]
fn grad_of_grad_of_cube() -> Result<()> {
    setup();
    let f: Unary = Arc::new(|x: &Array| cube(x));
    let second = grad_unary(grad_unary(f));
    let value = second.call(&Array::scalar(2.0f32))?.item::<f32>(true)?;
    assert!((value - 12.0).abs() < 1e-4, "got {value}");
    Ok(())
}

#[test]
fn vjp_runs_the_function_and_checks_cotangent_count() -> Result<()> {
    setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let f = move |xs: &[Array]| -> nabla::Result<Vec<Array>> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(vec![ops::multiply(&xs[0], &xs[1])?])
    };
    let x = Array::from_vec(vec![1.0f32, 2.0, 3.0], &[3])?;
    let y = Array::from_vec(vec![4.0f32, 5.0, 6.0], &[3])?;
    let ones = ops::ones_like(&x);

    let (outputs, vjps) = vjp(&f, &[x.clone(), y.clone()], &[ones.clone()])?;
    assert!(calls.load(Ordering::SeqCst) >= 1);
    assert_close(&outputs[0].to_vec::<f32>()?, &[4.0, 10.0, 18.0]);
    assert_close(&vjps[0].to_vec::<f32>()?, &[4.0, 5.0, 6.0]);
    assert_close(&vjps[1].to_vec::<f32>()?, &[1.0, 2.0, 3.0]);

    let err = vjp(&f, &[x.clone(), y], &[ones.clone(), ones]).unwrap_err();
    assert!(matches!(err, Exception::InvalidArgument(_)));
    Ok(())
}

#[test]
fn jvp_pushes_tangents_forward() -> Result<()> {
    setup();
    let f = |xs: &[Array]| -> nabla::Result<Vec<Array>> { Ok(vec![ops::sin(&xs[0])?]) };
    let x = Array::from_vec(vec![0.0f32, 1.0], &[2])?;
    let t = Array::from_vec(vec![1.0f32, 2.0], &[2])?;
    let (_, jvps) = jvp(&f, &[x], &[t])?;
    assert_close(&jvps[0].to_vec::<f32>()?, &[1.0, 2.0 * 1f32.cos()]);

    let wrong = Array::from_vec(vec![1.0f32], &[1])?;
    let err = jvp(&f, &[Array::from_vec(vec![0.0f32, 1.0], &[2])?], &[wrong]).unwrap_err();
    assert!(matches!(err, Exception::ShapeMismatch(_)));
    Ok(())
}

#[test]
fn value_and_grad_selects_arguments() -> Result<()> {
    setup();
    let f: Multiary = Arc::new(|xs: &[Array]| -> nabla::Result<Vec<Array>> {
        Ok(vec![ops::sum(&ops::multiply(&xs[0], &xs[1])?, &[], false)?])
    });
    let vg = value_and_grad(f, &[1])?;
    let x = Array::from_vec(vec![1.0f32, 2.0], &[2])?;
    let y = Array::from_vec(vec![3.0f32, 4.0], &[2])?;
    let (values, grads) = vg.call(&[x, y])?;
    assert_eq!(values[0].item::<f32>(true)?, 11.0);
    assert_eq!(grads.len(), 1);
    assert_close(&grads[0].to_vec::<f32>()?, &[1.0, 2.0]);
    Ok(())
}

#[test]
fn value_and_grad_requires_scalar_output() -> Result<()> {
    setup();
    let f: Unary = Arc::new(|x: &Array| ops::exp(x));
    let vg = value_and_grad_unary(f);
    let err = vg.call(&Array::from_vec(vec![1.0f32, 2.0], &[2])?).unwrap_err();
    assert!(matches!(err, Exception::InvalidArgument(_)));

    let (value, gradient) = vg.call(&Array::scalar(0.0f32))?;
    assert_eq!(value.item::<f32>(true)?, 1.0);
    assert_eq!(gradient.item::<f32>(true)?, 1.0);
    Ok(())
}

#[test]
fn grad_rejects_out_of_range_argnums() {
    let f = Arc::new(WithArity {
        arity: 2,
        fun: |xs: &[Array]| -> nabla::Result<Array> { ops::add(&xs[0], &xs[1]) },
    });
    assert!(matches!(grad(f.clone(), &[2]), Err(Exception::InvalidArgument(_))));
    assert!(grad(f, &[0, 1]).is_ok());
}

#[test]
fn checkpoint_matches_plain_gradient() -> Result<()> {
    setup();
    let body = |xs: &[Array]| -> nabla::Result<Vec<Array>> {
        let y = ops::multiply(&ops::sin(&xs[0])?, &xs[0])?;
        Ok(vec![ops::sum(&y, &[], false)?])
    };
    let plain: Multiary = Arc::new(body);
    let saved = checkpoint(Arc::new(body));
    let x = Array::from_vec(vec![0.5f32, 1.5, -2.0], &[3])?;

    let (plain_values, plain_grads) = value_and_grad(plain, &[0])?.call(std::slice::from_ref(&x))?;
    let (saved_values, saved_grads) = value_and_grad(saved, &[0])?.call(std::slice::from_ref(&x))?;
    assert_close(
        &saved_values[0].to_vec::<f32>()?,
        &plain_values[0].to_vec::<f32>()?,
    );
    assert_close(&saved_grads[0].to_vec::<f32>()?, &plain_grads[0].to_vec::<f32>()?);
    Ok(())
}

#[test]
fn custom_vjp_replaces_the_derivative() -> Result<()> {
    setup();
    let doubled: Multiary = Arc::new(|xs: &[Array]| -> nabla::Result<Vec<Array>> {
        Ok(vec![ops::multiply(&xs[0], &ops::scalar_like(&xs[0], 2.0))?])
    });
    let rule = Arc::new(
        |_: &[Array], cotangents: &[Array], _: &[Array]| -> nabla::Result<Vec<Array>> {
            Ok(vec![ops::multiply(&cotangents[0], &ops::scalar_like(&cotangents[0], 10.0))?])
        },
    );
    let f = custom_vjp(doubled, rule);
    let x = Array::from_vec(vec![1.0f32, 2.0], &[2])?;

    let outputs = f.call(std::slice::from_ref(&x))?;
    assert_close(&outputs[0].to_vec::<f32>()?, &[2.0, 4.0]);

    let (_, vjps) = vjp(f.as_ref(), &[x.clone()], &[ops::ones_like(&x)])?;
    assert_close(&vjps[0].to_vec::<f32>()?, &[10.0, 10.0]);
    Ok(())
}

#[test]
fn stop_gradient_blocks_flow() -> Result<()> {
    setup();
    let f: Unary = Arc::new(|x: &Array| ops::multiply(&ops::stop_gradient(x), x));
    let g = grad_unary(f).call(&Array::scalar(3.0f32))?;
    assert_eq!(g.item::<f32>(true)?, 3.0);
    Ok(())
}

#[test]
fn callable_failures_propagate_unchanged() -> Result<()> {
    setup();
    let f: Unary = Arc::new(|_: &Array| -> nabla::Result<Array> {
        Err(Exception::External {
            code: 42,
            message: "user callback failed".into(),
        })
    });
    let err = grad_unary(f).call(&Array::scalar(1.0f32)).unwrap_err();
    assert!(matches!(err, Exception::External { code: 42, .. }));
    Ok(())
}

#[test]
fn broadcasting_and_reductions_differentiate() -> Result<()> {
    setup();
    let f: Multiary = Arc::new(|xs: &[Array]| -> nabla::Result<Vec<Array>> {
        let y = ops::add(&xs[0], &xs[1])?;
        Ok(vec![ops::sum(&ops::square(&y)?, &[], false)?])
    });
    let a = Array::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2])?;
    let b = Array::from_vec(vec![1.0f32, -1.0], &[2])?;
    let (_, grads) = value_and_grad(f, &[0, 1])?.call(&[a, b])?;
    assert_close(&grads[0].to_vec::<f32>()?, &[4.0, 2.0, 8.0, 6.0]);
    assert_eq!(grads[1].shape(), &[2]);
    assert_close(&grads[1].to_vec::<f32>()?, &[12.0, 8.0]);
    Ok(())
}
