use std::sync::Arc;

use anyhow::Result;
use nabla::transforms::{grad_unary, vmap, vmap_pair, vmap_unary, Multiary, Unary, UNMAPPED};
use nabla::{ops, Array, Exception};

fn setup() {
    nabla_backend_ref_cpu::install();
}

#[test]
fn vmap_over_rows_matches_per_row_results() -> Result<()> {
    setup();
    let row_norm: Unary = Arc::new(|x: &Array| ops::sum(&ops::square(x)?, &[], false));
    let batched = vmap_unary(Arc::clone(&row_norm), 0, 0);
    let x = Array::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2])?;

    let out = batched.call(&x)?;
    assert_eq!(out.shape(), &[3]);
    let expected: Vec<f32> = (0..3)
        .map(|i| row_norm.call(&ops::index_axis(&x, 0, i)?)?.item::<f32>(true))
        .collect::<nabla::Result<_>>()?;
    assert_eq!(out.to_vec::<f32>()?, expected);
    Ok(())
}

#[test]
fn vmap_maps_columns_and_places_outputs() -> Result<()> {
    setup();
    let identity: Unary = Arc::new(|x: &Array| ops::multiply(x, &ops::scalar_like(x, 2.0)));
    let x = Array::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3])?;
    let out = vmap_unary(identity, 1, 1).call(&x)?;
    assert_eq!(out.shape(), &[2, 3]);
    assert_eq!(out.to_vec::<f32>()?, vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);
    Ok(())
}

#[test]
fn unmapped_arguments_are_shared() -> Result<()> {
    setup();
    let add: Multiary = Arc::new(|xs: &[Array]| -> nabla::Result<Vec<Array>> {
        Ok(vec![ops::add(&xs[0], &xs[1])?])
    });
    let batched = vmap(add, &[0, UNMAPPED], &[]);
    let x = Array::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2])?;
    let bias = Array::from_vec(vec![10.0f32, 20.0], &[2])?;
    let out = batched.call(&[x, bias])?;
    assert_eq!(out[0].to_vec::<f32>()?, vec![11.0, 22.0, 13.0, 24.0]);
    Ok(())
}

#[test]
fn pair_vmap_with_distinct_axes() -> Result<()> {
    setup();
    let dot = Arc::new(|a: &Array, b: &Array| ops::sum(&ops::multiply(a, b)?, &[], false));
    let batched = vmap_pair(dot, 0, 1, 0);
    let a = Array::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2])?;
    let b = Array::from_vec(vec![1.0f32, 0.0, 0.0, 1.0], &[2, 2])?;
    let out = batched.call(&a, &b)?;
    assert_eq!(out.to_vec::<f32>()?, vec![1.0, 4.0]);
    Ok(())
}

#[test]
fn vmap_validates_axes() -> Result<()> {
    setup();
    let add: Multiary = Arc::new(|xs: &[Array]| -> nabla::Result<Vec<Array>> {
        Ok(vec![ops::add(&xs[0], &xs[1])?])
    });
    let x = Array::from_vec(vec![1.0f32, 2.0], &[2])?;
    let y = Array::from_vec(vec![1.0f32, 2.0, 3.0], &[3])?;

    let err = vmap(Arc::clone(&add), &[0, 0], &[]).call(&[x.clone(), y]).unwrap_err();
    assert!(matches!(err, Exception::InvalidArgument(_)));

    let err = vmap(Arc::clone(&add), &[0], &[]).call(&[x.clone(), x.clone()]).unwrap_err();
    assert!(matches!(err, Exception::InvalidArgument(_)));

    let err = vmap(add, &[UNMAPPED, UNMAPPED], &[]).call(&[x.clone(), x]).unwrap_err();
    assert!(matches!(err, Exception::InvalidArgument(_)));
    Ok(())
}

#[test]
fn vmap_composes_with_grad() -> Result<()> {
    setup();
    let square_sum: Unary = Arc::new(|x: &Array| ops::sum(&ops::square(x)?, &[], false));
    let per_example = vmap_unary(grad_unary(square_sum), 0, 0);
    let x = Array::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2])?;
    assert_eq!(per_example.call(&x)?.to_vec::<f32>()?, vec![2.0, 4.0, 6.0, 8.0]);
    Ok(())
}
