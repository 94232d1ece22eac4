use anyhow::Result;
use nabla::random;
use nabla::{ops, Array, DType, Exception, StreamOrDevice};

fn setup() -> StreamOrDevice {
    nabla_backend_ref_cpu::install();
    StreamOrDevice::Default
}

#[test]
fn same_key_same_bits() -> Result<()> {
    let s = setup();
    let key = random::key(42);
    let a = random::bits(&[16], 4, Some(&key), &s)?.to_vec::<u32>()?;
    let b = random::bits(&[16], 4, Some(&random::key(42)), &s)?.to_vec::<u32>()?;
    let c = random::bits(&[16], 4, Some(&random::key(43)), &s)?.to_vec::<u32>()?;
    assert_eq!(a, b);
    assert_ne!(a, c);
    Ok(())
}

#[test]
fn key_sequences_from_one_seed_agree() -> Result<()> {
    setup();
    let mut a = random::KeySequence::new(2024);
    let mut b = random::KeySequence::new(2024);
    let mut other = random::KeySequence::new(2025);
    let mut previous = Vec::new();
    for _ in 0..3 {
        let ka = a.next()?.to_vec::<u32>()?;
        assert_eq!(ka, b.next()?.to_vec::<u32>()?);
        assert_ne!(ka, other.next()?.to_vec::<u32>()?);
        assert_ne!(ka, previous, "each draw yields a fresh key");
        previous = ka;
    }
    Ok(())
}

#[test]
fn bits_are_prefix_consistent_across_widths() -> Result<()> {
    let s = setup();
    let key = random::key(7);
    let words = random::bits(&[3], 4, Some(&key), &s)?.to_vec::<u32>()?;
    let longer = random::bits(&[5], 4, Some(&key), &s)?.to_vec::<u32>()?;
    assert_eq!(words[..], longer[..3]);

    let halves = random::bits(&[2], 2, Some(&key), &s)?.to_vec::<u16>()?;
    assert_eq!(halves, vec![words[0] as u16, (words[0] >> 16) as u16]);

    let bytes = random::bits(&[4], 1, Some(&key), &s)?;
    assert_eq!(bytes.dtype(), DType::Uint8);
    assert_eq!(bytes.to_vec::<u8>()?, words[0].to_le_bytes().to_vec());
    Ok(())
}

#[test]
fn split_one_is_the_first_half_of_split() -> Result<()> {
    let s = setup();
    let key = random::key(42);
    let (first, second) = random::split(&key, &s)?;
    let single = random::split_n(&key, 1, &s)?;
    assert_eq!(single.shape(), &[1, 2]);
    assert_eq!(single.to_vec::<u32>()?, first.to_vec::<u32>()?);
    assert_ne!(first.to_vec::<u32>()?, second.to_vec::<u32>()?);

    let three = random::split_n(&key, 3, &s)?.to_vec::<u32>()?;
    let again = random::split_n(&random::key(42), 3, &s)?.to_vec::<u32>()?;
    assert_eq!(three, again);
    Ok(())
}

#[test]
fn uniform_stays_in_range() -> Result<()> {
    let s = setup();
    let key = random::key(0);
    let u = random::uniform_scalars(0.0f32, 1.0f32, &[2, 2], DType::Float32, Some(&key), &s)?;
    assert_eq!(u.shape(), &[2, 2]);
    assert_eq!(u.dtype(), DType::Float32);
    assert!(u.to_vec::<f32>()?.iter().all(|v| (0.0..1.0).contains(v)));

    let wide = random::uniform_scalars(-3.0f32, 5.0f32, &[256], DType::Float32, Some(&key), &s)?;
    assert!(wide.to_vec::<f32>()?.iter().all(|v| (-3.0..5.0).contains(v)));

    let half = random::uniform_scalars(0.0f32, 1.0f32, &[64], DType::Float16, Some(&key), &s)?;
    assert_eq!(half.dtype(), DType::Float16);
    assert!(half.to_f64_vec()?.iter().all(|v| (0.0..1.0).contains(v)));
    Ok(())
}

#[test]
fn global_sequence_is_reproducible_after_seed() -> Result<()> {
    let s = setup();
    random::seed(5);
    let a = random::uniform_scalars(0.0f32, 1.0f32, &[4], DType::Float32, None, &s)?.to_vec::<f32>()?;
    let b = random::uniform_scalars(0.0f32, 1.0f32, &[4], DType::Float32, None, &s)?.to_vec::<f32>()?;
    random::seed(5);
    let c = random::uniform_scalars(0.0f32, 1.0f32, &[4], DType::Float32, None, &s)?.to_vec::<f32>()?;
    assert_ne!(a, b);
    assert_eq!(a, c);
    Ok(())
}

#[test]
fn randint_draws_integers_in_range() -> Result<()> {
    let s = setup();
    let key = random::key(11);
    let r = random::randint_scalars(-2i32, 3i32, &[200], DType::Int32, Some(&key), &s)?;
    assert_eq!(r.dtype(), DType::Int32);
    let values = r.to_vec::<i32>()?;
    assert!(values.iter().all(|v| (-2..3).contains(v)));
    assert!(values.contains(&-2) && values.contains(&2));
    Ok(())
}

#[test]
fn bernoulli_follows_the_probability_shape() -> Result<()> {
    let s = setup();
    let key = random::key(3);
    let p = Array::from_vec(vec![0.0f32, 1.0], &[2])?;
    let draws = random::bernoulli(&p, None, Some(&key), &s)?;
    assert_eq!(draws.dtype(), DType::Bool);
    assert_eq!(draws.to_vec::<bool>()?, vec![false, true]);

    let shaped = random::bernoulli(&p, Some(&[3, 2][..]), Some(&key), &s)?;
    assert_eq!(shaped.shape(), &[3, 2]);

    let scalar = random::bernoulli_scalar(1u8, Some(&[4][..]), Some(&key), &s)?;
    assert_eq!(scalar.to_vec::<bool>()?, vec![true; 4]);

    let err = random::bernoulli(&p, Some(&[3][..]), Some(&key), &s).unwrap_err();
    assert!(matches!(err, Exception::InvalidArgument(_)));
    Ok(())
}

#[test]
fn normal_samples_look_standard() -> Result<()> {
    let s = setup();
    let key = random::key(1234);
    let x = random::normal(&[4096], DType::Float32, 0.0, 1.0, Some(&key), &s)?;
    let values = x.to_vec::<f32>()?;
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
    assert!(mean.abs() < 0.1, "mean {mean}");
    assert!((var - 1.0).abs() < 0.15, "variance {var}");
    assert!(values.iter().all(|v| v.is_finite()));

    let shifted = random::normal(&[2], DType::Float32, 10.0, 0.0, Some(&key), &s)?;
    assert_eq!(shifted.to_vec::<f32>()?, vec![10.0, 10.0]);
    Ok(())
}

#[test]
fn truncated_normal_respects_bounds() -> Result<()> {
    let s = setup();
    let key = random::key(9);
    let lower = Array::scalar(-0.5f32);
    let upper = Array::scalar(1.0f32);
    let x = random::truncated_normal(&lower, &upper, Some(&[512][..]), DType::Float32, Some(&key), &s)?;
    assert!(x.to_vec::<f32>()?.iter().all(|v| (-0.5..=1.0).contains(v)));
    Ok(())
}

#[test]
fn categorical_draws_are_valid_indices() -> Result<()> {
    let s = setup();
    let key = random::key(21);
    let logits = Array::from_vec(vec![0.0f32, 1.0, 2.0, -1.0, 0.5, 3.0], &[2, 3])?;

    let draws = random::categorical(&logits, -1, Some(&key), &s)?;
    assert_eq!(draws.shape(), &[2]);
    assert_eq!(draws.dtype(), DType::Uint32);
    assert!(draws.to_vec::<u32>()?.iter().all(|&i| i < 3));

    let many = random::categorical_num_samples(&logits, -1, 5, Some(&key), &s)?;
    assert_eq!(many.shape(), &[2, 5]);
    assert!(many.to_vec::<u32>()?.iter().all(|&i| i < 3));

    let shaped = random::categorical_with_shape(&logits, -1, &[4, 2], Some(&key), &s)?;
    assert_eq!(shaped.shape(), &[4, 2]);

    let certain = Array::from_vec(vec![-1e9f32, 0.0, -1e9], &[3])?;
    let picks = random::categorical_num_samples(&certain, 0, 8, Some(&key), &s)?;
    assert_eq!(picks.to_vec::<u32>()?, vec![1; 8]);
    Ok(())
}

#[test]
fn gumbel_is_finite() -> Result<()> {
    let s = setup();
    let g = random::gumbel(&[128], DType::Float32, Some(&random::key(2)), &s)?;
    assert!(g.to_vec::<f32>()?.iter().all(|v| v.is_finite()));
    let _ = ops::sum(&g, &[], false)?.item::<f32>(true)?;
    Ok(())
}
