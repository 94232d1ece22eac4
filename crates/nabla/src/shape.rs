//! Shape and axis helpers shared by the op builders and the backends.

use smallvec::SmallVec;

use crate::error::{Exception, Result};

/// Compact representation of a normalized axis selection.
pub type Axes = SmallVec<[usize; 4]>;

/// Element count of a shape already validated by [`checked_element_count`].
/// Saturates instead of wrapping.
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().fold(1usize, |acc, &dim| acc.saturating_mul(dim))
}

/// Element count of a caller-supplied shape, rejecting counts that overflow.
pub fn checked_element_count(shape: &[usize]) -> Result<usize> {
    if shape.contains(&0) {
        return Ok(0);
    }
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| Exception::invalid(format!("shape {shape:?} has too many elements")))
}

/// Row-major strides, in elements.
pub fn row_major_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut acc = 1usize;
    for (i, dim) in shape.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}

pub fn unravel_index(mut index: usize, shape: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; shape.len()];
    for (i, dim) in shape.iter().enumerate().rev() {
        if *dim == 0 {
            continue;
        }
        coords[i] = index % *dim;
        index /= *dim;
    }
    coords
}

/// Numpy-style broadcast of two shapes, aligned on the trailing axis.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(Exception::shape(format!(
                    "shapes {a:?} and {b:?} cannot be broadcast"
                )))
            }
        };
    }
    Ok(out)
}

pub fn normalize_axis(axis: i32, ndim: usize) -> Result<usize> {
    let n = ndim as i64;
    let a = axis as i64;
    if a < -n || a >= n {
        return Err(Exception::invalid(format!(
            "axis {axis} is out of bounds for array with {ndim} dimensions"
        )));
    }
    Ok(if a < 0 { (a + n) as usize } else { a as usize })
}

/// Normalizes and deduplicates a list of axes. An empty list selects every axis.
pub fn normalize_axes(axes: &[i32], ndim: usize) -> Result<Axes> {
    if axes.is_empty() {
        return Ok((0..ndim).collect());
    }
    let mut out = Axes::new();
    for &axis in axes {
        let axis = normalize_axis(axis, ndim)?;
        if out.contains(&axis) {
            return Err(Exception::invalid(format!("duplicate axis {axis}")));
        }
        out.push(axis);
    }
    out.sort_unstable();
    Ok(out)
}

/// Resolves a caller-supplied shape that may hold a single `-1` placeholder.
pub fn resolve_shape(dims: &[i32], size: usize) -> Result<Vec<usize>> {
    let mut inferred = None;
    let mut known = 1usize;
    for (i, &dim) in dims.iter().enumerate() {
        match dim {
            -1 if inferred.is_none() => inferred = Some(i),
            -1 => return Err(Exception::invalid("only one dimension can be inferred")),
            d if d < 0 => {
                return Err(Exception::invalid(format!("negative dimension {d} in shape")))
            }
            d => known *= d as usize,
        }
    }
    let mut out: Vec<usize> = dims.iter().map(|&d| d.max(0) as usize).collect();
    if let Some(i) = inferred {
        if known == 0 || size % known != 0 {
            return Err(Exception::shape(format!(
                "cannot reshape array of size {size} into shape {dims:?}"
            )));
        }
        out[i] = size / known;
    }
    Ok(out)
}

/// Converts caller shapes to dimensions, rejecting negative sizes.
pub fn dims_from_i32(dims: &[i32]) -> Result<Vec<usize>> {
    dims.iter()
        .map(|&d| {
            usize::try_from(d)
                .map_err(|_| Exception::invalid(format!("negative dimension {d} in shape")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_aligns_trailing_axes() {
        assert_eq!(broadcast_shapes(&[2, 1], &[3]).unwrap(), vec![2, 3]);
        assert_eq!(broadcast_shapes(&[], &[4, 5]).unwrap(), vec![4, 5]);
        assert!(matches!(
            broadcast_shapes(&[2], &[3]),
            Err(Exception::ShapeMismatch(_))
        ));
    }

    #[test]
    fn negative_axes_wrap() {
        assert_eq!(normalize_axis(-1, 3).unwrap(), 2);
        assert!(normalize_axis(3, 3).is_err());
        assert_eq!(normalize_axes(&[], 2).unwrap().as_slice(), &[0, 1]);
        assert!(normalize_axes(&[0, -2], 2).is_err());
    }

    #[test]
    fn overflowing_shapes_are_rejected() {
        let huge = 1usize << 32;
        assert_eq!(checked_element_count(&[2, 3, 4]).unwrap(), 24);
        assert_eq!(checked_element_count(&[huge, huge, 0]).unwrap(), 0);
        assert!(matches!(
            checked_element_count(&[huge, huge]),
            Err(Exception::InvalidArgument(_))
        ));
        assert_eq!(element_count(&[huge, huge]), usize::MAX);
    }

    #[test]
    fn reshape_infers_placeholder() {
        assert_eq!(resolve_shape(&[-1, 4], 12).unwrap(), vec![3, 4]);
        assert!(resolve_shape(&[-1, -1], 12).is_err());
        assert!(resolve_shape(&[-1, 5], 12).is_err());
    }
}
