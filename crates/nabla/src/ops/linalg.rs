use crate::array::Array;
use crate::backend::{ArraySpec, Primitive};
use crate::dtype::promote_types;
use crate::error::{Exception, Result};
use crate::shape::broadcast_shapes;

use super::elementwise::astype;
use super::shape::{broadcast_to, expand_dims, squeeze};

/// Matrix product with numpy semantics: leading axes broadcast, 1-d operands
/// are promoted to matrices and the added axis is removed again.
pub fn matmul(a: &Array, b: &Array) -> Result<Array> {
    if a.ndim() == 0 || b.ndim() == 0 {
        return Err(Exception::invalid("matmul operands must have at least one dimension"));
    }
    let lhs = if a.ndim() == 1 { expand_dims(a, 0)? } else { a.clone() };
    let rhs = if b.ndim() == 1 { expand_dims(b, -1)? } else { b.clone() };

    let (m, k) = (lhs.dim(lhs.ndim() - 2), lhs.dim(lhs.ndim() - 1));
    let (k2, n) = (rhs.dim(rhs.ndim() - 2), rhs.dim(rhs.ndim() - 1));
    if k != k2 {
        return Err(Exception::shape(format!(
            "matmul inner dimensions differ: {:?} @ {:?}",
            a.shape(),
            b.shape()
        )));
    }

    let batch = broadcast_shapes(
        &lhs.shape()[..lhs.ndim() - 2],
        &rhs.shape()[..rhs.ndim() - 2],
    )?;
    let dtype = promote_types(lhs.dtype(), rhs.dtype());
    let mut lhs_shape = batch.clone();
    lhs_shape.extend([m, k]);
    let mut rhs_shape = batch.clone();
    rhs_shape.extend([k, n]);
    let lhs = broadcast_to(&astype(&lhs, dtype)?, &lhs_shape)?;
    let rhs = broadcast_to(&astype(&rhs, dtype)?, &rhs_shape)?;

    let mut out_shape = batch;
    out_shape.extend([m, n]);
    let mut out = Array::from_primitive(
        Primitive::Matmul,
        ArraySpec::new(dtype, out_shape),
        lhs.stream(),
        vec![lhs, rhs],
    );
    if b.ndim() == 1 {
        out = squeeze(&out, -1)?;
    }
    if a.ndim() == 1 {
        let axis = if b.ndim() == 1 { -1 } else { -2 };
        out = squeeze(&out, axis)?;
    }
    Ok(out)
}
