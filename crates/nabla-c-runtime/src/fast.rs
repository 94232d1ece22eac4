//! Fused-style layers. Optional parameters arrive as [`OptionalArray`]s.

use nabla::fast;

use crate::array::emit_array;
use crate::handle::{ArrayHandle, Handle};
use crate::optional::{to_std_optional, OptionalArray};
use crate::status::{guard, NablaStatus};

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_fast_rms_norm(
    x: ArrayHandle,
    weight: ArrayHandle,
    eps: f32,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| emit_array(out, fast::rms_norm(&x.get()?, &weight.get()?, eps)?))
}

#[no_mangle]
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_fast_layer_norm(
    x: ArrayHandle,
    weight: OptionalArray,
    bias: OptionalArray,
    eps: f32,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let weight = to_std_optional(&weight)?;
        let bias = to_std_optional(&bias)?;
        emit_array(
            out,
            fast::layer_norm(&x.get()?, weight.as_ref(), bias.as_ref(), eps)?,
        )
    })
}

#[no_mangle]
/// Rotary embedding of the first `dims` features, positions starting at `offset`.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_fast_rope(
    x: ArrayHandle,
    dims: usize,
    traditional: bool,
    base: f32,
    scale: f32,
    offset: i32,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        emit_array(
            out,
            fast::rope(&x.get()?, dims, traditional, base, scale, offset)?,
        )
    })
}

#[no_mangle]
/// Attention over `[batch, heads, length, dim]` inputs. `k` and `v` may
/// carry fewer heads than `q` as long as they divide it.
///
/// # Safety
/// `out` must be valid for a write.
pub unsafe extern "C" fn nabla_fast_scaled_dot_product_attention(
    q: ArrayHandle,
    k: ArrayHandle,
    v: ArrayHandle,
    scale: f32,
    mask: OptionalArray,
    out: *mut ArrayHandle,
) -> NablaStatus {
    guard(|| {
        let mask = to_std_optional(&mask)?;
        let attended = fast::scaled_dot_product_attention(
            &q.get()?,
            &k.get()?,
            &v.get()?,
            scale,
            mask.as_ref(),
        )?;
        emit_array(out, attended)
    })
}
