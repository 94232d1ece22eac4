use half::{bf16, f16};
use num_complex::Complex32;

use crate::backend::ArrayData;
use crate::dtype::DType;

mod private {
    pub trait Sealed {}
}

/// Rust scalar types that map one-to-one onto a [`DType`].
pub trait ArrayElement: Copy + Send + Sync + 'static + private::Sealed {
    const DTYPE: DType;

    fn into_data(values: Vec<Self>) -> ArrayData;

    fn slice_of(data: &ArrayData) -> Option<&[Self]>;

    /// Real value of the scalar; complex values keep their real part.
    fn to_f64(self) -> f64;
}

macro_rules! impl_array_element {
    ($ty:ty, $variant:ident, |$v:ident| $to_f64:expr) => {
        impl private::Sealed for $ty {}

        impl ArrayElement for $ty {
            const DTYPE: DType = DType::$variant;

            fn into_data(values: Vec<Self>) -> ArrayData {
                ArrayData::$variant(values.into())
            }

            fn slice_of(data: &ArrayData) -> Option<&[Self]> {
                match data {
                    ArrayData::$variant(values) => Some(&values[..]),
                    _ => None,
                }
            }

            fn to_f64(self) -> f64 {
                let $v = self;
                $to_f64
            }
        }
    };
}

impl_array_element!(bool, Bool, |v| if v { 1.0 } else { 0.0 });
impl_array_element!(u8, Uint8, |v| v as f64);
impl_array_element!(u16, Uint16, |v| v as f64);
impl_array_element!(u32, Uint32, |v| v as f64);
impl_array_element!(u64, Uint64, |v| v as f64);
impl_array_element!(i8, Int8, |v| v as f64);
impl_array_element!(i16, Int16, |v| v as f64);
impl_array_element!(i32, Int32, |v| v as f64);
impl_array_element!(i64, Int64, |v| v as f64);
impl_array_element!(f16, Float16, |v| v.to_f64());
impl_array_element!(bf16, Bfloat16, |v| v.to_f64());
impl_array_element!(f32, Float32, |v| v as f64);
impl_array_element!(Complex32, Complex64, |v| v.re as f64);
