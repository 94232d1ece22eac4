use std::fmt;

use serde::{Deserialize, Serialize};

/// Scalar element types an [`Array`](crate::Array) can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float16,
    Bfloat16,
    Float32,
    Complex64,
}

impl DType {
    pub const ALL: [DType; 13] = [
        DType::Bool,
        DType::Uint8,
        DType::Uint16,
        DType::Uint32,
        DType::Uint64,
        DType::Int8,
        DType::Int16,
        DType::Int32,
        DType::Int64,
        DType::Float16,
        DType::Bfloat16,
        DType::Float32,
        DType::Complex64,
    ];

    pub fn is_bool(self) -> bool {
        self == DType::Bool
    }

    /// Returns `true` for signed and unsigned integers (bool excluded).
    pub fn is_integer(self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer()
    }

    pub fn is_signed_integer(self) -> bool {
        matches!(
            self,
            DType::Int8 | DType::Int16 | DType::Int32 | DType::Int64
        )
    }

    pub fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            DType::Uint8 | DType::Uint16 | DType::Uint32 | DType::Uint64
        )
    }

    /// Returns `true` for real floating point types.
    pub fn is_float(self) -> bool {
        matches!(self, DType::Float16 | DType::Bfloat16 | DType::Float32)
    }

    pub fn is_complex(self) -> bool {
        self == DType::Complex64
    }

    /// Floating or complex: the types gradients are defined for.
    pub fn is_inexact(self) -> bool {
        self.is_float() || self.is_complex()
    }

    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::Bool | DType::Uint8 | DType::Int8 => 1,
            DType::Uint16 | DType::Int16 | DType::Float16 | DType::Bfloat16 => 2,
            DType::Uint32 | DType::Int32 | DType::Float32 => 4,
            DType::Uint64 | DType::Int64 | DType::Complex64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Uint8 => "uint8",
            DType::Uint16 => "uint16",
            DType::Uint32 => "uint32",
            DType::Uint64 => "uint64",
            DType::Int8 => "int8",
            DType::Int16 => "int16",
            DType::Int32 => "int32",
            DType::Int64 => "int64",
            DType::Float16 => "float16",
            DType::Bfloat16 => "bfloat16",
            DType::Float32 => "float32",
            DType::Complex64 => "complex64",
        }
    }

    /// Largest value strictly below one, for floating types.
    pub(crate) fn one_minus_ulp(self) -> Option<f64> {
        match self {
            DType::Float16 => Some(1.0 - 2f64.powi(-11)),
            DType::Bfloat16 => Some(1.0 - 2f64.powi(-8)),
            DType::Float32 => Some(1.0 - 2f64.powi(-24)),
            _ => None,
        }
    }

    fn integer_width(self) -> usize {
        self.size_in_bytes() * 8
    }

    fn signed_of_width(bits: usize) -> Option<DType> {
        match bits {
            8 => Some(DType::Int8),
            16 => Some(DType::Int16),
            32 => Some(DType::Int32),
            64 => Some(DType::Int64),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result type of a binary operation between `a` and `b`.
///
/// Follows the usual lattice: bool < unsigned < signed < floating < complex.
/// Mixing an unsigned and a signed integer yields the next wider signed type,
/// and `uint64` with any signed type falls back to `float32`.
pub fn promote_types(a: DType, b: DType) -> DType {
    use DType::*;

    if a == b {
        return a;
    }
    if a.is_complex() || b.is_complex() {
        return Complex64;
    }
    match (a.is_float(), b.is_float()) {
        (true, true) => return Float32,
        (true, false) => return a,
        (false, true) => return b,
        (false, false) => {}
    }
    if a == Bool {
        return b;
    }
    if b == Bool {
        return a;
    }
    let (wa, wb) = (a.integer_width(), b.integer_width());
    match (a.is_signed_integer(), b.is_signed_integer()) {
        (true, true) | (false, false) => {
            if wa >= wb {
                a
            } else {
                b
            }
        }
        (signed_a, _) => {
            let (unsigned, signed) = if signed_a { (b, a) } else { (a, b) };
            if unsigned.integer_width() < signed.integer_width() {
                signed
            } else {
                DType::signed_of_width(unsigned.integer_width() * 2).unwrap_or(Float32)
            }
        }
    }
}
