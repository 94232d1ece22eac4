//! FFI-safe optional arrays.

use nabla::{Array, Exception, Result};

use crate::handle::{ArrayHandle, Handle};

pub const NABLA_OPTIONAL_ABSENT: u32 = 0;
pub const NABLA_OPTIONAL_PRESENT: u32 = 1;

/// An array handle that may be absent. `handle` is ignored when absent.
///
/// `tag` is a plain integer so any value a caller writes is representable;
/// tags other than the two constants above are rejected on use.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionalArray {
    pub tag: u32,
    pub handle: ArrayHandle,
}

impl OptionalArray {
    pub const ABSENT: OptionalArray = OptionalArray {
        tag: NABLA_OPTIONAL_ABSENT,
        handle: ArrayHandle {
            index: 0,
            generation: 0,
        },
    };

    pub fn present(handle: ArrayHandle) -> Self {
        OptionalArray {
            tag: NABLA_OPTIONAL_PRESENT,
            handle,
        }
    }
}

/// The referenced array when present. A present but stale handle, or a tag
/// that is neither absent nor present, is an `InvalidArgument`.
pub fn to_std_optional(value: &OptionalArray) -> Result<Option<Array>> {
    match value.tag {
        NABLA_OPTIONAL_ABSENT => Ok(None),
        NABLA_OPTIONAL_PRESENT => value.handle.get().map(Some),
        tag => Err(Exception::invalid(format!("unknown optional tag {tag}"))),
    }
}

/// Inserts a present value into the array table.
pub fn from_std_optional(value: Option<Array>) -> OptionalArray {
    match value {
        Some(array) => OptionalArray::present(ArrayHandle::insert(array)),
        None => OptionalArray::ABSENT,
    }
}

#[no_mangle]
pub extern "C" fn nabla_optional_array_absent() -> OptionalArray {
    OptionalArray::ABSENT
}

#[no_mangle]
pub extern "C" fn nabla_optional_array_present(handle: ArrayHandle) -> OptionalArray {
    OptionalArray::present(handle)
}
