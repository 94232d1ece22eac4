//! Generational handle tables backing every value the caller holds.
//!
//! A handle is a slot index plus the generation the slot had when the value
//! was inserted. Freeing a slot bumps its generation, so a stale handle never
//! aliases a newer value.

use std::sync::{Arc, Mutex, PoisonError};

use nabla::random::KeySequence;
use nabla::{Array, Exception, Result};
use once_cell::sync::Lazy;

use crate::callable::Callable;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub(crate) struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> HandleTable<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Stores `value` and returns its `(index, generation)`. Generations start
    /// at 1, so `(0, 0)` is never issued.
    pub(crate) fn insert(&mut self, value: T) -> (u32, u32) {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return (index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });
        (index, 1)
    }

    pub(crate) fn get(&self, index: u32, generation: u32) -> Option<&T> {
        self.slots
            .get(index as usize)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub(crate) fn get_mut(&mut self, index: u32, generation: u32) -> Option<&mut T> {
        self.slots
            .get_mut(index as usize)
            .filter(|slot| slot.generation == generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub(crate) fn remove(&mut self, index: u32, generation: u32) -> Option<T> {
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free.push(index);
        Some(value)
    }

    pub(crate) fn live(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }
}

/// A `#[repr(C)]` handle type with its process-wide table.
pub(crate) trait Handle: Copy + Sized {
    type Value: Clone + 'static;
    const KIND: &'static str;

    fn table() -> &'static Mutex<HandleTable<Self::Value>>;
    fn from_parts(index: u32, generation: u32) -> Self;
    fn parts(self) -> (u32, u32);

    fn insert(value: Self::Value) -> Self {
        let (index, generation) = Self::table()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(value);
        Self::from_parts(index, generation)
    }

    fn stale(self) -> Exception {
        let (index, generation) = self.parts();
        log::debug!("rejecting stale {} handle {index}:{generation}", Self::KIND);
        Exception::invalid(format!(
            "{} handle {index}:{generation} is stale or was never issued",
            Self::KIND
        ))
    }

    /// Clone of the referenced value; the table keeps ownership.
    fn get(self) -> Result<Self::Value> {
        let (index, generation) = self.parts();
        let value = Self::table()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(index, generation)
            .cloned();
        value.ok_or_else(|| self.stale())
    }

    /// Removes the value, ending the handle's life.
    fn take(self) -> Result<Self::Value> {
        let (index, generation) = self.parts();
        let value = Self::table()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(index, generation);
        // the guard is gone before the value drops, so destructors may re-enter
        value.ok_or_else(|| self.stale())
    }
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $value:ty, $kind:literal, $table:ident) => {
        $(#[$meta])*
        #[repr(C)]
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub struct $name {
            pub index: u32,
            pub generation: u32,
        }

        static $table: Lazy<Mutex<HandleTable<$value>>> =
            Lazy::new(|| Mutex::new(HandleTable::new()));

        impl Handle for $name {
            type Value = $value;
            const KIND: &'static str = $kind;

            fn table() -> &'static Mutex<HandleTable<$value>> {
                &$table
            }

            fn from_parts(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            fn parts(self) -> (u32, u32) {
                (self.index, self.generation)
            }
        }
    };
}

define_handle!(
    /// Owned reference to one array.
    ArrayHandle,
    Array,
    "array",
    ARRAYS
);
define_handle!(
    /// Owned sequence of arrays.
    VectorHandle,
    Vec<Array>,
    "vector",
    VECTORS
);
define_handle!(
    /// Owned callable of any call shape.
    CallableHandle,
    Callable,
    "callable",
    CALLABLES
);
define_handle!(
    /// Owned key sequence. Clones of the value share one position, so every
    /// draw through the handle advances it.
    KeySequenceHandle,
    Arc<Mutex<KeySequence>>,
    "key sequence",
    KEY_SEQUENCES
);

/// Inserts `value` and writes its handle through `out`. A null `out` is
/// rejected before the table is touched, so a failed call leaves no entry.
///
/// # Safety
/// `out` must be null or valid for a write of `H`.
pub(crate) unsafe fn emit_new<H: Handle>(out: *mut H, value: H::Value) -> Result<()> {
    if out.is_null() {
        return Err(Exception::invalid("output pointer is null"));
    }
    unsafe { out.write(H::insert(value)) };
    Ok(())
}

/// An input handle lent to a callback. The bridge frees it when the call
/// returns, whether or not the callback already did.
pub(crate) struct Lent<H: Handle>(pub(crate) H);

impl<H: Handle> Lent<H> {
    pub(crate) fn new(value: H::Value) -> Self {
        Lent(H::insert(value))
    }
}

impl<H: Handle> Drop for Lent<H> {
    fn drop(&mut self) {
        let _ = self.0.take();
    }
}

/// Number of live entries in each table as `(arrays, vectors, callables)`.
pub(crate) fn live_counts() -> (usize, usize, usize) {
    fn count<H: Handle>() -> usize {
        H::table().lock().unwrap_or_else(PoisonError::into_inner).live()
    }
    (
        count::<ArrayHandle>(),
        count::<VectorHandle>(),
        count::<CallableHandle>(),
    )
}

#[cfg(test)]
mod tests {
    use super::HandleTable;

    #[test]
    fn freed_slots_are_reused_with_a_new_generation() {
        let mut table = HandleTable::new();
        let (a, gen_a) = table.insert("a");
        assert_eq!(table.get(a, gen_a), Some(&"a"));
        assert_eq!(table.remove(a, gen_a), Some("a"));
        assert_eq!(table.get(a, gen_a), None);
        assert_eq!(table.remove(a, gen_a), None);

        let (b, gen_b) = table.insert("b");
        assert_eq!(b, a);
        assert_ne!(gen_b, gen_a);
        assert_eq!(table.get(a, gen_a), None);
        assert_eq!(table.get(b, gen_b), Some(&"b"));
        assert_eq!(table.live(), 1);
    }

    #[test]
    fn zero_handle_is_never_issued() {
        let mut table = HandleTable::new();
        let (index, generation) = table.insert(1);
        assert_eq!(index, 0);
        assert_ne!(generation, 0);
        assert_eq!(table.get(0, 0), None);
    }
}
