//! Fixed-capacity slot store for buffer-queue audio.
//!
//! The store is allocated once at open and never grows. Ownership of a slot
//! moves between the synchronizer and the driver by protocol (a slot is
//! either free, queued with the driver, or holding data for the client), so
//! the per-slot locks below are never contended in correct use; they only
//! make the hand-off sound without `unsafe`.

use parking_lot::{Mutex, MutexGuard};
use slotsync_core::{Error, Result};
use std::sync::Arc;

/// An ordered pool of equal-capacity byte slots addressed modulo its length.
pub struct SlotStore {
    /// Slot storage, one boxed buffer per slot.
    slots: Box<[Mutex<Box<[u8]>>]>,
    /// Capacity of every slot in bytes.
    capacity: usize,
}

impl SlotStore {
    /// Allocate `count` zeroed slots of `capacity` bytes each.
    ///
    /// Allocation failure is reported instead of aborting the process.
    pub fn new(count: usize, capacity: usize) -> Result<Self> {
        if count == 0 || capacity == 0 {
            return Err(Error::InvalidArgument(format!(
                "slot store needs a non-zero shape, got {count} x {capacity} bytes"
            )));
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(count)
            .map_err(|e| Error::Allocation(format!("slot table: {e}")))?;

        for _ in 0..count {
            let mut bytes = Vec::new();
            bytes
                .try_reserve_exact(capacity)
                .map_err(|e| Error::Allocation(format!("slot of {capacity} bytes: {e}")))?;
            bytes.resize(capacity, 0u8);
            slots.push(Mutex::new(bytes.into_boxed_slice()));
        }

        Ok(Self {
            slots: slots.into_boxed_slice(),
            capacity,
        })
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Capacity of each slot in bytes.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index `offset` slots after `base`, wrapped to the store.
    pub fn index(&self, base: usize, offset: usize) -> usize {
        (base % self.len() + offset % self.len()) % self.len()
    }

    /// Copy `src` into a slot; returns the number of bytes copied.
    ///
    /// At most one slot capacity is copied.
    pub fn write(&self, index: usize, src: &[u8]) -> usize {
        let mut slot = self.lock(index);
        let len = src.len().min(self.capacity);
        slot[..len].copy_from_slice(&src[..len]);
        len
    }

    /// Copy a slot into `dst`; returns the number of bytes copied.
    pub fn read(&self, index: usize, dst: &mut [u8]) -> usize {
        let slot = self.lock(index);
        let len = dst.len().min(self.capacity);
        dst[..len].copy_from_slice(&slot[..len]);
        len
    }

    /// Direct access to a slot's bytes, for drivers filling or draining it.
    pub fn lock(&self, index: usize) -> MutexGuard<'_, Box<[u8]>> {
        self.slots[index % self.slots.len()].lock()
    }
}

impl std::fmt::Debug for SlotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotStore")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Thread-safe reference to a slot store.
pub type SharedSlotStore = Arc<SlotStore>;

/// Create a new shared slot store.
pub fn shared_slot_store(count: usize, capacity: usize) -> Result<SharedSlotStore> {
    SlotStore::new(count, capacity).map(Arc::new)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_shape() {
        let store = SlotStore::new(5, 1920).unwrap();
        assert_eq!(store.len(), 5);
        assert_eq!(store.capacity(), 1920);
        assert!(!store.is_empty());
    }

    #[test]
    fn test_rejects_empty_shape() {
        assert!(matches!(
            SlotStore::new(0, 16),
            Err(Error::InvalidArgument(_))
        ));
        assert!(SlotStore::new(4, 0).is_err());
    }

    #[test]
    fn test_write_read() {
        let store = SlotStore::new(3, 4).unwrap();
        assert_eq!(store.write(1, &[1, 2, 3, 4]), 4);

        let mut out = [0u8; 4];
        assert_eq!(store.read(1, &mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);

        // Neighbours untouched
        store.read(0, &mut out);
        assert_eq!(out, [0; 4]);
    }

    #[test]
    fn test_write_truncates_to_capacity() {
        let store = SlotStore::new(2, 4).unwrap();
        assert_eq!(store.write(0, &[9; 10]), 4);

        let mut short = [0u8; 2];
        assert_eq!(store.read(0, &mut short), 2);
        assert_eq!(short, [9, 9]);
    }

    #[test]
    fn test_index_wraps() {
        let store = SlotStore::new(5, 1).unwrap();
        assert_eq!(store.index(3, 4), 2);
        assert_eq!(store.index(7, 0), 2);
        store.write(6, &[42]);
        assert_eq!(store.lock(1)[0], 42);
    }

    proptest! {
        #[test]
        fn index_always_in_range(len in 1usize..16, base in 0usize..1000, offset in 0usize..1000) {
            let store = SlotStore::new(len, 1).unwrap();
            let index = store.index(base, offset);
            prop_assert!(index < len);
            prop_assert_eq!(index, (base + offset) % len);
        }
    }
}
