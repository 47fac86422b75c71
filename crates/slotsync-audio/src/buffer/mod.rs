//! Fixed slot storage shared between synchronizers and drivers.

pub mod slots;

pub use slots::{shared_slot_store, SharedSlotStore, SlotStore};
