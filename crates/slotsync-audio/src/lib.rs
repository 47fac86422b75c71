//! # slotsync-audio
//!
//! Moves fixed-size PCM slots between an audio driver's completion callback
//! and a client thread, in both directions.
//!
//! Features:
//! - Pre-allocated slot store shared with the driver
//! - Capture synchronizer with a bounded, one-window read wait
//! - Render synchronizer with sequence-tagged slot reuse and backpressure
//! - Mock driver for tests and a cpal-backed driver for real devices

pub mod buffer;
pub mod capture;
pub mod driver;
pub mod render;

pub use buffer::{shared_slot_store, SharedSlotStore, SlotStore};
pub use capture::{CaptureStream, CaptureSynchronizer};
pub use driver::{
    AudioDriver, BufferQueue, CpalDriver, Direction, Endpoint, EndpointSpec, Engine, MockDriver,
    QueueCallback, QueueState, TransportState,
};
pub use render::{AudioRenderer, RenderSynchronizer};
