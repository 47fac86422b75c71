//! Audio driver contract consumed by the synchronizers.
//!
//! A driver hands out an engine; the engine creates one buffer-queue
//! endpoint per stream direction. Slots are lent to the endpoint by index
//! with `enqueue`, and the endpoint reports progress by invoking the single
//! registered completion callback on its own (engine) thread.

pub mod device;
pub mod mock;

use crate::buffer::SharedSlotStore;
use slotsync_core::{PcmFormat, Result};
use std::sync::Arc;

pub use device::{
    default_input_device_name, default_output_device_name, list_input_devices, list_output_devices,
    CpalDriver,
};
pub use mock::{MockDriver, MockEndpoint, MockFault};

/// Direction of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Microphone samples flow from the driver to the client.
    Capture,
    /// Client samples flow to the driver for playback.
    Render,
}

/// Transport state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Recording,
}

/// Snapshot of an endpoint's buffer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueState {
    /// Slots currently owned by the driver.
    pub count: usize,
    /// Cumulative index of the buffer the driver is working on; equals the
    /// number of buffers it has completed since creation.
    pub play_index: u64,
}

/// What an engine needs to create an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSpec {
    pub direction: Direction,
    pub format: PcmFormat,
    /// Maximum number of slots the endpoint may hold at once.
    pub queue_len: usize,
}

/// The part of an endpoint a completion callback may touch.
pub trait BufferQueue: Send + Sync {
    /// Lend slot `slot` to the driver; `len` bytes are valid (render) or
    /// requested (capture).
    fn enqueue(&self, slot: usize, len: usize) -> Result<()>;

    /// Current queue state.
    fn state(&self) -> Result<QueueState>;
}

/// Completion callback, invoked on the engine thread with the queue that
/// completed a slot.
pub type QueueCallback = Arc<dyn Fn(&dyn BufferQueue) + Send + Sync>;

/// A realized input or output endpoint.
pub trait Endpoint: BufferQueue {
    /// Register the completion callback, replacing any previous one.
    fn register_callback(&self, callback: QueueCallback) -> Result<()>;

    fn set_transport_state(&self, state: TransportState) -> Result<()>;

    fn transport_state(&self) -> Result<TransportState>;

    /// Raise the input gain to its maximum, where the endpoint has one.
    fn maximize_input_gain(&self) -> Result<()> {
        Ok(())
    }

    /// Stop the endpoint and release its driver resources. No callback
    /// runs once this returns. Idempotent.
    fn destroy(&self);
}

/// A realized audio engine.
pub trait Engine: Send + Sync {
    fn create_endpoint(
        &self,
        spec: &EndpointSpec,
        slots: SharedSlotStore,
    ) -> Result<Arc<dyn Endpoint>>;

    /// Release the engine. Idempotent.
    fn destroy(&self);
}

/// Entry point of an audio backend.
pub trait AudioDriver: Send + Sync {
    /// Create and realize an engine.
    fn create_engine(&self) -> Result<Box<dyn Engine>>;
}
