//! Render pipeline: the client pushes PCM, the driver plays it out.
//!
//! Every enqueue is stamped with a tag from a monotonically increasing
//! counter. The driver's cumulative play index says how many buffers it has
//! finished, so a slot whose tag is at most the play index is free again.
//! `process` blocks while every slot is still queued.

use crate::buffer::{shared_slot_store, SharedSlotStore};
use crate::driver::{
    AudioDriver, BufferQueue, Direction, Endpoint, EndpointSpec, Engine, TransportState,
};
use parking_lot::{Condvar, Mutex};
use slotsync_core::{Error, PcmFormat, Result, SyncConfig};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

struct RenderState {
    /// Enqueue stamp per slot; 0 means never used.
    tags: Vec<u64>,
    /// Stamp for the next enqueue.
    next_tag: u64,
    /// Buffers the driver has finished playing.
    play_index: u64,
    endpoint: Option<Arc<dyn Endpoint>>,
    engine: Option<Box<dyn Engine>>,
    closed: bool,
}

impl RenderState {
    fn free_slot(&self) -> Option<usize> {
        self.tags.iter().position(|&tag| tag <= self.play_index)
    }
}

struct RenderShared {
    state: Mutex<RenderState>,
    slot_freed: Condvar,
    slots: SharedSlotStore,
}

impl RenderShared {
    /// Completion callback, run on the engine thread.
    fn on_slot_played(&self, queue: &dyn BufferQueue) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        match queue.state() {
            Ok(queue_state) => {
                state.play_index = queue_state.play_index;
                if queue_state.count == 0 {
                    state.tags[0] = 0;
                }
                trace!(play_index = state.play_index, "render slot played");
            }
            Err(e) => warn!("Render callback could not query queue: {e}"),
        }
        self.slot_freed.notify_all();
    }
}

/// Synchronizes client writes with a render endpoint's completion callback.
pub struct RenderSynchronizer {
    shared: Arc<RenderShared>,
    format: PcmFormat,
}

impl RenderSynchronizer {
    /// Open a render endpoint on `driver`. Nothing is queued until the
    /// first `process`.
    pub fn open(driver: &dyn AudioDriver, format: &PcmFormat, config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        format.validate()?;

        let capacity = format.slot_capacity(config.window());
        let slots = shared_slot_store(config.slot_count, capacity)?;

        let engine = driver.create_engine()?;
        let spec = EndpointSpec {
            direction: Direction::Render,
            format: *format,
            queue_len: config.slot_count,
        };
        let endpoint = match engine.create_endpoint(&spec, slots.clone()) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                engine.destroy();
                return Err(e);
            }
        };

        let this = Self {
            shared: Arc::new(RenderShared {
                state: Mutex::new(RenderState {
                    tags: vec![0; config.slot_count],
                    next_tag: 1,
                    play_index: 0,
                    endpoint: Some(endpoint.clone()),
                    engine: Some(engine),
                    closed: false,
                }),
                slot_freed: Condvar::new(),
                slots,
            }),
            format: *format,
        };

        let shared = this.shared.clone();
        endpoint.register_callback(Arc::new(move |queue: &dyn BufferQueue| {
            shared.on_slot_played(queue);
        }))?;

        info!(
            "Render opened: {format}, {} slots of {capacity} bytes",
            config.slot_count
        );
        Ok(this)
    }

    /// Start playback.
    pub fn start(&self) -> Result<()> {
        self.set_transport(TransportState::Playing)
    }

    /// Stop playback. Queued slots are kept by the driver.
    pub fn stop(&self) -> Result<()> {
        self.set_transport(TransportState::Stopped)
    }

    fn set_transport(&self, transport: TransportState) -> Result<()> {
        let endpoint = self.shared.state.lock().endpoint.clone();
        let endpoint = endpoint.ok_or(Error::Closed)?;
        endpoint.set_transport_state(transport)?;
        debug!("Render transport: {transport:?}");
        Ok(())
    }

    /// Queue `data[offset..offset + length]` for playback, split into
    /// slot-sized chunks, blocking while no slot is free.
    ///
    /// Fails if the synchronizer is or becomes closed, or if the driver
    /// rejects a query or an enqueue. Chunks queued before a failure stay
    /// queued.
    pub fn process(&self, data: &[u8], offset: usize, length: usize) -> Result<()> {
        let end = offset
            .checked_add(length)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "range {offset}+{length} outside a {} byte buffer",
                    data.len()
                ))
            })?;
        let mut remaining = &data[offset..end];
        let capacity = self.shared.slots.capacity();

        let mut state = self.shared.state.lock();
        while !remaining.is_empty() {
            if state.closed {
                return Err(Error::Closed);
            }
            let endpoint = state.endpoint.clone().ok_or(Error::Closed)?;
            let transport = endpoint.transport_state()?;

            let Some(slot) = state.free_slot() else {
                trace!(?transport, "render queue full, waiting");
                self.shared.slot_freed.wait(&mut state);
                continue;
            };

            let len = remaining.len().min(capacity);
            self.shared.slots.write(slot, &remaining[..len]);
            endpoint.enqueue(slot, len)?;
            let tag = state.next_tag;
            state.tags[slot] = tag;
            state.next_tag += 1;
            remaining = &remaining[len..];
            trace!(slot, len, tag, "queued render slot");
        }
        Ok(())
    }

    /// Stop the driver, release the endpoint and engine, and wake any
    /// blocked writer. Idempotent.
    pub fn close(&self) {
        let (endpoint, engine) = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            self.shared.slot_freed.notify_all();
            (state.endpoint.take(), state.engine.take())
        };

        if let Some(endpoint) = endpoint {
            if let Err(e) = endpoint.set_transport_state(TransportState::Stopped) {
                debug!("Render stop during close failed: {e}");
            }
            endpoint.destroy();
        }
        if let Some(engine) = engine {
            engine.destroy();
        }
        info!("Render closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    pub fn slot_capacity(&self) -> usize {
        self.shared.slots.capacity()
    }

    pub fn slot_count(&self) -> usize {
        self.shared.slots.len()
    }

    pub const fn format(&self) -> &PcmFormat {
        &self.format
    }

    /// Enqueue stamp of every slot.
    pub fn tags(&self) -> Vec<u64> {
        self.shared.state.lock().tags.clone()
    }

    /// Last play index reported by the driver.
    pub fn play_index(&self) -> u64 {
        self.shared.state.lock().play_index
    }
}

impl Drop for RenderSynchronizer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Push-style renderer for a fixed format that opens lazily.
pub struct AudioRenderer {
    driver: Arc<dyn AudioDriver>,
    format: PcmFormat,
    config: SyncConfig,
    synchronizer: Mutex<Option<Arc<RenderSynchronizer>>>,
}

impl AudioRenderer {
    pub fn new(driver: Arc<dyn AudioDriver>, format: PcmFormat, config: SyncConfig) -> Self {
        Self {
            driver,
            format,
            config,
            synchronizer: Mutex::new(None),
        }
    }

    pub const fn format(&self) -> &PcmFormat {
        &self.format
    }

    /// Open the synchronizer if needed. Idempotent.
    pub fn open(&self) -> Result<()> {
        let mut synchronizer = self.synchronizer.lock();
        if synchronizer.is_none() {
            let opened =
                RenderSynchronizer::open(self.driver.as_ref(), &self.format, &self.config)?;
            *synchronizer = Some(Arc::new(opened));
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.synchronizer.lock().is_some()
    }

    /// Open if needed and start playback.
    pub fn start(&self) -> Result<()> {
        self.open()?;
        self.current()?.start()
    }

    pub fn stop(&self) -> Result<()> {
        match self.synchronizer.lock().clone() {
            Some(synchronizer) => synchronizer.stop(),
            None => Ok(()),
        }
    }

    /// Queue one buffer. A buffer tagged with a format must match the
    /// renderer's; empty buffers are accepted without touching the driver.
    pub fn process_buffer(&self, format: Option<&PcmFormat>, data: &[u8]) -> Result<()> {
        if let Some(format) = format {
            self.format.ensure_matches(format)?;
        }
        if data.is_empty() {
            return Ok(());
        }
        self.current()?.process(data, 0, data.len())
    }

    /// Close the synchronizer; a later `open` starts afresh.
    pub fn close(&self) {
        let synchronizer = self.synchronizer.lock().take();
        if let Some(synchronizer) = synchronizer {
            synchronizer.close();
        }
    }

    fn current(&self) -> Result<Arc<RenderSynchronizer>> {
        self.synchronizer.lock().clone().ok_or(Error::Closed)
    }
}
