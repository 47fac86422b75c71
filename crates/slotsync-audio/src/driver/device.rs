//! Buffer-queue endpoints over cpal streams.
//!
//! cpal pulls and pushes samples through a data callback instead of a slot
//! queue, so each endpoint keeps a small FIFO of lent slots and the data
//! callback walks the front slot sample by sample. When a slot has been fully
//! filled (capture) or played (render) it is popped, the play index advances,
//! and the registered completion callback runs on cpal's audio thread.

use super::{
    AudioDriver, BufferQueue, Direction, Endpoint, EndpointSpec, Engine, QueueCallback,
    QueueState, TransportState,
};
use crate::buffer::SharedSlotStore;
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, Host, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use slotsync_core::{ByteOrder, Error, PcmFormat, Result, Signedness};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Bytes in one 16-bit sample.
const SAMPLE_BYTES: usize = 2;

/// Driver backed by the system's default cpal host.
#[derive(Debug, Clone, Default)]
pub struct CpalDriver {
    input_device: Option<String>,
    output_device: Option<String>,
}

impl CpalDriver {
    /// Use the host's default input and output devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture from the input device with this name.
    pub fn with_input_device(mut self, name: impl Into<String>) -> Self {
        self.input_device = Some(name.into());
        self
    }

    /// Render to the output device with this name.
    pub fn with_output_device(mut self, name: impl Into<String>) -> Self {
        self.output_device = Some(name.into());
        self
    }
}

impl AudioDriver for CpalDriver {
    fn create_engine(&self) -> Result<Box<dyn Engine>> {
        let host = cpal::default_host();
        debug!("Using audio host: {:?}", host.id());

        Ok(Box::new(CpalEngine {
            input_device: self.input_device.clone(),
            output_device: self.output_device.clone(),
            destroyed: AtomicBool::new(false),
        }))
    }
}

struct CpalEngine {
    input_device: Option<String>,
    output_device: Option<String>,
    destroyed: AtomicBool,
}

impl Engine for CpalEngine {
    fn create_endpoint(
        &self,
        spec: &EndpointSpec,
        slots: SharedSlotStore,
    ) -> Result<Arc<dyn Endpoint>> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(Error::driver("create endpoint", "engine destroyed"));
        }
        check_format(&spec.format)?;

        let queue = Arc::new(StreamQueue::new(spec.queue_len, slots));
        let device_name = match spec.direction {
            Direction::Capture => self.input_device.clone(),
            Direction::Render => self.output_device.clone(),
        };

        let (command_tx, command_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let worker_spec = *spec;
        let worker_queue = queue.clone();

        // The stream lives on its own thread (cpal::Stream is not Send)
        let worker = std::thread::Builder::new()
            .name(format!("slotsync-{:?}", spec.direction).to_lowercase())
            .spawn(move || {
                run_stream_worker(
                    worker_spec,
                    device_name,
                    worker_queue,
                    command_rx,
                    ready_tx,
                );
            })
            .map_err(|e| {
                Error::driver("create endpoint", format!("Failed to spawn stream thread: {e}"))
            })?;

        match ready_rx.recv() {
            Ok(Ok(name)) => {
                info!(
                    "Opened {:?} endpoint on {name}: {}",
                    spec.direction, spec.format
                );
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(Error::driver("create endpoint", "stream thread exited"));
            }
        }

        Ok(Arc::new(CpalEndpoint {
            queue,
            commands: command_tx,
            worker: Mutex::new(Some(worker)),
            transport: Mutex::new(TransportState::Stopped),
        }))
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            debug!("cpal engine destroyed");
        }
    }
}

fn check_format(format: &PcmFormat) -> Result<()> {
    format.validate()?;
    if format.bits_per_sample != 16 || format.signedness != Signedness::Signed {
        return Err(Error::UnsupportedFormat(format!(
            "cpal endpoints carry 16-bit signed PCM, got {format}"
        )));
    }
    Ok(())
}

/// Commands handled by the stream worker thread.
enum StreamCommand {
    Play(Sender<Result<()>>),
    Pause(Sender<Result<()>>),
    Shutdown,
}

fn run_stream_worker(
    spec: EndpointSpec,
    device_name: Option<String>,
    queue: Arc<StreamQueue>,
    commands: Receiver<StreamCommand>,
    ready: Sender<Result<String>>,
) {
    let stream = match build_stream(&spec, device_name.as_deref(), queue) {
        Ok((stream, name)) => {
            let _ = ready.send(Ok(name));
            stream
        }
        Err(e) => {
            error!("Failed to open {:?} stream: {e}", spec.direction);
            let _ = ready.send(Err(e));
            return;
        }
    };

    for command in commands {
        match command {
            StreamCommand::Play(reply) => {
                let _ = reply.send(
                    stream
                        .play()
                        .map_err(|e| Error::driver("start stream", e.to_string())),
                );
            }
            StreamCommand::Pause(reply) => {
                let _ = reply.send(
                    stream
                        .pause()
                        .map_err(|e| Error::driver("pause stream", e.to_string())),
                );
            }
            StreamCommand::Shutdown => break,
        }
    }

    drop(stream);
    debug!("{:?} stream worker exiting", spec.direction);
}

fn find_device(host: &Host, direction: Direction, name: Option<&str>) -> Result<Device> {
    let matches = |device: &Device| name.is_some_and(|n| device.name().is_ok_and(|d| d == n));

    let device = match (direction, name) {
        (Direction::Capture, None) => host.default_input_device(),
        (Direction::Render, None) => host.default_output_device(),
        (Direction::Capture, Some(_)) => host
            .input_devices()
            .map_err(|e| Error::driver("realize", format!("Failed to list devices: {e}")))?
            .find(matches),
        (Direction::Render, Some(_)) => host
            .output_devices()
            .map_err(|e| Error::driver("realize", format!("Failed to list devices: {e}")))?
            .find(matches),
    };

    device.ok_or_else(|| {
        Error::driver(
            "realize",
            format!(
                "No {} device found{}",
                match direction {
                    Direction::Capture => "input",
                    Direction::Render => "output",
                },
                name.map(|n| format!(" named {n}")).unwrap_or_default()
            ),
        )
    })
}

fn stream_error(err: cpal::StreamError) {
    error!("Audio stream error: {err}");
}

fn build_stream(
    spec: &EndpointSpec,
    device_name: Option<&str>,
    queue: Arc<StreamQueue>,
) -> Result<(Stream, String)> {
    let host = cpal::default_host();
    let device = find_device(&host, spec.direction, device_name)?;
    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let config = StreamConfig {
        channels: spec.format.channels,
        sample_rate: cpal::SampleRate(spec.format.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let order = spec.format.byte_order;

    let stream = match spec.direction {
        Direction::Capture => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| queue.capture(data, order),
            stream_error,
            None,
        ),
        Direction::Render => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| queue.render(data, order),
            stream_error,
            None,
        ),
    }
    .map_err(|e| Error::driver("realize", format!("Failed to build stream: {e}")))?;

    // Some hosts start streams on creation; endpoints begin stopped
    if let Err(e) = stream.pause() {
        debug!("Initial pause not supported: {e}");
    }

    Ok((stream, name))
}

#[derive(Default)]
struct PendingSlots {
    /// Lent `(slot, len)` pairs; the front one is being filled or played.
    entries: VecDeque<(usize, usize)>,
    /// Byte position inside the front slot.
    cursor: usize,
    play_index: u64,
}

/// Slot FIFO shared between an endpoint handle and cpal's data callback.
struct StreamQueue {
    slots: SharedSlotStore,
    queue_len: usize,
    pending: Mutex<PendingSlots>,
    callback: Mutex<Option<QueueCallback>>,
    /// Samples that arrived (capture) or were requested (render) while no
    /// slot was queued.
    starved_samples: AtomicU64,
}

impl StreamQueue {
    fn new(queue_len: usize, slots: SharedSlotStore) -> Self {
        Self {
            slots,
            queue_len,
            pending: Mutex::new(PendingSlots {
                entries: VecDeque::with_capacity(queue_len),
                ..PendingSlots::default()
            }),
            callback: Mutex::new(None),
            starved_samples: AtomicU64::new(0),
        }
    }

    /// Copy captured samples into queued slots.
    fn capture(&self, mut data: &[i16], order: ByteOrder) {
        while !data.is_empty() {
            let completed = {
                let mut pending = self.pending.lock();
                let Some(&(slot, len)) = pending.entries.front() else {
                    self.starved_samples
                        .fetch_add(data.len() as u64, Ordering::Relaxed);
                    return;
                };

                let mut bytes = self.slots.lock(slot);
                let mut cursor = pending.cursor;
                let mut taken = 0;
                while cursor + SAMPLE_BYTES <= len && taken < data.len() {
                    let encoded = match order {
                        ByteOrder::Little => data[taken].to_le_bytes(),
                        ByteOrder::Big => data[taken].to_be_bytes(),
                    };
                    bytes[cursor..cursor + SAMPLE_BYTES].copy_from_slice(&encoded);
                    cursor += SAMPLE_BYTES;
                    taken += 1;
                }
                drop(bytes);
                data = &data[taken..];

                self.advance(&mut pending, cursor, len)
            };

            if completed {
                self.notify();
            }
        }
    }

    /// Fill `data` from queued slots, padding with silence on underrun.
    fn render(&self, data: &mut [i16], order: ByteOrder) {
        let mut written = 0;
        while written < data.len() {
            let completed = {
                let mut pending = self.pending.lock();
                let Some(&(slot, len)) = pending.entries.front() else {
                    break;
                };

                let bytes = self.slots.lock(slot);
                let mut cursor = pending.cursor;
                while cursor + SAMPLE_BYTES <= len && written < data.len() {
                    let raw = [bytes[cursor], bytes[cursor + 1]];
                    data[written] = match order {
                        ByteOrder::Little => i16::from_le_bytes(raw),
                        ByteOrder::Big => i16::from_be_bytes(raw),
                    };
                    cursor += SAMPLE_BYTES;
                    written += 1;
                }
                drop(bytes);

                self.advance(&mut pending, cursor, len)
            };

            if completed {
                self.notify();
            }
        }

        if written < data.len() {
            self.starved_samples
                .fetch_add((data.len() - written) as u64, Ordering::Relaxed);
            data[written..].fill(0);
        }
    }

    /// Store the cursor, popping the front slot once it is used up.
    fn advance(&self, pending: &mut PendingSlots, cursor: usize, len: usize) -> bool {
        if cursor + SAMPLE_BYTES > len {
            pending.entries.pop_front();
            pending.cursor = 0;
            pending.play_index += 1;
            true
        } else {
            pending.cursor = cursor;
            false
        }
    }

    fn notify(&self) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            let queue: &dyn BufferQueue = self;
            callback(queue);
        }
    }
}

impl BufferQueue for StreamQueue {
    fn enqueue(&self, slot: usize, len: usize) -> Result<()> {
        if slot >= self.slots.len() || len > self.slots.capacity() {
            return Err(Error::driver("enqueue", "buffer outside the slot store"));
        }
        let mut pending = self.pending.lock();
        if pending.entries.len() >= self.queue_len {
            return Err(Error::driver("enqueue", "buffer queue full"));
        }
        pending.entries.push_back((slot, len));
        Ok(())
    }

    fn state(&self) -> Result<QueueState> {
        let pending = self.pending.lock();
        Ok(QueueState {
            count: pending.entries.len(),
            play_index: pending.play_index,
        })
    }
}

/// Handle to a cpal-backed endpoint.
struct CpalEndpoint {
    queue: Arc<StreamQueue>,
    commands: Sender<StreamCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    transport: Mutex<TransportState>,
}

impl CpalEndpoint {
    fn request(&self, make: fn(Sender<Result<()>>) -> StreamCommand) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(make(reply_tx))
            .map_err(|_| Error::driver("transport state", "stream thread stopped"))?;
        reply_rx
            .recv()
            .map_err(|_| Error::driver("transport state", "stream thread stopped"))?
    }
}

impl BufferQueue for CpalEndpoint {
    fn enqueue(&self, slot: usize, len: usize) -> Result<()> {
        self.queue.enqueue(slot, len)
    }

    fn state(&self) -> Result<QueueState> {
        self.queue.state()
    }
}

impl Endpoint for CpalEndpoint {
    fn register_callback(&self, callback: QueueCallback) -> Result<()> {
        *self.queue.callback.lock() = Some(callback);
        Ok(())
    }

    fn set_transport_state(&self, state: TransportState) -> Result<()> {
        match state {
            TransportState::Stopped => self.request(StreamCommand::Pause)?,
            TransportState::Playing | TransportState::Recording => {
                self.request(StreamCommand::Play)?;
            }
        }
        *self.transport.lock() = state;
        Ok(())
    }

    fn transport_state(&self) -> Result<TransportState> {
        Ok(*self.transport.lock())
    }

    fn destroy(&self) {
        let _ = self.commands.send(StreamCommand::Shutdown);
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("Stream worker panicked");
            }
        }
        self.queue.callback.lock().take();
        self.queue.pending.lock().entries.clear();
        *self.transport.lock() = TransportState::Stopped;

        let starved = self.queue.starved_samples.load(Ordering::Relaxed);
        if starved > 0 {
            debug!("Endpoint ran without a queued slot for {starved} samples");
        }
    }
}

/// List available input device names.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .input_devices()
        .map_err(|e| Error::driver("list devices", e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(devices)
}

/// List available output device names.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::driver("list devices", e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(devices)
}

/// Get the default input device name.
pub fn default_input_device_name() -> Option<String> {
    cpal::default_host()
        .default_input_device()
        .and_then(|d| d.name().ok())
}

/// Get the default output device name.
pub fn default_output_device_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| d.name().ok())
}
