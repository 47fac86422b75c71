//! Capture pipeline: driver fills slots, the client reads them out.
//!
//! All slots are lent to the driver at open. Every slot is in exactly one
//! role: free, lent to the driver, or filled and awaiting a read. The driver
//! completes lent slots in the order they were enqueued, so each completion
//! moves the oldest lent slot to the back of the unread queue; a client
//! `read` copies the oldest unread slot out and frees it. Only free slots are
//! ever handed back to the driver. When every slot but the one being filled
//! is unread, the oldest unread slot is dropped so the driver always has a
//! slot to fill.

use crate::buffer::{shared_slot_store, SharedSlotStore};
use crate::driver::{
    AudioDriver, BufferQueue, Direction, Endpoint, EndpointSpec, Engine, TransportState,
};
use parking_lot::{Condvar, Mutex};
use slotsync_core::{Error, PcmFormat, Result, SyncConfig};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotRole {
    Free,
    Lent,
    Unread,
}

/// Bookkeeping guarded by the synchronizer lock.
struct CaptureState {
    roles: Vec<SlotRole>,
    /// Slots held by the driver, in the order they will be completed.
    lent: VecDeque<usize>,
    /// Filled slots, oldest first.
    unread: VecDeque<usize>,
    /// Slot after the last one read or dropped; where free slots are
    /// looked for first.
    read_cursor: usize,
    endpoint: Option<Arc<dyn Endpoint>>,
    engine: Option<Box<dyn Engine>>,
    closed: bool,
}

impl CaptureState {
    fn new(slot_count: usize, endpoint: Arc<dyn Endpoint>, engine: Box<dyn Engine>) -> Self {
        Self {
            roles: vec![SlotRole::Free; slot_count],
            lent: VecDeque::with_capacity(slot_count),
            unread: VecDeque::with_capacity(slot_count),
            read_cursor: 0,
            endpoint: Some(endpoint),
            engine: Some(engine),
            closed: false,
        }
    }

    /// Move `completed` slots from the front of the lent queue to the
    /// unread queue, dropping the oldest unread slots past `max_unread`.
    fn complete(&mut self, completed: usize, max_unread: usize) {
        for _ in 0..completed {
            let Some(slot) = self.lent.pop_front() else {
                break;
            };
            self.roles[slot] = SlotRole::Unread;
            self.unread.push_back(slot);
        }
        while self.unread.len() > max_unread {
            if let Some(dropped) = self.unread.pop_front() {
                self.roles[dropped] = SlotRole::Free;
                self.read_cursor = (dropped + 1) % self.roles.len();
                trace!(slot = dropped, "capture overrun, dropped oldest slot");
            }
        }
    }

    /// Lend every free slot to the driver, starting at the read cursor. A
    /// slot the driver refuses stays free and is offered again next time.
    fn lend_free<Q: BufferQueue + ?Sized>(&mut self, queue: &Q, capacity: usize) {
        let count = self.roles.len();
        for offset in 0..count {
            let slot = (self.read_cursor + offset) % count;
            if self.roles[slot] != SlotRole::Free {
                continue;
            }
            match queue.enqueue(slot, capacity) {
                Ok(()) => {
                    self.roles[slot] = SlotRole::Lent;
                    self.lent.push_back(slot);
                }
                Err(e) => warn!(slot, "Capture re-enqueue failed: {e}"),
            }
        }
    }
}

struct CaptureShared {
    state: Mutex<CaptureState>,
    data_ready: Condvar,
    slots: SharedSlotStore,
}

impl CaptureShared {
    /// Completion callback, run on the engine thread.
    fn on_slot_filled(&self, queue: &dyn BufferQueue) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        let queue_state = match queue.state() {
            Ok(queue_state) => queue_state,
            Err(e) => {
                warn!("Capture callback could not query queue: {e}");
                return;
            }
        };

        // Whatever the driver no longer holds has been filled
        let completed = state.lent.len().saturating_sub(queue_state.count);
        state.complete(completed, self.slots.len() - 1);
        if completed > 0 {
            self.data_ready.notify_one();
        }

        state.lend_free(queue, self.slots.capacity());
    }
}

/// Synchronizes a capture endpoint's completion callback with client reads.
pub struct CaptureSynchronizer {
    shared: Arc<CaptureShared>,
    window: Duration,
    format: PcmFormat,
}

impl CaptureSynchronizer {
    /// Open a capture endpoint on `driver` and lend it every slot.
    ///
    /// Anything acquired before a failure is released again.
    pub fn open(driver: &dyn AudioDriver, format: &PcmFormat, config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        format.validate()?;
        if config.slot_count < 2 {
            return Err(Error::Config(
                "capture needs at least two slots so the driver always has one to fill".into(),
            ));
        }

        let capacity = format.slot_capacity(config.window());
        let slots = shared_slot_store(config.slot_count, capacity)?;

        let engine = driver.create_engine()?;
        let spec = EndpointSpec {
            direction: Direction::Capture,
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
            shared: Arc::new(CaptureShared {
                state: Mutex::new(CaptureState::new(
                    config.slot_count,
                    endpoint.clone(),
                    engine,
                )),
                data_ready: Condvar::new(),
                slots,
            }),
            window: config.window(),
            format: *format,
        };

        // Dropping `this` on failure closes what was opened
        this.register(endpoint.as_ref())?;

        info!(
            "Capture opened: {format}, {} slots of {capacity} bytes",
            config.slot_count
        );
        Ok(this)
    }

    fn register(&self, endpoint: &dyn Endpoint) -> Result<()> {
        if let Err(e) = endpoint.maximize_input_gain() {
            debug!("Input gain left unchanged: {e}");
        }

        let shared = self.shared.clone();
        endpoint.register_callback(Arc::new(move |queue: &dyn BufferQueue| {
            shared.on_slot_filled(queue);
        }))?;

        let slots = &self.shared.slots;
        let mut state = self.shared.state.lock();
        for slot in 0..slots.len() {
            endpoint.enqueue(slot, slots.capacity())?;
            state.roles[slot] = SlotRole::Lent;
            state.lent.push_back(slot);
        }
        Ok(())
    }

    /// Start recording.
    pub fn start(&self) -> Result<()> {
        self.set_transport(TransportState::Recording)
    }

    /// Stop recording. Unread slots stay readable.
    pub fn stop(&self) -> Result<()> {
        self.set_transport(TransportState::Stopped)
    }

    fn set_transport(&self, transport: TransportState) -> Result<()> {
        let endpoint = self.shared.state.lock().endpoint.clone();
        let endpoint = endpoint.ok_or(Error::Closed)?;
        endpoint.set_transport_state(transport)?;
        debug!("Capture transport: {transport:?}");
        Ok(())
    }

    /// Copy the oldest unread slot into `buf[offset..]`.
    ///
    /// Exactly one slot capacity is copied regardless of `max_length`, so
    /// `max_length` must be at least [`slot_capacity`](Self::slot_capacity).
    /// When nothing is unread the call waits at most one slot window and
    /// returns `Ok(0)`; the caller retries. A closed synchronizer also
    /// reads 0 bytes.
    pub fn read(&self, buf: &mut [u8], offset: usize, max_length: usize) -> Result<usize> {
        let capacity = self.shared.slots.capacity();
        let end = offset
            .checked_add(max_length)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "range {offset}+{max_length} outside a {} byte buffer",
                    buf.len()
                ))
            })?;
        if max_length < capacity {
            return Err(Error::BufferTooSmall {
                needed: capacity,
                available: max_length,
            });
        }
        let dst = &mut buf[offset..end];

        let mut state = self.shared.state.lock();
        if state.closed {
            return Ok(0);
        }

        if let Some(slot) = state.unread.pop_front() {
            self.shared.slots.read(slot, &mut dst[..capacity]);
            state.roles[slot] = SlotRole::Free;
            state.read_cursor = self.shared.slots.index(slot, 1);
            trace!(slot, "read capture slot");

            // A driver left without slots never calls back to get more
            if state.lent.is_empty() {
                if let Some(endpoint) = state.endpoint.clone() {
                    state.lend_free(endpoint.as_ref(), capacity);
                }
            }
            return Ok(capacity);
        }

        // Nothing unread: wait one window for the driver, then let the
        // caller retry
        let deadline = Instant::now() + self.window;
        while state.unread.is_empty() && !state.closed {
            if self
                .shared
                .data_ready
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        Ok(0)
    }

    /// Stop the driver, release the endpoint and engine, and wake any
    /// blocked reader. Idempotent.
    pub fn close(&self) {
        let (endpoint, engine) = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.unread.clear();
            self.shared.data_ready.notify_all();
            (state.endpoint.take(), state.engine.take())
        };

        // The driver is torn down outside the lock so an in-flight callback
        // can finish and observe `closed`
        if let Some(endpoint) = endpoint {
            if let Err(e) = endpoint.set_transport_state(TransportState::Stopped) {
                debug!("Capture stop during close failed: {e}");
            }
            endpoint.destroy();
        }
        if let Some(engine) = engine {
            engine.destroy();
        }
        info!("Capture closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Bytes returned by every successful read.
    pub fn slot_capacity(&self) -> usize {
        self.shared.slots.capacity()
    }

    pub fn slot_count(&self) -> usize {
        self.shared.slots.len()
    }

    pub const fn format(&self) -> &PcmFormat {
        &self.format
    }

    /// Current `(written_index, written_count)`: the oldest unread slot
    /// (or where the next one will be read from) and the unread count.
    pub fn window(&self) -> (usize, usize) {
        let state = self.shared.state.lock();
        let index = state.unread.front().copied().unwrap_or(state.read_cursor);
        (index, state.unread.len())
    }

    /// Slots currently lent to the driver, in completion order.
    pub fn lent_slots(&self) -> Vec<usize> {
        self.shared.state.lock().lent.iter().copied().collect()
    }
}

impl Drop for CaptureSynchronizer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pull-style capture stream that opens its synchronizer on first start.
pub struct CaptureStream {
    driver: Arc<dyn AudioDriver>,
    format: PcmFormat,
    config: SyncConfig,
    inner: Mutex<StreamSlot>,
}

#[derive(Default)]
struct StreamSlot {
    synchronizer: Option<Arc<CaptureSynchronizer>>,
    started: bool,
}

impl CaptureStream {
    pub fn new(driver: Arc<dyn AudioDriver>, format: PcmFormat, config: SyncConfig) -> Self {
        Self {
            driver,
            format,
            config,
            inner: Mutex::new(StreamSlot::default()),
        }
    }

    /// Open the synchronizer if needed. Idempotent.
    pub fn connect(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.synchronizer.is_none() {
            let synchronizer =
                CaptureSynchronizer::open(self.driver.as_ref(), &self.format, &self.config)?;
            inner.synchronizer = Some(Arc::new(synchronizer));
        }
        Ok(())
    }

    /// Connect if needed and start recording.
    pub fn start(&self) -> Result<()> {
        self.connect()?;
        let mut inner = self.inner.lock();
        if let Some(synchronizer) = &inner.synchronizer {
            synchronizer.start()?;
            inner.started = true;
        }
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.started = false;
        match &inner.synchronizer {
            Some(synchronizer) => synchronizer.stop(),
            None => Ok(()),
        }
    }

    /// Close the synchronizer; a later `start` reopens it.
    pub fn disconnect(&self) {
        let synchronizer = {
            let mut inner = self.inner.lock();
            inner.started = false;
            inner.synchronizer.take()
        };
        if let Some(synchronizer) = synchronizer {
            synchronizer.close();
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().started
    }

    /// Read one slot of audio into `frame`, retrying while the stream is
    /// started. Returns an empty frame once the stream is stopped.
    pub fn read_frame(&self, frame: &mut Vec<u8>) -> Result<()> {
        loop {
            let synchronizer = {
                let inner = self.inner.lock();
                if !inner.started {
                    frame.clear();
                    return Ok(());
                }
                inner.synchronizer.clone().ok_or(Error::Closed)?
            };

            let capacity = synchronizer.slot_capacity();
            frame.resize(capacity, 0);
            let read = synchronizer.read(frame, 0, capacity)?;
            if read > 0 {
                frame.truncate(read);
                return Ok(());
            }
            if synchronizer.is_closed() {
                frame.clear();
                return Err(Error::Closed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::driver::{MockDriver, MockEndpoint, MockFault};
    use std::thread;

    /// 20 ms of 48 kHz 16-bit mono: 1920-byte slots.
    fn scenario_format() -> PcmFormat {
        PcmFormat::new(48000, 16, 1)
    }

    fn open(driver: &MockDriver) -> (CaptureSynchronizer, Arc<MockEndpoint>) {
        let capture =
            CaptureSynchronizer::open(driver, &scenario_format(), &SyncConfig::default()).unwrap();
        let endpoint = driver.endpoint(Direction::Capture).unwrap();
        (capture, endpoint)
    }

    #[test]
    fn test_open_lends_every_slot() {
        let driver = MockDriver::new();
        let (capture, endpoint) = open(&driver);

        assert_eq!(capture.slot_capacity(), 1920);
        assert_eq!(capture.slot_count(), 5);
        assert_eq!(endpoint.queued_slots(), vec![0, 1, 2, 3, 4]);
        assert!(endpoint.has_callback());
        assert!(endpoint.gain_maximized());
        assert_eq!(capture.window(), (0, 0));
    }

    #[test]
    fn test_three_fills_then_read() {
        let driver = MockDriver::new();
        let (capture, endpoint) = open(&driver);

        for value in 1..=3u8 {
            assert!(endpoint.fill_next(&[value; 1920]));
        }
        assert_eq!(capture.window(), (0, 3));

        let mut buf = vec![0u8; 1920];
        assert_eq!(capture.read(&mut buf, 0, 1920).unwrap(), 1920);
        assert!(buf.iter().all(|&b| b == 1));
        assert_eq!(capture.window(), (1, 2));
    }

    #[test]
    fn test_window_tracks_fills_below_saturation() {
        let driver = MockDriver::new();
        let (capture, endpoint) = open(&driver);

        for k in 1..capture.slot_count() {
            endpoint.fill_next(&[0; 1920]);
            assert_eq!(capture.window(), (0, k));
        }
    }

    #[test]
    fn test_overrun_drops_oldest_and_keeps_driver_fed() {
        let driver = MockDriver::new();
        let (capture, endpoint) = open(&driver);

        for value in 0..7u8 {
            assert!(endpoint.fill_next(&[value; 1920]));
        }
        // Window holds the newest four slots; one slot is always lent out
        let (index, count) = capture.window();
        assert_eq!(count, 4);
        assert_eq!(index, 3);
        assert_eq!(endpoint.queued(), 1);

        let mut buf = vec![0u8; 1920];
        capture.read(&mut buf, 0, 1920).unwrap();
        assert_eq!(buf[0], 3);
    }

    #[test]
    fn test_refill_after_read() {
        let driver = MockDriver::new();
        let (capture, endpoint) = open(&driver);
        let mut buf = vec![0u8; 1920];

        endpoint.fill_next(&[1; 1920]);
        capture.read(&mut buf, 0, 1920).unwrap();
        endpoint.fill_next(&[2; 1920]);

        // Slot 0 was read and goes back behind the driver's remaining slots
        assert_eq!(endpoint.queued_slots(), vec![2, 3, 4, 0]);
        assert_eq!(capture.window(), (1, 1));
        capture.read(&mut buf, 0, 1920).unwrap();
        assert!(buf.iter().all(|&b| b == 2));
    }

    #[test]
    fn test_read_at_offset() {
        let driver = MockDriver::new();
        let (capture, endpoint) = open(&driver);
        endpoint.fill_next(&[9; 1920]);

        let mut buf = vec![0u8; 2000];
        assert_eq!(capture.read(&mut buf, 80, 1920).unwrap(), 1920);
        assert!(buf[..80].iter().all(|&b| b == 0));
        assert!(buf[80..].iter().all(|&b| b == 9));
    }

    #[test]
    fn test_read_rejects_short_buffer() {
        let driver = MockDriver::new();
        let (capture, _endpoint) = open(&driver);

        let mut buf = vec![0u8; 1000];
        assert!(matches!(
            capture.read(&mut buf, 0, 1000),
            Err(Error::BufferTooSmall { needed: 1920, .. })
        ));
        assert!(matches!(
            capture.read(&mut buf, 10, 1000),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_read_waits_one_window() {
        let driver = MockDriver::new();
        let (capture, _endpoint) = open(&driver);
        let mut buf = vec![0u8; 1920];

        let started = Instant::now();
        assert_eq!(capture.read(&mut buf, 0, 1920).unwrap(), 0);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(20), "returned after {waited:?}");
        assert!(waited < Duration::from_secs(1), "returned after {waited:?}");
    }

    #[test]
    fn test_fill_wakes_waiting_reader() {
        let driver = MockDriver::new();
        let (capture, endpoint) = open(&driver);
        let capture = Arc::new(capture);

        let reader = {
            let capture = capture.clone();
            thread::spawn(move || {
                let mut buf = vec![0u8; 1920];
                loop {
                    let read = capture.read(&mut buf, 0, 1920).unwrap();
                    if read > 0 {
                        return buf;
                    }
                }
            })
        };

        thread::sleep(Duration::from_millis(5));
        endpoint.fill_next(&[5; 1920]);
        let buf = reader.join().unwrap();
        assert!(buf.iter().all(|&b| b == 5));
    }

    #[test]
    fn test_close_unblocks_reader() {
        let driver = MockDriver::new();
        let config = SyncConfig::new(5, 1000);
        let capture = Arc::new(
            CaptureSynchronizer::open(&driver, &scenario_format(), &config).unwrap(),
        );

        let reader = {
            let capture = capture.clone();
            thread::spawn(move || {
                let len = capture.slot_capacity();
                let mut buf = vec![0u8; len];
                let started = Instant::now();
                let read = capture.read(&mut buf, 0, len).unwrap();
                (read, started.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        capture.close();
        let (read, waited) = reader.join().unwrap();
        assert_eq!(read, 0);
        assert!(waited < Duration::from_secs(2), "reader waited {waited:?}");

        let endpoint = driver.endpoint(Direction::Capture).unwrap();
        assert!(endpoint.is_destroyed());
        assert!(!endpoint.has_callback());
        assert_eq!(driver.live_engines(), 0);

        // Reads after close report no data
        let len = capture.slot_capacity();
        let mut buf = vec![0u8; len];
        assert_eq!(capture.read(&mut buf, 0, len).unwrap(), 0);
    }

    #[test]
    fn test_callback_after_close_is_ignored() {
        let driver = MockDriver::new();
        let (capture, endpoint) = open(&driver);
        let stale = endpoint.clone();
        capture.close();
        capture.close();

        stale.fire_callback();
        assert_eq!(capture.window(), (0, 0));
    }

    #[test]
    fn test_start_stop_toggle_driver() {
        let driver = MockDriver::new();
        let (capture, endpoint) = open(&driver);

        capture.start().unwrap();
        assert_eq!(endpoint.current_transport(), TransportState::Recording);
        capture.stop().unwrap();
        assert_eq!(endpoint.current_transport(), TransportState::Stopped);
        assert_eq!(capture.window(), (0, 0));

        capture.close();
        assert!(matches!(capture.start(), Err(Error::Closed)));
    }

    #[test]
    fn test_open_unwinds_on_enqueue_failure() {
        let driver = MockDriver::new();
        driver.fail_after(MockFault::Enqueue, 2);

        let err = CaptureSynchronizer::open(&driver, &scenario_format(), &SyncConfig::default())
            .err()
            .unwrap();
        assert!(err.is_driver_failure());
        assert!(driver.endpoint(Direction::Capture).unwrap().is_destroyed());
        assert_eq!(driver.live_engines(), 0);
    }

    #[test]
    fn test_open_unwinds_on_endpoint_failure() {
        let driver = MockDriver::new();
        driver.fail_on(MockFault::CreateEndpoint);

        assert!(CaptureSynchronizer::open(&driver, &scenario_format(), &SyncConfig::default()).is_err());
        assert_eq!(driver.live_engines(), 0);
    }

    #[test]
    fn test_gain_failure_is_not_fatal() {
        let driver = MockDriver::new();
        driver.fail_on(MockFault::InputGain);
        assert!(
            CaptureSynchronizer::open(&driver, &scenario_format(), &SyncConfig::default()).is_ok()
        );
    }

    #[test]
    fn test_requires_two_slots() {
        let driver = MockDriver::new();
        let err = CaptureSynchronizer::open(&driver, &scenario_format(), &SyncConfig::new(1, 20))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(driver.live_engines(), 0);
    }

    #[test]
    fn test_callback_survives_enqueue_failure() {
        let driver = MockDriver::new();
        let (capture, endpoint) = open(&driver);
        let mut buf = vec![0u8; 1920];

        endpoint.fill_next(&[1; 1920]);
        capture.read(&mut buf, 0, 1920).unwrap();

        driver.fail_on(MockFault::Enqueue);
        endpoint.fill_next(&[2; 1920]);
        assert_eq!(capture.window(), (1, 1));
        assert_eq!(endpoint.queued(), 3);
    }

    #[test]
    fn test_refused_slot_is_not_read_twice() {
        let driver = MockDriver::new();
        let (capture, endpoint) = open(&driver);
        let mut buf = vec![0u8; 1920];

        endpoint.fill_next(&[10; 1920]);
        endpoint.fill_next(&[11; 1920]);
        for value in [10u8, 11] {
            capture.read(&mut buf, 0, 1920).unwrap();
            assert_eq!(buf[0], value);
        }
        assert_eq!(endpoint.queued_slots(), vec![2, 3, 4]);

        // Slots 0 and 1 go back after this fill; the first is refused once
        driver.fail_times(MockFault::Enqueue, 1);
        endpoint.fill_next(&[12; 1920]);
        assert_eq!(endpoint.queued_slots(), vec![3, 4, 1]);
        assert_eq!(capture.lent_slots(), vec![3, 4, 1]);

        endpoint.fill_next(&[13; 1920]);
        assert_eq!(endpoint.queued_slots(), vec![4, 1, 0]);
        assert_eq!(capture.lent_slots(), vec![4, 1, 0]);

        endpoint.fill_next(&[14; 1920]);
        endpoint.fill_next(&[15; 1920]);
        assert_eq!(capture.window().1, 4);

        let mut frames = Vec::new();
        while capture.read(&mut buf, 0, 1920).unwrap() > 0 {
            assert!(buf.iter().all(|&b| b == buf[0]));
            frames.push(buf[0]);
        }
        assert_eq!(frames, vec![12, 13, 14, 15]);
    }

    #[test]
    fn test_read_restarts_starved_driver() {
        let driver = MockDriver::new();
        let capture =
            CaptureSynchronizer::open(&driver, &scenario_format(), &SyncConfig::new(2, 20))
                .unwrap();
        let endpoint = driver.endpoint(Direction::Capture).unwrap();
        let mut buf = vec![0u8; 1920];

        endpoint.fill_next(&[1; 1920]);
        // Overrun frees slot 0, which the driver refuses
        driver.fail_on(MockFault::Enqueue);
        endpoint.fill_next(&[2; 1920]);
        assert_eq!(endpoint.queued(), 0);
        assert_eq!(capture.window(), (1, 1));

        driver.clear_faults();
        capture.read(&mut buf, 0, 1920).unwrap();
        assert_eq!(buf[0], 2);
        assert_eq!(endpoint.queued_slots(), vec![0, 1]);

        endpoint.fill_next(&[3; 1920]);
        capture.read(&mut buf, 0, 1920).unwrap();
        assert_eq!(buf[0], 3);
    }

    #[test]
    fn test_spurious_callback_changes_nothing() {
        let driver = MockDriver::new();
        let (capture, endpoint) = open(&driver);

        endpoint.fill_next(&[1; 1920]);
        endpoint.fire_callback();
        endpoint.fire_callback();
        assert_eq!(capture.window(), (0, 1));
        assert_eq!(endpoint.queued_slots(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_stream_read_frame() {
        let driver = MockDriver::new();
        let stream = CaptureStream::new(
            Arc::new(driver.clone()),
            scenario_format(),
            SyncConfig::default(),
        );
        let mut frame = Vec::new();

        // Not started: empty frame, nothing opened
        stream.read_frame(&mut frame).unwrap();
        assert!(frame.is_empty());
        assert!(driver.endpoint(Direction::Capture).is_none());

        stream.start().unwrap();
        assert!(stream.is_started());
        let endpoint = driver.endpoint(Direction::Capture).unwrap();
        endpoint.fill_next(&[4; 1920]);

        stream.read_frame(&mut frame).unwrap();
        assert_eq!(frame.len(), 1920);
        assert!(frame.iter().all(|&b| b == 4));

        stream.stop().unwrap();
        stream.read_frame(&mut frame).unwrap();
        assert!(frame.is_empty());

        stream.disconnect();
        assert!(endpoint.is_destroyed());
    }
}
