//! In-process driver for testing without audio hardware.
//!
//! The mock never runs a thread of its own. Whoever calls
//! [`MockEndpoint::fill_next`] or [`MockEndpoint::complete_next`] plays the
//! engine thread: the front queued slot is completed and the registered
//! callback runs on the caller's thread, the same way a real driver invokes
//! it from its audio thread.

use super::{
    AudioDriver, BufferQueue, Direction, Endpoint, EndpointSpec, Engine, QueueCallback,
    QueueState, TransportState,
};
use crate::buffer::SharedSlotStore;
use parking_lot::Mutex;
use slotsync_core::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Driver operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockFault {
    CreateEngine,
    CreateEndpoint,
    RegisterCallback,
    Enqueue,
    QueueState,
    TransportState,
    InputGain,
}

impl MockFault {
    const fn operation(self) -> &'static str {
        match self {
            Self::CreateEngine => "create engine",
            Self::CreateEndpoint => "create endpoint",
            Self::RegisterCallback => "register callback",
            Self::Enqueue => "enqueue",
            Self::QueueState => "query queue state",
            Self::TransportState => "transport state",
            Self::InputGain => "set input gain",
        }
    }
}

/// Armed faults: the value is how many calls still succeed before the
/// operation starts failing for good. Transient faults fail the given
/// number of calls and then recover.
#[derive(Default)]
struct Faults {
    armed: Mutex<HashMap<MockFault, usize>>,
    transient: Mutex<HashMap<MockFault, usize>>,
}

impl Faults {
    fn check(&self, fault: MockFault) -> Result<()> {
        if let Some(remaining) = self.transient.lock().get_mut(&fault) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::driver(fault.operation(), "injected transient failure"));
            }
        }

        let mut armed = self.armed.lock();
        match armed.get_mut(&fault) {
            Some(0) => Err(Error::driver(fault.operation(), "injected failure")),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct MockShared {
    faults: Arc<Faults>,
    endpoints: Mutex<Vec<Arc<MockEndpoint>>>,
    live_engines: AtomicUsize,
}

/// Test driver whose engine thread is driven by the caller.
#[derive(Clone, Default)]
pub struct MockDriver {
    inner: Arc<MockShared>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `fault` fail on its next call and every call after.
    pub fn fail_on(&self, fault: MockFault) {
        self.fail_after(fault, 0);
    }

    /// Let `fault` succeed `successes` more times, then fail.
    pub fn fail_after(&self, fault: MockFault, successes: usize) {
        self.inner.faults.armed.lock().insert(fault, successes);
    }

    /// Make the next `failures` calls of `fault` fail, then succeed again.
    pub fn fail_times(&self, fault: MockFault, failures: usize) {
        self.inner.faults.transient.lock().insert(fault, failures);
    }

    pub fn clear_faults(&self) {
        self.inner.faults.armed.lock().clear();
        self.inner.faults.transient.lock().clear();
    }

    /// Most recently created endpoint for `direction`.
    pub fn endpoint(&self, direction: Direction) -> Option<Arc<MockEndpoint>> {
        self.inner
            .endpoints
            .lock()
            .iter()
            .rev()
            .find(|endpoint| endpoint.spec.direction == direction)
            .cloned()
    }

    /// Engines created and not yet destroyed.
    pub fn live_engines(&self) -> usize {
        self.inner.live_engines.load(Ordering::SeqCst)
    }
}

impl AudioDriver for MockDriver {
    fn create_engine(&self) -> Result<Box<dyn Engine>> {
        self.inner.faults.check(MockFault::CreateEngine)?;
        self.inner.live_engines.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockEngine {
            shared: self.inner.clone(),
            destroyed: AtomicBool::new(false),
        }))
    }
}

struct MockEngine {
    shared: Arc<MockShared>,
    destroyed: AtomicBool,
}

impl Engine for MockEngine {
    fn create_endpoint(
        &self,
        spec: &EndpointSpec,
        slots: SharedSlotStore,
    ) -> Result<Arc<dyn Endpoint>> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(Error::driver("create endpoint", "engine destroyed"));
        }
        self.shared.faults.check(MockFault::CreateEndpoint)?;
        if spec.queue_len == 0 {
            return Err(Error::driver("create endpoint", "empty buffer queue"));
        }

        let endpoint = Arc::new(MockEndpoint {
            spec: *spec,
            slots,
            faults: self.shared.faults.clone(),
            queue: Mutex::new(MockQueue::default()),
            callback: Mutex::new(None),
            gain_maximized: AtomicBool::new(false),
        });
        self.shared.endpoints.lock().push(endpoint.clone());
        Ok(endpoint)
    }

    fn destroy(&self) {
        if !self.destroyed.swap(true, Ordering::SeqCst) {
            self.shared.live_engines.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
struct MockQueue {
    /// Queued `(slot, len)` pairs, front is the one being worked on.
    pending: VecDeque<(usize, usize)>,
    /// Every accepted enqueue, in order.
    submissions: Vec<(usize, usize)>,
    play_index: u64,
    transport: TransportState,
    destroyed: bool,
}

/// Buffer-queue endpoint created by [`MockDriver`].
pub struct MockEndpoint {
    spec: EndpointSpec,
    slots: SharedSlotStore,
    faults: Arc<Faults>,
    queue: Mutex<MockQueue>,
    callback: Mutex<Option<QueueCallback>>,
    gain_maximized: AtomicBool,
}

impl MockEndpoint {
    pub const fn spec(&self) -> &EndpointSpec {
        &self.spec
    }

    /// Complete the front capture slot with `data` (truncated to the
    /// enqueued length) and run the callback. Returns false when nothing
    /// is queued.
    pub fn fill_next(&self, data: &[u8]) -> bool {
        let completed = {
            let mut queue = self.queue.lock();
            if queue.destroyed {
                return false;
            }
            let Some((slot, len)) = queue.pending.pop_front() else {
                return false;
            };
            let mut bytes = self.slots.lock(slot);
            let n = data.len().min(len);
            bytes[..n].copy_from_slice(&data[..n]);
            queue.play_index += 1;
            slot
        };
        trace!(slot = completed, "mock filled slot");
        self.fire_callback();
        true
    }

    /// Play out the front render slot and run the callback. Returns the
    /// bytes that were played.
    pub fn complete_next(&self) -> Option<Vec<u8>> {
        let played = {
            let mut queue = self.queue.lock();
            if queue.destroyed {
                return None;
            }
            let (slot, len) = queue.pending.pop_front()?;
            queue.play_index += 1;
            let bytes = self.slots.lock(slot);
            bytes[..len].to_vec()
        };
        self.fire_callback();
        Some(played)
    }

    /// Invoke the registered callback without changing queue state.
    pub fn fire_callback(&self) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            let queue: &dyn BufferQueue = self;
            callback(queue);
        }
    }

    /// Slots currently queued, front first.
    pub fn queued_slots(&self) -> Vec<usize> {
        self.queue.lock().pending.iter().map(|&(slot, _)| slot).collect()
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().pending.len()
    }

    /// Every accepted `(slot, len)` enqueue since creation.
    pub fn submissions(&self) -> Vec<(usize, usize)> {
        self.queue.lock().submissions.clone()
    }

    pub fn play_index(&self) -> u64 {
        self.queue.lock().play_index
    }

    pub fn current_transport(&self) -> TransportState {
        self.queue.lock().transport
    }

    pub fn is_destroyed(&self) -> bool {
        self.queue.lock().destroyed
    }

    pub fn has_callback(&self) -> bool {
        self.callback.lock().is_some()
    }

    pub fn gain_maximized(&self) -> bool {
        self.gain_maximized.load(Ordering::SeqCst)
    }
}

impl BufferQueue for MockEndpoint {
    fn enqueue(&self, slot: usize, len: usize) -> Result<()> {
        self.faults.check(MockFault::Enqueue)?;
        let mut queue = self.queue.lock();
        if queue.destroyed {
            return Err(Error::driver("enqueue", "endpoint destroyed"));
        }
        if queue.pending.len() >= self.spec.queue_len {
            return Err(Error::driver("enqueue", "buffer queue full"));
        }
        if slot >= self.slots.len() || len > self.slots.capacity() {
            return Err(Error::driver("enqueue", "buffer outside the slot store"));
        }
        queue.pending.push_back((slot, len));
        queue.submissions.push((slot, len));
        Ok(())
    }

    fn state(&self) -> Result<QueueState> {
        self.faults.check(MockFault::QueueState)?;
        let queue = self.queue.lock();
        Ok(QueueState {
            count: queue.pending.len(),
            play_index: queue.play_index,
        })
    }
}

impl Endpoint for MockEndpoint {
    fn register_callback(&self, callback: QueueCallback) -> Result<()> {
        self.faults.check(MockFault::RegisterCallback)?;
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    fn set_transport_state(&self, state: TransportState) -> Result<()> {
        self.faults.check(MockFault::TransportState)?;
        let mut queue = self.queue.lock();
        if queue.destroyed {
            return Err(Error::driver("transport state", "endpoint destroyed"));
        }
        queue.transport = state;
        Ok(())
    }

    fn transport_state(&self) -> Result<TransportState> {
        self.faults.check(MockFault::TransportState)?;
        Ok(self.queue.lock().transport)
    }

    fn maximize_input_gain(&self) -> Result<()> {
        self.faults.check(MockFault::InputGain)?;
        self.gain_maximized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&self) {
        {
            let mut queue = self.queue.lock();
            queue.destroyed = true;
            queue.transport = TransportState::Stopped;
            queue.pending.clear();
        }
        self.callback.lock().take();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::buffer::shared_slot_store;
    use slotsync_core::PcmFormat;

    fn capture_spec(queue_len: usize) -> EndpointSpec {
        EndpointSpec {
            direction: Direction::Capture,
            format: PcmFormat::voice(),
            queue_len,
        }
    }

    #[test]
    fn test_queue_is_bounded() {
        let driver = MockDriver::new();
        let engine = driver.create_engine().unwrap();
        let slots = shared_slot_store(2, 4).unwrap();
        let endpoint = engine.create_endpoint(&capture_spec(2), slots).unwrap();

        endpoint.enqueue(0, 4).unwrap();
        endpoint.enqueue(1, 4).unwrap();
        assert!(endpoint.enqueue(0, 4).is_err());
        assert_eq!(endpoint.state().unwrap().count, 2);
    }

    #[test]
    fn test_fill_runs_callback_after_dequeue() {
        let driver = MockDriver::new();
        let engine = driver.create_engine().unwrap();
        let slots = shared_slot_store(2, 4).unwrap();
        let endpoint = engine
            .create_endpoint(&capture_spec(2), slots.clone())
            .unwrap();
        endpoint.enqueue(0, 4).unwrap();

        let seen = Arc::new(Mutex::new(None));
        let seen_cb = seen.clone();
        endpoint
            .register_callback(Arc::new(move |queue: &dyn BufferQueue| {
                *seen_cb.lock() = Some(queue.state().unwrap());
            }))
            .unwrap();

        let mock = driver.endpoint(Direction::Capture).unwrap();
        assert!(mock.fill_next(&[7, 7, 7, 7]));
        assert_eq!(
            *seen.lock(),
            Some(QueueState {
                count: 0,
                play_index: 1
            })
        );
        assert_eq!(slots.lock(0)[..], [7, 7, 7, 7]);
        assert!(!mock.fill_next(&[1]));
    }

    #[test]
    fn test_fault_after_successes() {
        let driver = MockDriver::new();
        driver.fail_after(MockFault::Enqueue, 1);
        let engine = driver.create_engine().unwrap();
        let slots = shared_slot_store(3, 4).unwrap();
        let endpoint = engine.create_endpoint(&capture_spec(3), slots).unwrap();

        assert!(endpoint.enqueue(0, 4).is_ok());
        assert!(endpoint.enqueue(1, 4).unwrap_err().is_driver_failure());

        driver.clear_faults();
        assert!(endpoint.enqueue(1, 4).is_ok());
    }

    #[test]
    fn test_transient_fault_recovers() {
        let driver = MockDriver::new();
        driver.fail_times(MockFault::Enqueue, 1);
        let engine = driver.create_engine().unwrap();
        let slots = shared_slot_store(3, 4).unwrap();
        let endpoint = engine.create_endpoint(&capture_spec(3), slots).unwrap();

        assert!(endpoint.enqueue(0, 4).is_err());
        assert!(endpoint.enqueue(0, 4).is_ok());
        assert_eq!(endpoint.state().unwrap().count, 1);
    }

    #[test]
    fn test_destroy_counts_engines_once() {
        let driver = MockDriver::new();
        let engine = driver.create_engine().unwrap();
        assert_eq!(driver.live_engines(), 1);
        engine.destroy();
        engine.destroy();
        assert_eq!(driver.live_engines(), 0);
    }
}
