//! Deterministic collaborators for driving streams and managers in tests:
//! a virtual-time alarm facility, a transport that records every message,
//! a configurable deliverer and an in-memory store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::{GdConfig, StreamId, StreamKey, Tick, ValueRef};
use crate::gd::control::{
    Ack, AckExpected, AreYouFlushed, ControlMessage, DataMessage, DownstreamControl, Flushed,
    Nack, NotFlushed, Silence,
};
use crate::gd::{
    AlarmCallback, AlarmHandle, AlarmManager, Capacity, DeliveryError, DeliveryOutcome,
    MessageDeliverer, SendError, StoreError, StreamContext, StreamSetData, StreamStore,
    UpstreamControl,
};

#[derive(Clone)]
pub struct TestClock {
    now: Arc<AtomicU64>,
}

impl TestClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    pub fn advance_ms(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set_ms(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

struct PendingAlarms {
    next_id: u64,
    queue: BTreeMap<(u64, AlarmHandle), AlarmCallback>,
    due: HashMap<AlarmHandle, u64>,
}

/// Alarms on virtual time. Nothing fires until the test advances the clock.
pub struct ManualAlarms {
    clock: TestClock,
    pending: Mutex<PendingAlarms>,
}

impl ManualAlarms {
    pub fn new() -> Arc<Self> {
        Self::with_clock(TestClock::new(1_000))
    }

    pub fn with_clock(clock: TestClock) -> Arc<Self> {
        Arc::new(Self {
            clock,
            pending: Mutex::new(PendingAlarms {
                next_id: 1,
                queue: BTreeMap::new(),
                due: HashMap::new(),
            }),
        })
    }

    pub fn clock(&self) -> &TestClock {
        &self.clock
    }

    /// Move time forward, firing every alarm that falls due on the way in
    /// deadline order. Alarms scheduled by callbacks fire too if they fall
    /// inside the window.
    pub fn advance_ms(&self, delta_ms: u64) {
        let target = self.clock.now_ms() + delta_ms;
        loop {
            let next = {
                let mut pending = self.pending.lock();
                let Some((&(due, handle), _)) = pending.queue.iter().next() else {
                    break;
                };
                if due > target {
                    break;
                }
                let callback = pending.queue.remove(&(due, handle));
                pending.due.remove(&handle);
                callback.map(|cb| (due, handle, cb))
            };
            if let Some((due, handle, callback)) = next {
                self.clock.set_ms(due.max(self.clock.now_ms()));
                callback(handle);
            }
        }
        self.clock.set_ms(target);
    }

    pub fn advance(&self, by: Duration) {
        self.advance_ms(by.as_millis() as u64);
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().queue.len()
    }
}

impl AlarmManager for ManualAlarms {
    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    fn schedule(&self, delay: Duration, callback: AlarmCallback) -> AlarmHandle {
        let due = self.clock.now_ms() + delay.as_millis() as u64;
        let mut pending = self.pending.lock();
        let handle = AlarmHandle::new(pending.next_id);
        pending.next_id += 1;
        pending.queue.insert((due, handle), callback);
        pending.due.insert(handle, due);
        handle
    }

    fn cancel(&self, handle: AlarmHandle) {
        let mut pending = self.pending.lock();
        if let Some(due) = pending.due.remove(&handle) {
            pending.queue.remove(&(due, handle));
        }
    }
}

/// Captures every message sent through it, in order.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<ControlMessage>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// While set, every send is recorded as attempted but fails.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<ControlMessage> {
        self.sent.lock().clone()
    }

    pub fn take(&self) -> Vec<ControlMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    pub fn acks(&self) -> Vec<Tick> {
        self.collect(|m| match m {
            ControlMessage::Ack(a) => Some(a.ack_prefix),
            _ => None,
        })
    }

    pub fn nacks(&self) -> Vec<(Tick, Tick)> {
        self.collect(|m| match m {
            ControlMessage::Nack(n) => Some((n.start, n.end)),
            _ => None,
        })
    }

    pub fn ack_expected(&self) -> Vec<Tick> {
        self.collect(|m| match m {
            ControlMessage::AckExpected(a) => Some(a.tick),
            _ => None,
        })
    }

    /// Value ticks of every data message sent.
    pub fn data_ticks(&self) -> Vec<Tick> {
        self.collect(|m| match m {
            ControlMessage::Data(d) => d.range.value_tick(),
            _ => None,
        })
    }

    pub fn silences(&self) -> Vec<(Tick, Tick)> {
        self.collect(|m| match m {
            ControlMessage::Silence(s) => Some((s.start, s.end)),
            _ => None,
        })
    }

    pub fn count(&self, kind: &str) -> usize {
        self.sent.lock().iter().filter(|m| m.kind() == kind).count()
    }

    fn collect<T>(&self, f: impl Fn(&ControlMessage) -> Option<T>) -> Vec<T> {
        self.sent.lock().iter().filter_map(f).collect()
    }

    fn record(&self, msg: ControlMessage) -> Result<(), SendError> {
        self.sent.lock().push(msg);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SendError::Unreachable {
                reason: "transport set to fail".to_string(),
            });
        }
        Ok(())
    }
}

impl UpstreamControl for RecordingTransport {
    fn send_ack(&self, ack: Ack) -> Result<(), SendError> {
        self.record(ControlMessage::Ack(ack))
    }

    fn send_nack(&self, nack: Nack) -> Result<(), SendError> {
        self.record(ControlMessage::Nack(nack))
    }

    fn send_are_you_flushed(&self, query: AreYouFlushed) -> Result<(), SendError> {
        self.record(ControlMessage::AreYouFlushed(query))
    }
}

impl DownstreamControl for RecordingTransport {
    fn send_data(&self, msg: DataMessage) -> Result<(), SendError> {
        self.record(ControlMessage::Data(msg))
    }

    fn send_silence(&self, msg: Silence) -> Result<(), SendError> {
        self.record(ControlMessage::Silence(msg))
    }

    fn send_ack_expected(&self, msg: AckExpected) -> Result<(), SendError> {
        self.record(ControlMessage::AckExpected(msg))
    }

    fn send_flushed(&self, msg: Flushed) -> Result<(), SendError> {
        self.record(ControlMessage::Flushed(msg))
    }

    fn send_not_flushed(&self, msg: NotFlushed) -> Result<(), SendError> {
        self.record(ControlMessage::NotFlushed(msg))
    }
}

/// Deliverer whose capacity and commit mode the test controls.
pub struct RecordingDeliverer {
    capacity: Mutex<Capacity>,
    outcome: Mutex<DeliveryOutcome>,
    fail_next: Mutex<Option<DeliveryError>>,
    delivered: Mutex<Vec<ValueRef>>,
    calls: AtomicU64,
}

impl Default for RecordingDeliverer {
    fn default() -> Self {
        Self {
            capacity: Mutex::new(Capacity::Accepting),
            outcome: Mutex::new(DeliveryOutcome::Committed),
            fail_next: Mutex::new(None),
            delivered: Mutex::new(Vec::new()),
            calls: AtomicU64::new(0),
        }
    }
}

impl RecordingDeliverer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_capacity(&self, capacity: Capacity) {
        *self.capacity.lock() = capacity;
    }

    pub fn set_outcome(&self, outcome: DeliveryOutcome) {
        *self.outcome.lock() = outcome;
    }

    pub fn fail_next(&self, err: DeliveryError) {
        *self.fail_next.lock() = Some(err);
    }

    pub fn delivered(&self) -> Vec<ValueRef> {
        self.delivered.lock().clone()
    }

    pub fn delivered_ticks(&self) -> Vec<Tick> {
        self.delivered.lock().iter().map(|v| v.value_tick).collect()
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MessageDeliverer for RecordingDeliverer {
    fn check_capacity(&self, _stream_id: StreamId, _key: StreamKey) -> Capacity {
        *self.capacity.lock()
    }

    fn deliver(
        &self,
        _stream_id: StreamId,
        _key: StreamKey,
        values: &[ValueRef],
    ) -> Result<DeliveryOutcome, DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }
        self.delivered.lock().extend_from_slice(values);
        Ok(*self.outcome.lock())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<StreamId, StreamSetData>>,
    failing: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get(&self, stream_id: StreamId) -> Option<StreamSetData> {
        self.records.lock().get(&stream_id).cloned()
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "store set to fail".to_string(),
            });
        }
        Ok(())
    }
}

impl StreamStore for MemoryStore {
    fn persist(&self, data: &StreamSetData) -> Result<(), StoreError> {
        self.check()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.records.lock().insert(data.stream_id, data.clone());
        Ok(())
    }

    fn restore(&self, stream_id: StreamId) -> Result<Option<StreamSetData>, StoreError> {
        self.check()?;
        Ok(self.get(stream_id))
    }

    fn remove(&self, stream_id: StreamId) -> Result<(), StoreError> {
        self.check()?;
        self.records.lock().remove(&stream_id);
        Ok(())
    }

    fn stream_ids(&self) -> Result<Vec<StreamId>, StoreError> {
        self.check()?;
        Ok(self.records.lock().keys().copied().collect())
    }
}

/// Stream context on manual alarms with the given tunables.
pub fn stream_context(
    stream_id: StreamId,
    key: StreamKey,
    config: GdConfig,
    alarms: &Arc<ManualAlarms>,
) -> StreamContext {
    StreamContext::new(stream_id, key, Arc::new(config), alarms.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    #[test]
    fn manual_alarms_fire_in_order_and_chain() {
        let alarms = ManualAlarms::new();
        let fired = Arc::new(Mutex::new(Vec::new()));

        let log = fired.clone();
        alarms.schedule(
            Duration::from_millis(20),
            Box::new(move |_| log.lock().push("b")),
        );
        let log = fired.clone();
        let chained = alarms.clone();
        alarms.schedule(
            Duration::from_millis(10),
            Box::new(move |_| {
                log.lock().push("a");
                let log = log.clone();
                chained.schedule(
                    Duration::from_millis(5),
                    Box::new(move |_| log.lock().push("a2")),
                );
            }),
        );

        alarms.advance_ms(9);
        assert!(fired.lock().is_empty());
        alarms.advance_ms(20);
        assert_eq!(*fired.lock(), vec!["a", "a2", "b"]);
        assert_eq!(alarms.pending(), 0);
    }

    #[test]
    fn manual_alarms_cancel() {
        let alarms = ManualAlarms::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = alarms.schedule(
            Duration::from_millis(1),
            Box::new(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        alarms.cancel(handle);
        alarms.advance_ms(10);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_transport_still_records() {
        let transport = RecordingTransport::new();
        transport.set_failing(true);
        let err = transport.send_flushed(Flushed {
            stream_id: StreamId::nil(),
        });
        assert!(err.is_err());
        assert_eq!(transport.count("flushed"), 1);
    }
}
