//! All streams sharing one stream id, one slot per priority and reliability.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::{Priority, Reliability, StreamId, StreamKey};

use super::control::CompletedPrefix;
use super::error::StoreError;
use super::store::{StoredRange, StreamSetData, StreamStore};
use super::stream::Stream;

pub struct StreamSet<S> {
    stream_id: RwLock<StreamId>,
    slots: Vec<Mutex<Option<Arc<S>>>>,
}

impl<S: Stream> StreamSet<S> {
    pub fn new(stream_id: StreamId) -> Self {
        let slots = (0..Reliability::COUNT * Priority::COUNT)
            .map(|_| Mutex::new(None))
            .collect();
        Self {
            stream_id: RwLock::new(stream_id),
            slots,
        }
    }

    pub fn stream_id(&self) -> StreamId {
        *self.stream_id.read()
    }

    /// Give a placeholder set its real id.
    pub(crate) fn rekey(&self, stream_id: StreamId) {
        *self.stream_id.write() = stream_id;
    }

    fn slot(&self, key: StreamKey) -> &Mutex<Option<Arc<S>>> {
        &self.slots[key.reliability.index() * Priority::COUNT + key.priority.index()]
    }

    pub fn get(&self, key: StreamKey) -> Option<Arc<S>> {
        self.slot(key).lock().clone()
    }

    /// The stream for `key`, built by `create` on first use. Best-effort
    /// keys never get a stream.
    pub fn get_or_create(&self, key: StreamKey, create: impl FnOnce() -> Arc<S>) -> Option<Arc<S>> {
        if !key.reliability.has_stream() {
            return None;
        }
        let mut slot = self.slot(key).lock();
        if let Some(existing) = slot.as_ref() {
            return Some(existing.clone());
        }
        let stream = create();
        tracing::debug!(stream_id = %self.stream_id(), %key, "stream created");
        *slot = Some(stream.clone());
        Some(stream)
    }

    /// Install a stream built elsewhere, e.g. while restoring.
    pub fn insert(&self, stream: Arc<S>) {
        let key = stream.key();
        *self.slot(key).lock() = Some(stream);
    }

    pub fn remove(&self, key: StreamKey) -> Option<Arc<S>> {
        self.slot(key).lock().take()
    }

    /// Live streams in reliability then priority order.
    pub fn streams(&self) -> Vec<Arc<S>> {
        self.slots.iter().filter_map(|s| s.lock().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.lock().is_none())
    }

    pub fn completed_prefixes(&self) -> Vec<CompletedPrefix> {
        self.streams()
            .iter()
            .map(|s| CompletedPrefix {
                key: s.key(),
                completed_prefix: s.completed_prefix(),
            })
            .collect()
    }

    /// Snapshot of every persistent stream.
    pub fn persistent_data(&self) -> StreamSetData {
        let mut data = StreamSetData::new(self.stream_id());
        for stream in self.streams() {
            let key = stream.key();
            if !key.reliability.is_persistent() {
                continue;
            }
            data.prefixes.push(CompletedPrefix {
                key,
                completed_prefix: stream.completed_prefix(),
            });
            data.messages.extend(
                stream
                    .persisted_ranges()
                    .into_iter()
                    .map(|range| StoredRange { key, range }),
            );
        }
        data
    }

    /// Persist the set if it holds anything persistent.
    pub fn request_update(&self, store: &dyn StreamStore) -> Result<(), StoreError> {
        let data = self.persistent_data();
        if data.prefixes.is_empty() {
            return Ok(());
        }
        store.persist(&data)
    }

    /// Stop every stream's timers.
    pub fn flush_all(&self) {
        for stream in self.streams() {
            stream.flush();
        }
    }
}

impl<S: Stream> std::fmt::Debug for StreamSet<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSet")
            .field("stream_id", &self.stream_id())
            .field("streams", &self.completed_prefixes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::{GdConfig, MessageRef, TickRange};
    use crate::gd::source::SourceStream;
    use crate::test_harness::{ManualAlarms, MemoryStore, RecordingTransport, stream_context};

    fn key(p: u8, r: Reliability) -> StreamKey {
        StreamKey::new(Priority::new(p).unwrap(), r)
    }

    #[test]
    fn slots_are_created_once_and_best_effort_never() {
        let alarms = ManualAlarms::new();
        let transport = RecordingTransport::new();
        let id = StreamId::random();
        let set: StreamSet<SourceStream> = StreamSet::new(id);
        let make = |k: StreamKey| {
            let ctx = stream_context(id, k, GdConfig::default(), &alarms);
            SourceStream::new(ctx, transport.clone())
        };

        let k = key(3, Reliability::AssuredPersistent);
        let a = set.get_or_create(k, || make(k)).unwrap();
        let b = set
            .get_or_create(k, || panic!("second create"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let best_effort = key(3, Reliability::BestEffortNonPersistent);
        assert!(set.get_or_create(best_effort, || make(best_effort)).is_none());
        assert_eq!(set.streams().len(), 1);
        assert!(set.remove(k).is_some());
        assert!(set.is_empty());

        set.insert(a.clone());
        assert!(Arc::ptr_eq(&set.get(k).unwrap(), &a));
    }

    #[test]
    fn only_persistent_streams_are_stored() {
        let alarms = ManualAlarms::new();
        let transport = RecordingTransport::new();
        let store = MemoryStore::new();
        let id = StreamId::random();
        let set: StreamSet<SourceStream> = StreamSet::new(id);
        for r in [Reliability::ReliableNonPersistent, Reliability::AssuredPersistent] {
            let k = key(1, r);
            let stream = set
                .get_or_create(k, || {
                    SourceStream::new(stream_context(id, k, GdConfig::default(), &alarms), transport.clone())
                })
                .unwrap();
            stream.write_value(TickRange::value(1, MessageRef::new(1))).unwrap();
        }
        set.request_update(store.as_ref()).unwrap();
        let data = store.get(id).unwrap();
        assert_eq!(data.prefixes.len(), 1);
        assert_eq!(data.prefixes[0].key.reliability, Reliability::AssuredPersistent);
        assert_eq!(data.messages.len(), 1);
        assert_eq!(set.completed_prefixes().len(), 2);
    }
}
