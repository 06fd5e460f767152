//! Sending side: local producers write here, remote targets answer here.

use std::sync::Arc;

use crate::core::{GdConfig, StreamId, StreamKey, Tick, TickKind, TickRange};
use crate::gd::alarm::AlarmManager;
use crate::gd::control::{
    Ack, AreYouFlushed, DataMessage, DownstreamControl, Flushed, Nack, NotFlushed, log_send,
};
use crate::gd::error::GdError;
use crate::gd::registry::StreamSetRegistry;
use crate::gd::source::SourceStream;
use crate::gd::store::StreamStore;
use crate::gd::stream::{Stream, StreamContext};
use crate::gd::stream_set::StreamSet;

use super::FlushReply;

pub struct OutputManager {
    config: Arc<GdConfig>,
    alarms: Arc<dyn AlarmManager>,
    downstream: Arc<dyn DownstreamControl>,
    store: Option<Arc<dyn StreamStore>>,
    registry: StreamSetRegistry<SourceStream>,
}

impl OutputManager {
    /// The first stream id written through this manager claims a
    /// placeholder set, reachable via [`OutputManager::shell`] beforehand.
    pub fn new(
        config: Arc<GdConfig>,
        alarms: Arc<dyn AlarmManager>,
        downstream: Arc<dyn DownstreamControl>,
    ) -> Self {
        Self {
            config,
            alarms,
            downstream,
            store: None,
            registry: StreamSetRegistry::with_shell(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StreamStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn shell(&self) -> Option<Arc<StreamSet<SourceStream>>> {
        self.registry.shell()
    }

    pub fn stream(&self, stream_id: StreamId, key: StreamKey) -> Option<Arc<SourceStream>> {
        self.registry.get(stream_id)?.get(key)
    }

    pub fn stream_sets(&self) -> Vec<Arc<StreamSet<SourceStream>>> {
        self.registry.sets()
    }

    fn create_stream(&self, stream_id: StreamId, key: StreamKey) -> Option<Arc<SourceStream>> {
        let set = self.registry.get_or_create(stream_id);
        set.get_or_create(key, || {
            let ctx = StreamContext::new(stream_id, key, self.config.clone(), self.alarms.clone());
            SourceStream::new(ctx, self.downstream.clone())
        })
    }

    /// Existing stream for a reply from the target. Replies for streams we
    /// no longer hold are stale.
    fn reply_stream(&self, stream_id: StreamId, key: StreamKey, kind: &str) -> Option<Arc<SourceStream>> {
        let stream = self.stream(stream_id, key);
        if stream.is_none() {
            tracing::debug!(stream_id = %stream_id, %key, kind, "reply for unknown stream ignored");
        }
        stream
    }

    pub fn write_uncommitted(&self, stream_id: StreamId, key: StreamKey, range: TickRange) -> Result<(), GdError> {
        let Some(stream) = self.create_stream(stream_id, key) else {
            return Ok(());
        };
        stream.write_uncommitted(range)?;
        self.persist_if_persistent(stream_id, key);
        Ok(())
    }

    /// Commit a value. Best-effort values go straight out. Returns whether
    /// it was sent now rather than held behind the window.
    pub fn write_value(&self, stream_id: StreamId, key: StreamKey, range: TickRange) -> Result<bool, GdError> {
        if !key.reliability.has_stream() {
            log_send(
                "data",
                stream_id,
                self.downstream.send_data(DataMessage {
                    stream_id,
                    key,
                    range,
                }),
            );
            return Ok(true);
        }
        let Some(stream) = self.create_stream(stream_id, key) else {
            return Ok(false);
        };
        let sent = stream.write_value(range)?;
        self.persist_if_persistent(stream_id, key);
        Ok(sent)
    }

    /// Roll back `[start, end]`.
    pub fn write_silence(&self, stream_id: StreamId, key: StreamKey, start: Tick, end: Tick) -> Result<(), GdError> {
        let Some(stream) = self.create_stream(stream_id, key) else {
            return Ok(());
        };
        stream.write_silence(start, end)?;
        self.persist_if_persistent(stream_id, key);
        Ok(())
    }

    /// Returns the value ranges the ack released.
    pub fn process_ack(&self, ack: Ack) -> Result<Vec<TickRange>, GdError> {
        let Some(stream) = self.reply_stream(ack.stream_id, ack.key, "ack") else {
            return Ok(Vec::new());
        };
        let removed = stream.write_ack_prefix(ack.ack_prefix)?;
        if !removed.is_empty() {
            self.persist_if_persistent(ack.stream_id, ack.key);
        }
        Ok(removed)
    }

    pub fn process_nack(&self, nack: Nack) -> Result<(), GdError> {
        match self.reply_stream(nack.stream_id, nack.key, "nack") {
            Some(stream) => stream.process_nack(nack.start, nack.end),
            None => Ok(()),
        }
    }

    /// Answer a target's flush query, and send the same answer back.
    pub fn process_flush_query(&self, query: AreYouFlushed) -> FlushReply {
        let stream_id = query.stream_id;
        match self.registry.get(stream_id) {
            None => {
                log_send("flushed", stream_id, self.downstream.send_flushed(Flushed { stream_id }));
                FlushReply::Flushed
            }
            Some(set) => {
                let reply = NotFlushed {
                    stream_id,
                    request_id: query.request_id,
                    prefixes: set.completed_prefixes(),
                };
                log_send(
                    "not_flushed",
                    stream_id,
                    self.downstream.send_not_flushed(reply.clone()),
                );
                FlushReply::NotFlushed(reply)
            }
        }
    }

    /// Every stream in the set has nothing in doubt.
    pub fn is_flushable(&self, stream_id: StreamId) -> bool {
        self.registry
            .get(stream_id)
            .is_none_or(|set| set.streams().iter().all(|s| s.is_flushable()))
    }

    /// Discard the set and tell the target. Returns whether it existed.
    pub fn force_flush(&self, stream_id: StreamId) -> bool {
        let Some(set) = self.registry.remove(stream_id) else {
            return false;
        };
        set.flush_all();
        if let Some(store) = &self.store
            && let Err(err) = store.remove(stream_id)
        {
            tracing::warn!(stream_id = %stream_id, "failed to remove flushed stream: {err}");
        }
        tracing::info!(stream_id = %stream_id, "stream set flushed");
        log_send("flushed", stream_id, self.downstream.send_flushed(Flushed { stream_id }));
        true
    }

    /// Flush if nothing is in doubt. Returns whether it flushed.
    pub fn flush_if_complete(&self, stream_id: StreamId) -> bool {
        self.registry.contains(stream_id) && self.is_flushable(stream_id) && self.force_flush(stream_id)
    }

    pub fn persist(&self, stream_id: StreamId) -> Result<(), GdError> {
        let (Some(store), Some(set)) = (&self.store, self.registry.get(stream_id)) else {
            return Ok(());
        };
        set.request_update(store.as_ref())?;
        Ok(())
    }

    /// Rebuild every stored set, including the message ranges still in
    /// doubt. Returns how many sets were restored.
    pub fn restore(&self) -> Result<usize, GdError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let mut restored = 0;
        for stream_id in store.stream_ids()? {
            let Some(data) = store.restore(stream_id)? else {
                continue;
            };
            for prefix in &data.prefixes {
                if let Some(stream) = self.create_stream(stream_id, prefix.key) {
                    stream.reconstitute(prefix.completed_prefix)?;
                }
            }
            for stored in &data.messages {
                let Some(stream) = self.create_stream(stream_id, stored.key) else {
                    continue;
                };
                match stored.range.kind() {
                    TickKind::Value => stream.restore_value(stored.range)?,
                    TickKind::Uncommitted => stream.restore_uncommitted(stored.range)?,
                    kind => tracing::warn!(
                        stream_id = %stream_id,
                        ?kind,
                        "stored range is not a message, skipped"
                    ),
                }
            }
            restored += 1;
        }
        tracing::info!(restored, "output stream sets restored");
        Ok(restored)
    }

    fn persist_if_persistent(&self, stream_id: StreamId, key: StreamKey) {
        if !key.reliability.is_persistent() {
            return;
        }
        if let Err(err) = self.persist(stream_id) {
            tracing::warn!(stream_id = %stream_id, "failed to persist stream set: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::{MessageRef, Priority, Reliability, RequestId};
    use crate::gd::control::CompletedPrefix;
    use crate::test_harness::{ManualAlarms, MemoryStore, RecordingTransport};

    fn manager() -> (Arc<ManualAlarms>, Arc<RecordingTransport>, Arc<MemoryStore>, OutputManager) {
        let alarms = ManualAlarms::new();
        let transport = RecordingTransport::new();
        let store = MemoryStore::new();
        let manager = OutputManager::new(Arc::new(GdConfig::default()), alarms.clone(), transport.clone())
            .with_store(store.clone());
        (alarms, transport, store, manager)
    }

    fn assured() -> StreamKey {
        StreamKey::new(Priority::DEFAULT, Reliability::AssuredPersistent)
    }

    fn value(tick: Tick) -> TickRange {
        TickRange::value(tick, MessageRef::new(tick))
    }

    #[test]
    fn first_write_claims_the_shell() {
        let (_, transport, _, m) = manager();
        let shell = m.shell().unwrap();
        let id = StreamId::random();
        assert!(m.write_value(id, assured(), value(1)).unwrap());
        assert!(Arc::ptr_eq(&shell, &m.stream_sets()[0]));
        assert_eq!(transport.data_ticks(), vec![1]);
    }

    #[test]
    fn acks_for_unknown_streams_are_ignored() {
        let (_, _, _, m) = manager();
        let removed = m
            .process_ack(Ack {
                stream_id: StreamId::random(),
                key: assured(),
                ack_prefix: 5,
            })
            .unwrap();
        assert!(removed.is_empty());
        assert!(m.stream_sets().is_empty());
    }

    #[test]
    fn flush_query_reports_live_prefixes() {
        let (_, transport, _, m) = manager();
        let id = StreamId::random();
        m.write_value(id, assured(), value(1)).unwrap();
        m.process_ack(Ack {
            stream_id: id,
            key: assured(),
            ack_prefix: 1,
        })
        .unwrap();
        let reply = m.process_flush_query(AreYouFlushed {
            stream_id: id,
            request_id: RequestId::new(3),
        });
        assert_eq!(
            reply,
            FlushReply::NotFlushed(NotFlushed {
                stream_id: id,
                request_id: RequestId::new(3),
                prefixes: vec![CompletedPrefix {
                    key: assured(),
                    completed_prefix: 1,
                }],
            })
        );
        assert_eq!(transport.count("not_flushed"), 1);

        let gone = m.process_flush_query(AreYouFlushed {
            stream_id: StreamId::random(),
            request_id: RequestId::new(4),
        });
        assert_eq!(gone, FlushReply::Flushed);
    }

    #[test]
    fn flush_only_when_nothing_in_doubt() {
        let (_, transport, store, m) = manager();
        let id = StreamId::random();
        m.write_value(id, assured(), value(1)).unwrap();
        assert!(!m.flush_if_complete(id));
        m.process_ack(Ack {
            stream_id: id,
            key: assured(),
            ack_prefix: 1,
        })
        .unwrap();
        assert!(m.flush_if_complete(id));
        assert_eq!(transport.count("flushed"), 1);
        assert!(store.get(id).is_none());
        assert!(m.stream(id, assured()).is_none());
    }

    #[test]
    fn restore_brings_back_messages_in_doubt() {
        let (alarms, transport, store, m) = manager();
        let id = StreamId::random();
        m.write_value(id, assured(), value(1)).unwrap();
        m.write_value(id, assured(), value(2)).unwrap();
        m.process_ack(Ack {
            stream_id: id,
            key: assured(),
            ack_prefix: 1,
        })
        .unwrap();

        let fresh = OutputManager::new(Arc::new(GdConfig::default()), alarms.clone(), transport.clone())
            .with_store(store.clone());
        assert_eq!(fresh.restore().unwrap(), 1);
        let stream = fresh.stream(id, assured()).unwrap();
        assert_eq!(stream.completed_prefix(), 1);
        assert!(!stream.is_flushable());

        transport.clear();
        fresh
            .process_nack(Nack {
                stream_id: id,
                key: assured(),
                start: 2,
                end: 2,
            })
            .unwrap();
        assert_eq!(transport.data_ticks(), vec![2]);
    }

    #[test]
    fn best_effort_is_sent_without_a_stream() {
        let (_, transport, _, m) = manager();
        let key = StreamKey::new(Priority::DEFAULT, Reliability::BestEffortNonPersistent);
        assert!(m.write_value(StreamId::random(), key, value(9)).unwrap());
        assert_eq!(transport.data_ticks(), vec![9]);
        assert!(m.stream_sets().is_empty());
    }
}
