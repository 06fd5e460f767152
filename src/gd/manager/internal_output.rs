//! Downstream-facing side of an intermediate node: fans traffic out to
//! every neighbour and folds their acks and nacks back into the input side.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::core::{GdConfig, NeighbourId, StreamId, StreamKey, Tick};
use crate::gd::alarm::AlarmManager;
use crate::gd::control::{
    Ack, AckExpected, AreYouFlushed, DataMessage, DownstreamControl, Flushed, Nack, NotFlushed,
    Silence, log_send,
};
use crate::gd::error::GdError;
use crate::gd::internal_output::InternalOutputStream;
use crate::gd::registry::StreamSetRegistry;
use crate::gd::stream::{Stream, StreamContext};
use crate::gd::stream_set::StreamSet;

use super::{FlushReply, InternalInputManager};

#[derive(Clone)]
struct Neighbour {
    downstream: Arc<dyn DownstreamControl>,
    registry: Arc<StreamSetRegistry<InternalOutputStream>>,
}

pub struct InternalOutputManager {
    config: Arc<GdConfig>,
    alarms: Arc<dyn AlarmManager>,
    input: Arc<InternalInputManager>,
    neighbours: RwLock<BTreeMap<NeighbourId, Neighbour>>,
}

impl InternalOutputManager {
    pub fn new(config: Arc<GdConfig>, alarms: Arc<dyn AlarmManager>, input: Arc<InternalInputManager>) -> Self {
        Self {
            config,
            alarms,
            input,
            neighbours: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn input(&self) -> &Arc<InternalInputManager> {
        &self.input
    }

    pub fn add_neighbour(&self, id: NeighbourId, downstream: Arc<dyn DownstreamControl>) {
        self.neighbours.write().insert(
            id,
            Neighbour {
                downstream,
                registry: Arc::new(StreamSetRegistry::new()),
            },
        );
        tracing::info!(neighbour = %id, "neighbour added");
    }

    /// Drop a neighbour and its streams. Its acks no longer hold back the
    /// aggregate.
    pub fn remove_neighbour(&self, id: NeighbourId) -> bool {
        let Some(neighbour) = self.neighbours.write().remove(&id) else {
            return false;
        };
        let sets = neighbour.registry.sets();
        for set in &sets {
            set.flush_all();
        }
        tracing::info!(neighbour = %id, "neighbour removed");
        for stream in sets.iter().flat_map(|set| set.streams()) {
            if let Err(err) = self.forward_min_ack(stream.stream_id(), stream.key()) {
                tracing::warn!(stream_id = %stream.stream_id(), key = %stream.key(), "upstream ack after neighbour removal failed: {err}");
            }
        }
        true
    }

    pub fn neighbours(&self) -> Vec<NeighbourId> {
        self.neighbours.read().keys().copied().collect()
    }

    pub fn stream(&self, neighbour: NeighbourId, stream_id: StreamId, key: StreamKey) -> Option<Arc<InternalOutputStream>> {
        let registry = self.neighbours.read().get(&neighbour)?.registry.clone();
        registry.get(stream_id)?.get(key)
    }

    /// Every neighbour's stream sets.
    pub fn stream_sets(&self) -> Vec<(NeighbourId, Arc<StreamSet<InternalOutputStream>>)> {
        self.snapshot()
            .into_iter()
            .flat_map(|(id, n)| n.registry.sets().into_iter().map(move |set| (id, set)))
            .collect()
    }

    fn snapshot(&self) -> Vec<(NeighbourId, Neighbour)> {
        self.neighbours
            .read()
            .iter()
            .map(|(id, n)| (*id, n.clone()))
            .collect()
    }

    fn neighbour(&self, id: NeighbourId) -> Option<Neighbour> {
        let found = self.neighbours.read().get(&id).cloned();
        if found.is_none() {
            tracing::debug!(neighbour = %id, "message from unknown neighbour");
        }
        found
    }

    fn create_stream(
        &self,
        id: NeighbourId,
        neighbour: &Neighbour,
        stream_id: StreamId,
        key: StreamKey,
    ) -> Option<Arc<InternalOutputStream>> {
        let set = neighbour.registry.get_or_create(stream_id);
        set.get_or_create(key, || {
            let ctx = StreamContext::new(stream_id, key, self.config.clone(), self.alarms.clone());
            InternalOutputStream::new(ctx, id, neighbour.downstream.clone())
        })
    }

    /// A value from upstream. Returns how many neighbours it went to.
    pub fn write_value(&self, msg: DataMessage) -> Result<usize, GdError> {
        if !self.input.process_value(&msg)? {
            return Ok(0);
        }
        let mut sent = 0;
        for (id, neighbour) in self.snapshot() {
            match self.create_stream(id, &neighbour, msg.stream_id, msg.key) {
                Some(stream) => {
                    if stream.write_value(msg.range)? {
                        sent += 1;
                    }
                }
                None => {
                    log_send("data", msg.stream_id, neighbour.downstream.send_data(msg.clone()));
                    sent += 1;
                }
            }
        }
        Ok(sent)
    }

    pub fn write_silence(&self, msg: Silence) -> Result<(), GdError> {
        if !self.input.process_silence(&msg)? {
            return Ok(());
        }
        for (id, neighbour) in self.snapshot() {
            if let Some(stream) = self.create_stream(id, &neighbour, msg.stream_id, msg.key) {
                stream.write_silence(msg.start, msg.end)?;
            }
        }
        Ok(())
    }

    /// A neighbour acked. Upstream hears the lowest prefix across every
    /// neighbour carrying the stream.
    pub fn process_ack(&self, from: NeighbourId, ack: Ack) -> Result<(), GdError> {
        let Some(neighbour) = self.neighbour(from) else {
            return Ok(());
        };
        let Some(stream) = neighbour
            .registry
            .get(ack.stream_id)
            .and_then(|set| set.get(ack.key))
        else {
            tracing::debug!(stream_id = %ack.stream_id, neighbour = %from, "ack for unknown stream");
            return Ok(());
        };
        stream.write_ack_prefix(ack.ack_prefix)?;
        self.forward_min_ack(ack.stream_id, ack.key)
    }

    /// Feed upstream the lowest prefix across every neighbour still
    /// carrying the stream.
    fn forward_min_ack(&self, stream_id: StreamId, key: StreamKey) -> Result<(), GdError> {
        let aggregate = self
            .snapshot()
            .iter()
            .filter_map(|(_, n)| n.registry.get(stream_id)?.get(key))
            .map(|s| s.completed_prefix())
            .min();
        match aggregate {
            Some(prefix) => self.input.write_ack_prefix(stream_id, key, prefix),
            None => Ok(()),
        }
    }

    /// Answer what we hold locally and ask upstream for the rest.
    pub fn process_nack(&self, from: NeighbourId, nack: Nack) -> Result<(), GdError> {
        let Some(neighbour) = self.neighbour(from) else {
            return Ok(());
        };
        let Some(stream) = neighbour
            .registry
            .get(nack.stream_id)
            .and_then(|set| set.get(nack.key))
        else {
            tracing::debug!(stream_id = %nack.stream_id, neighbour = %from, "nack for unknown stream");
            return Ok(());
        };
        for (start, end) in stream.process_nack(nack.start, nack.end)? {
            self.input
                .process_nack(nack.stream_id, nack.key, start, end)?;
        }
        Ok(())
    }

    /// Upstream prompts us; we answer it and prompt our neighbours in turn.
    pub fn process_ack_expected(&self, msg: AckExpected) -> Result<(), GdError> {
        self.input.process_ack_expected(&msg)?;
        for (_, neighbour) in self.snapshot() {
            if let Some(stream) = neighbour
                .registry
                .get(msg.stream_id)
                .and_then(|set| set.get(msg.key))
            {
                stream.process_ack_expected(msg.tick);
            }
        }
        Ok(())
    }

    /// A neighbour asks whether it may discard a stream.
    pub fn process_flush_query(&self, from: NeighbourId, query: AreYouFlushed) -> FlushReply {
        let stream_id = query.stream_id;
        let Some(neighbour) = self.neighbour(from) else {
            return FlushReply::Flushed;
        };
        match neighbour.registry.get(stream_id) {
            None => {
                log_send("flushed", stream_id, neighbour.downstream.send_flushed(Flushed { stream_id }));
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
                    neighbour.downstream.send_not_flushed(reply.clone()),
                );
                FlushReply::NotFlushed(reply)
            }
        }
    }

    /// Upstream discarded the stream; discard it here and pass it on.
    pub fn process_flushed(&self, msg: Flushed) -> bool {
        let had_input = self.input.process_flushed(&msg);
        let had_output = self.force_flush(msg.stream_id);
        had_input || had_output
    }

    pub fn process_not_flushed(&self, msg: NotFlushed) -> Result<(), GdError> {
        self.input.process_not_flushed(&msg)
    }

    /// Drop the stream from every neighbour that carries it and tell them.
    pub fn force_flush(&self, stream_id: StreamId) -> bool {
        let mut any = false;
        for (id, neighbour) in self.snapshot() {
            if let Some(set) = neighbour.registry.remove(stream_id) {
                set.flush_all();
                log_send("flushed", stream_id, neighbour.downstream.send_flushed(Flushed { stream_id }));
                tracing::debug!(stream_id = %stream_id, neighbour = %id, "flushed towards neighbour");
                any = true;
            }
        }
        any
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use uuid::Uuid;

    use crate::core::{MessageRef, Priority, Reliability, TickRange};
    use crate::test_harness::{ManualAlarms, RecordingTransport};

    struct Node {
        upstream: Arc<RecordingTransport>,
        left: (NeighbourId, Arc<RecordingTransport>),
        right: (NeighbourId, Arc<RecordingTransport>),
        manager: InternalOutputManager,
    }

    fn node() -> Node {
        let config = Arc::new(GdConfig {
            ack_coalesce_ms: 0,
            ..GdConfig::default()
        });
        let alarms = ManualAlarms::new();
        let upstream = RecordingTransport::new();
        let input = Arc::new(InternalInputManager::new(config.clone(), alarms.clone(), upstream.clone()));
        let manager = InternalOutputManager::new(config, alarms, input);
        let left = (NeighbourId::new(Uuid::new_v4()), RecordingTransport::new());
        let right = (NeighbourId::new(Uuid::new_v4()), RecordingTransport::new());
        manager.add_neighbour(left.0, left.1.clone());
        manager.add_neighbour(right.0, right.1.clone());
        Node {
            upstream,
            left,
            right,
            manager,
        }
    }

    fn key() -> StreamKey {
        StreamKey::new(Priority::DEFAULT, Reliability::ReliableNonPersistent)
    }

    fn data(stream_id: StreamId, tick: Tick) -> DataMessage {
        DataMessage {
            stream_id,
            key: key(),
            range: TickRange::value(tick, MessageRef::new(tick)),
        }
    }

    fn ack(stream_id: StreamId, prefix: Tick) -> Ack {
        Ack {
            stream_id,
            key: key(),
            ack_prefix: prefix,
        }
    }

    #[test]
    fn values_fan_out_once() {
        let n = node();
        let id = StreamId::random();
        assert_eq!(n.manager.write_value(data(id, 1)).unwrap(), 2);
        assert_eq!(n.manager.write_value(data(id, 1)).unwrap(), 0);
        assert_eq!(n.left.1.data_ticks(), vec![1]);
        assert_eq!(n.right.1.data_ticks(), vec![1]);
    }

    #[test]
    fn upstream_ack_waits_for_slowest_neighbour() {
        let n = node();
        let id = StreamId::random();
        n.manager.write_value(data(id, 1)).unwrap();
        n.manager.write_value(data(id, 2)).unwrap();

        n.manager.process_ack(n.left.0, ack(id, 2)).unwrap();
        assert!(n.upstream.acks().is_empty());
        n.manager.process_ack(n.right.0, ack(id, 1)).unwrap();
        assert_eq!(n.upstream.acks(), vec![1]);
        n.manager.process_ack(n.right.0, ack(id, 2)).unwrap();
        assert_eq!(n.upstream.acks(), vec![1, 2]);
    }

    #[test]
    fn nack_is_answered_locally_and_gaps_go_upstream() {
        let n = node();
        let id = StreamId::random();
        n.manager.write_value(data(id, 2)).unwrap();
        n.left.1.clear();
        n.manager
            .process_nack(
                n.left.0,
                Nack {
                    stream_id: id,
                    key: key(),
                    start: 1,
                    end: 2,
                },
            )
            .unwrap();
        assert_eq!(n.left.1.data_ticks(), vec![2]);
        assert_eq!(n.upstream.nacks(), vec![(1, 1)]);
    }

    #[test]
    fn nack_for_unknown_stream_is_dropped() {
        let n = node();
        let id = StreamId::random();
        n.manager
            .process_nack(
                n.left.0,
                Nack {
                    stream_id: id,
                    key: key(),
                    start: 1,
                    end: 3,
                },
            )
            .unwrap();
        assert!(n.manager.stream_sets().is_empty());
        assert!(n.upstream.nacks().is_empty());
        assert!(n.left.1.take().is_empty());

        let reply = n.manager.process_flush_query(
            n.left.0,
            AreYouFlushed {
                stream_id: id,
                request_id: crate::core::RequestId::new(1),
            },
        );
        assert_eq!(reply, FlushReply::Flushed);
    }

    #[test]
    fn flushed_propagates_to_neighbours() {
        let n = node();
        let id = StreamId::random();
        n.manager.write_value(data(id, 1)).unwrap();
        assert!(n.manager.process_flushed(Flushed { stream_id: id }));
        assert_eq!(n.left.1.count("flushed"), 1);
        assert_eq!(n.right.1.count("flushed"), 1);
        assert!(n.manager.stream(n.left.0, id, key()).is_none());
        assert!(n.manager.input().stream(id, key()).is_none());
    }

    #[test]
    fn removed_neighbour_no_longer_holds_back_acks() {
        let n = node();
        let id = StreamId::random();
        n.manager.write_value(data(id, 1)).unwrap();
        n.manager.process_ack(n.left.0, ack(id, 1)).unwrap();
        assert!(n.upstream.acks().is_empty());
        assert!(n.manager.remove_neighbour(n.right.0));
        assert_eq!(n.upstream.acks(), vec![1]);
        assert_eq!(n.manager.neighbours(), vec![n.left.0]);
        let sets = n.manager.stream_sets();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].0, n.left.0);
    }
}
