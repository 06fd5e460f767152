//! Receiving side: data and AckExpected from remote sources land here.

use std::sync::Arc;

use crate::core::{GdConfig, StreamId, StreamKey, TickKind};
use crate::gd::alarm::AlarmManager;
use crate::gd::control::{
    AckExpected, AreYouFlushed, DataMessage, Flushed, NotFlushed, Silence, UpstreamControl,
    log_send,
};
use crate::gd::deliver::{Capacity, MessageDeliverer};
use crate::gd::error::{DeliveryError, GdError};
use crate::gd::registry::StreamSetRegistry;
use crate::gd::store::StreamStore;
use crate::gd::stream::{Stream, StreamContext};
use crate::gd::stream_set::StreamSet;
use crate::gd::target::TargetStream;

use super::FlushQueries;

pub struct InputManager {
    config: Arc<GdConfig>,
    alarms: Arc<dyn AlarmManager>,
    upstream: Arc<dyn UpstreamControl>,
    deliverer: Arc<dyn MessageDeliverer>,
    store: Option<Arc<dyn StreamStore>>,
    registry: StreamSetRegistry<TargetStream>,
    queries: FlushQueries,
}

impl InputManager {
    pub fn new(
        config: Arc<GdConfig>,
        alarms: Arc<dyn AlarmManager>,
        upstream: Arc<dyn UpstreamControl>,
        deliverer: Arc<dyn MessageDeliverer>,
    ) -> Self {
        Self {
            config,
            alarms,
            upstream,
            deliverer,
            store: None,
            registry: StreamSetRegistry::new(),
            queries: FlushQueries::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StreamStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn stream(&self, stream_id: StreamId, key: StreamKey) -> Option<Arc<TargetStream>> {
        self.registry.get(stream_id)?.get(key)
    }

    pub fn stream_sets(&self) -> Vec<Arc<StreamSet<TargetStream>>> {
        self.registry.sets()
    }

    fn create_stream(&self, set: &StreamSet<TargetStream>, key: StreamKey) -> Option<Arc<TargetStream>> {
        let stream_id = set.stream_id();
        set.get_or_create(key, || {
            let ctx = StreamContext::new(stream_id, key, self.config.clone(), self.alarms.clone());
            Arc::new(TargetStream::new(ctx, self.upstream.clone(), self.deliverer.clone()))
        })
    }

    pub fn process_value(&self, msg: DataMessage) -> Result<(), GdError> {
        let DataMessage {
            stream_id,
            key,
            range,
        } = msg;
        if !key.reliability.has_stream() {
            return self.deliver_best_effort(stream_id, key, range);
        }
        let set = self.registry.get_or_create(stream_id);
        let Some(stream) = self.create_stream(&set, key) else {
            return Ok(());
        };
        let before = stream.completed_prefix();
        stream.write_value(range)?;
        self.persist_if_advanced(&set, &*stream, before);
        Ok(())
    }

    pub fn process_silence(&self, msg: Silence) -> Result<(), GdError> {
        if !msg.key.reliability.has_stream() {
            return Ok(());
        }
        let set = self.registry.get_or_create(msg.stream_id);
        let Some(stream) = self.create_stream(&set, msg.key) else {
            return Ok(());
        };
        let before = stream.completed_prefix();
        stream.write_silence(msg.start, msg.end)?;
        self.persist_if_advanced(&set, &*stream, before);
        Ok(())
    }

    /// An AckExpected for a stream id we have never seen means we may have
    /// lost it; ask the source whether it still exists.
    pub fn process_ack_expected(&self, msg: AckExpected) -> Result<(), GdError> {
        let Some(set) = self.registry.get(msg.stream_id) else {
            self.query_flushed(msg.stream_id);
            return Ok(());
        };
        match self.create_stream(&set, msg.key) {
            Some(stream) => stream.process_ack_expected(msg.tick),
            None => Ok(()),
        }
    }

    /// The source has discarded the stream; so do we.
    pub fn process_flushed(&self, msg: Flushed) -> bool {
        self.queries.clear(msg.stream_id);
        let Some(set) = self.registry.remove(msg.stream_id) else {
            tracing::debug!(stream_id = %msg.stream_id, "flushed for unknown stream");
            return false;
        };
        set.flush_all();
        if let Some(store) = &self.store
            && let Err(err) = store.remove(msg.stream_id)
        {
            tracing::warn!(stream_id = %msg.stream_id, "failed to remove flushed stream: {err}");
        }
        tracing::debug!(stream_id = %msg.stream_id, "stream set flushed");
        true
    }

    /// The source still has the stream: rebuild each listed stream from its
    /// completed prefix.
    pub fn process_not_flushed(&self, msg: NotFlushed) -> Result<(), GdError> {
        if !self.queries.answer(msg.stream_id, msg.request_id) {
            tracing::debug!(
                stream_id = %msg.stream_id,
                request_id = msg.request_id.get(),
                "not-flushed reply to no pending query"
            );
            return Ok(());
        }
        let set = self.registry.get_or_create(msg.stream_id);
        for prefix in &msg.prefixes {
            if let Some(stream) = self.create_stream(&set, prefix.key) {
                stream.reconstitute(prefix.completed_prefix)?;
            }
        }
        self.persist_set(&set)
    }

    /// The deliverer's open batch committed.
    pub fn batch_committed(&self, stream_id: StreamId) -> Result<(), GdError> {
        let Some(set) = self.registry.get(stream_id) else {
            return Ok(());
        };
        for stream in set.streams() {
            stream.batch_committed()?;
        }
        self.persist_set(&set)
    }

    pub fn batch_rolled_back(&self, stream_id: StreamId) -> Result<(), GdError> {
        let Some(set) = self.registry.get(stream_id) else {
            return Ok(());
        };
        for stream in set.streams() {
            stream.batch_rolled_back()?;
        }
        Ok(())
    }

    pub fn persist(&self, stream_id: StreamId) -> Result<(), GdError> {
        match self.registry.get(stream_id) {
            Some(set) => self.persist_set(&set),
            None => Ok(()),
        }
    }

    /// Rebuild every stored stream set. Returns how many were restored.
    pub fn restore(&self) -> Result<usize, GdError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let mut restored = 0;
        for stream_id in store.stream_ids()? {
            let Some(data) = store.restore(stream_id)? else {
                continue;
            };
            let set = self.registry.get_or_create(stream_id);
            for prefix in &data.prefixes {
                if let Some(stream) = self.create_stream(&set, prefix.key) {
                    stream.reconstitute(prefix.completed_prefix)?;
                }
            }
            restored += 1;
        }
        tracing::info!(restored, "input stream sets restored");
        Ok(restored)
    }

    fn query_flushed(&self, stream_id: StreamId) {
        let now = self.alarms.now_ms();
        let Some(request_id) = self
            .queries
            .begin(stream_id, now, self.config.flush_query_ms)
        else {
            return;
        };
        tracing::debug!(stream_id = %stream_id, "ack expected for unknown stream, asking if flushed");
        log_send(
            "are_you_flushed",
            stream_id,
            self.upstream.send_are_you_flushed(AreYouFlushed {
                stream_id,
                request_id,
            }),
        );
    }

    fn deliver_best_effort(
        &self,
        stream_id: StreamId,
        key: StreamKey,
        range: crate::core::TickRange,
    ) -> Result<(), GdError> {
        let Some(value) = range.value_ref().filter(|_| range.kind() == TickKind::Value) else {
            return Ok(());
        };
        if self.deliverer.check_capacity(stream_id, key) != Capacity::Accepting {
            tracing::debug!(stream_id = %stream_id, tick = value.value_tick, "best-effort value dropped");
            return Ok(());
        }
        match self.deliverer.deliver(stream_id, key, &[value]) {
            Ok(_) => Ok(()),
            Err(DeliveryError::NotPossible { reason, .. }) => {
                tracing::debug!(stream_id = %stream_id, "best-effort value dropped: {reason}");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn persist_if_advanced(&self, set: &StreamSet<TargetStream>, stream: &dyn Stream, before: u64) {
        if !stream.key().reliability.is_persistent() || stream.completed_prefix() <= before {
            return;
        }
        if let Err(err) = self.persist_set(set) {
            tracing::warn!(stream_id = %set.stream_id(), "failed to persist stream set: {err}");
        }
    }

    fn persist_set(&self, set: &StreamSet<TargetStream>) -> Result<(), GdError> {
        if let Some(store) = &self.store {
            set.request_update(store.as_ref())?;
        }
        Ok(())
    }
}
