//! Upstream-facing side of an intermediate node.

use std::sync::Arc;

use crate::core::{GdConfig, StreamId, StreamKey, Tick};
use crate::gd::alarm::AlarmManager;
use crate::gd::control::{
    AckExpected, AreYouFlushed, DataMessage, Flushed, NotFlushed, Silence, UpstreamControl,
    log_send,
};
use crate::gd::error::GdError;
use crate::gd::internal_input::InternalInputStream;
use crate::gd::registry::StreamSetRegistry;
use crate::gd::stream::{Stream, StreamContext};
use crate::gd::stream_set::StreamSet;

use super::FlushQueries;

pub struct InternalInputManager {
    config: Arc<GdConfig>,
    alarms: Arc<dyn AlarmManager>,
    upstream: Arc<dyn UpstreamControl>,
    registry: StreamSetRegistry<InternalInputStream>,
    queries: FlushQueries,
}

impl InternalInputManager {
    pub fn new(
        config: Arc<GdConfig>,
        alarms: Arc<dyn AlarmManager>,
        upstream: Arc<dyn UpstreamControl>,
    ) -> Self {
        Self {
            config,
            alarms,
            upstream,
            registry: StreamSetRegistry::new(),
            queries: FlushQueries::default(),
        }
    }

    pub fn stream(&self, stream_id: StreamId, key: StreamKey) -> Option<Arc<InternalInputStream>> {
        self.registry.get(stream_id)?.get(key)
    }

    pub fn stream_sets(&self) -> Vec<Arc<StreamSet<InternalInputStream>>> {
        self.registry.sets()
    }

    fn create_stream(&self, stream_id: StreamId, key: StreamKey) -> Option<Arc<InternalInputStream>> {
        let set = self.registry.get_or_create(stream_id);
        set.get_or_create(key, || {
            let ctx = StreamContext::new(stream_id, key, self.config.clone(), self.alarms.clone());
            InternalInputStream::new(ctx, self.upstream.clone())
        })
    }

    /// Returns whether the value is new here and should be forwarded.
    pub fn process_value(&self, msg: &DataMessage) -> Result<bool, GdError> {
        match self.create_stream(msg.stream_id, msg.key) {
            Some(stream) => stream.write_value(msg.range),
            None => Ok(true),
        }
    }

    pub fn process_silence(&self, msg: &Silence) -> Result<bool, GdError> {
        match self.create_stream(msg.stream_id, msg.key) {
            Some(stream) => stream.write_silence(msg.start, msg.end),
            None => Ok(false),
        }
    }

    /// Downstream is missing `[start, end]` and we do not have it either.
    pub fn process_nack(&self, stream_id: StreamId, key: StreamKey, start: Tick, end: Tick) -> Result<(), GdError> {
        match self.stream(stream_id, key) {
            Some(stream) => stream.process_nack(start, end),
            None => {
                tracing::debug!(stream_id = %stream_id, %key, "nack for unknown stream");
                Ok(())
            }
        }
    }

    pub fn process_ack_expected(&self, msg: &AckExpected) -> Result<(), GdError> {
        if !self.registry.contains(msg.stream_id) {
            self.query_flushed(msg.stream_id);
            return Ok(());
        }
        match self.create_stream(msg.stream_id, msg.key) {
            Some(stream) => stream.process_ack_expected(msg.tick),
            None => Ok(()),
        }
    }

    /// Every neighbour has acked through `prefix`.
    pub fn write_ack_prefix(&self, stream_id: StreamId, key: StreamKey, prefix: Tick) -> Result<(), GdError> {
        match self.stream(stream_id, key) {
            Some(stream) => stream.write_ack_prefix(prefix),
            None => Ok(()),
        }
    }

    pub fn process_flushed(&self, msg: &Flushed) -> bool {
        self.queries.clear(msg.stream_id);
        match self.registry.remove(msg.stream_id) {
            Some(set) => {
                set.flush_all();
                true
            }
            None => false,
        }
    }

    pub fn process_not_flushed(&self, msg: &NotFlushed) -> Result<(), GdError> {
        if !self.queries.answer(msg.stream_id, msg.request_id) {
            tracing::debug!(stream_id = %msg.stream_id, "not-flushed reply to no pending query");
            return Ok(());
        }
        for prefix in &msg.prefixes {
            if let Some(stream) = self.create_stream(msg.stream_id, prefix.key) {
                stream.reconstitute(prefix.completed_prefix)?;
            }
        }
        Ok(())
    }

    fn query_flushed(&self, stream_id: StreamId) {
        let now = self.alarms.now_ms();
        if let Some(request_id) = self
            .queries
            .begin(stream_id, now, self.config.flush_query_ms)
        {
            log_send(
                "are_you_flushed",
                stream_id,
                self.upstream.send_are_you_flushed(AreYouFlushed {
                    stream_id,
                    request_id,
                }),
            );
        }
    }
}
