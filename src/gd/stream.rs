//! Contract shared by every stream variant.

use std::sync::Arc;

use crate::core::{
    GdConfig, InternalError, StateStream, StreamId, StreamKey, Tick, TickRange, TicksOnStream,
};

use super::alarm::AlarmManager;
use super::error::GdError;

/// Identity and collaborators every stream is built with.
#[derive(Clone)]
pub struct StreamContext {
    pub stream_id: StreamId,
    pub key: StreamKey,
    pub config: Arc<GdConfig>,
    pub alarms: Arc<dyn AlarmManager>,
}

impl StreamContext {
    pub fn new(
        stream_id: StreamId,
        key: StreamKey,
        config: Arc<GdConfig>,
        alarms: Arc<dyn AlarmManager>,
    ) -> Self {
        Self {
            stream_id,
            key,
            config,
            alarms,
        }
    }

    pub(crate) fn with_key(&self, key: StreamKey) -> Self {
        Self {
            key,
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for StreamContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamContext")
            .field("stream_id", &self.stream_id)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

pub trait Stream: Send + Sync {
    fn stream_id(&self) -> StreamId;

    fn key(&self) -> StreamKey;

    /// Every tick at or below this is Completed.
    fn completed_prefix(&self) -> Tick;

    /// Snapshot of the tick state, `None` for streams that track none.
    fn state_stream(&self) -> Option<StateStream>;

    /// Mark `tick` Completed whatever it holds.
    fn write_silence_forced(&self, tick: Tick) -> Result<(), GdError>;

    fn ticks_on_stream(&self) -> TicksOnStream;

    /// Stop every timer. Called when the owning set goes away.
    fn flush(&self);

    /// Raise the completed prefix to `prefix` from a peer's or the store's
    /// record.
    fn reconstitute(&self, prefix: Tick) -> Result<(), GdError>;

    /// Ranges above the prefix worth persisting beside it.
    fn persisted_ranges(&self) -> Vec<TickRange> {
        Vec::new()
    }
}

pub(crate) trait InternalResultExt<T> {
    fn in_stream(self, stream_id: StreamId) -> Result<T, GdError>;
}

impl<T> InternalResultExt<T> for Result<T, InternalError> {
    fn in_stream(self, stream_id: StreamId) -> Result<T, GdError> {
        self.map_err(|e| GdError::internal(stream_id, e))
    }
}
