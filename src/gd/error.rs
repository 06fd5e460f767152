//! Stream-layer capability errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::{InternalError, StreamId};
use crate::error::{Effect, Transience};

/// Control-message send failure. Logged and swallowed on most paths: the
/// protocol retries through AckExpected and re-nack timers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SendError {
    #[error("neighbour unreachable: {reason}")]
    Unreachable { reason: String },
    #[error("send resources exhausted: {reason}")]
    Resource { reason: String },
}

impl SendError {
    pub fn transience(&self) -> Transience {
        Transience::Retryable
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}

/// Local delivery failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeliveryError {
    /// The destination cannot take messages in its current configuration.
    #[error("delivery not possible for stream {stream_id}: {reason}")]
    NotPossible { stream_id: StreamId, reason: String },
    #[error("delivery resources exhausted for stream {stream_id}: {reason}")]
    Resource { stream_id: StreamId, reason: String },
}

impl DeliveryError {
    pub fn transience(&self) -> Transience {
        match self {
            DeliveryError::NotPossible { .. } => Transience::Permanent,
            DeliveryError::Resource { .. } => Transience::Retryable,
        }
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("stream store io failed at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stream store record for {stream_id} is malformed: {reason}")]
    Codec { stream_id: StreamId, reason: String },
    #[error("stream store unavailable: {reason}")]
    Unavailable { reason: String },
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        match self {
            StoreError::Io { .. } => Transience::Unknown,
            StoreError::Codec { .. } => Transience::Permanent,
            StoreError::Unavailable { .. } => Transience::Retryable,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            StoreError::Io { .. } => Effect::Unknown,
            StoreError::Codec { .. } | StoreError::Unavailable { .. } => Effect::None,
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GdError {
    #[error("internal error on stream {stream_id}: {source}")]
    Internal {
        stream_id: StreamId,
        #[source]
        source: InternalError,
    },
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GdError {
    pub fn internal(stream_id: StreamId, source: InternalError) -> Self {
        tracing::error!(stream_id = %stream_id, "stream state is suspect: {source}");
        GdError::Internal { stream_id, source }
    }

    pub fn transience(&self) -> Transience {
        match self {
            GdError::Internal { .. } => Transience::Permanent,
            GdError::Send(e) => e.transience(),
            GdError::Delivery(e) => e.transience(),
            GdError::Store(e) => e.transience(),
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            GdError::Internal { .. } => Effect::Unknown,
            GdError::Send(e) => e.effect(),
            GdError::Delivery(e) => e.effect(),
            GdError::Store(e) => e.effect(),
        }
    }
}
