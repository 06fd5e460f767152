//! Control and data messages exchanged by the two ends of a stream, and the
//! transport seams they travel through.
//!
//! Wire encoding is the transport's business; the engine only sees these
//! typed requests.

use serde::{Deserialize, Serialize};

use crate::core::{RequestId, StreamId, StreamKey, Tick, TickRange};

use super::error::SendError;

/// Target to source: every tick up to `ack_prefix` is Completed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub stream_id: StreamId,
    pub key: StreamKey,
    pub ack_prefix: Tick,
}

/// Target to source: please resend `[start, end]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nack {
    pub stream_id: StreamId,
    pub key: StreamKey,
    pub start: Tick,
    pub end: Tick,
}

/// Source to target: an ack for `tick` is overdue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckExpected {
    pub stream_id: StreamId,
    pub key: StreamKey,
    pub tick: Tick,
}

/// Target to source: is this stream fully resolved on your side?
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreYouFlushed {
    pub stream_id: StreamId,
    pub request_id: RequestId,
}

/// Source to target: the stream is gone, discard it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flushed {
    pub stream_id: StreamId,
}

/// One live stream's position in a `NotFlushed` answer or a stored snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompletedPrefix {
    pub key: StreamKey,
    pub completed_prefix: Tick,
}

/// Source to target: the stream is still live, with these prefixes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotFlushed {
    pub stream_id: StreamId,
    pub request_id: RequestId,
    pub prefixes: Vec<CompletedPrefix>,
}

/// A value, possibly combined with silence around it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage {
    pub stream_id: StreamId,
    pub key: StreamKey,
    pub range: TickRange,
}

/// `[start, end]` holds no messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Silence {
    pub stream_id: StreamId,
    pub key: StreamKey,
    pub start: Tick,
    pub end: Tick,
}

/// Every message an engine can emit, for recording and routing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Ack(Ack),
    Nack(Nack),
    AckExpected(AckExpected),
    AreYouFlushed(AreYouFlushed),
    Flushed(Flushed),
    NotFlushed(NotFlushed),
    Data(DataMessage),
    Silence(Silence),
}

impl ControlMessage {
    pub fn stream_id(&self) -> StreamId {
        match self {
            ControlMessage::Ack(m) => m.stream_id,
            ControlMessage::Nack(m) => m.stream_id,
            ControlMessage::AckExpected(m) => m.stream_id,
            ControlMessage::AreYouFlushed(m) => m.stream_id,
            ControlMessage::Flushed(m) => m.stream_id,
            ControlMessage::NotFlushed(m) => m.stream_id,
            ControlMessage::Data(m) => m.stream_id,
            ControlMessage::Silence(m) => m.stream_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Ack(_) => "ack",
            ControlMessage::Nack(_) => "nack",
            ControlMessage::AckExpected(_) => "ack_expected",
            ControlMessage::AreYouFlushed(_) => "are_you_flushed",
            ControlMessage::Flushed(_) => "flushed",
            ControlMessage::NotFlushed(_) => "not_flushed",
            ControlMessage::Data(_) => "data",
            ControlMessage::Silence(_) => "silence",
        }
    }
}

/// Sends from a receiving end back towards the producer.
pub trait UpstreamControl: Send + Sync {
    fn send_ack(&self, ack: Ack) -> Result<(), SendError>;
    fn send_nack(&self, nack: Nack) -> Result<(), SendError>;
    fn send_are_you_flushed(&self, query: AreYouFlushed) -> Result<(), SendError>;
}

/// Sends from a producing end towards the consumer.
pub trait DownstreamControl: Send + Sync {
    fn send_data(&self, msg: DataMessage) -> Result<(), SendError>;
    fn send_silence(&self, msg: Silence) -> Result<(), SendError>;
    fn send_ack_expected(&self, msg: AckExpected) -> Result<(), SendError>;
    fn send_flushed(&self, msg: Flushed) -> Result<(), SendError>;
    fn send_not_flushed(&self, msg: NotFlushed) -> Result<(), SendError>;
}

/// Log a failed fire-and-forget send. The protocol heals lost control
/// traffic by itself.
pub(crate) fn log_send(kind: &'static str, stream_id: StreamId, result: Result<(), SendError>) {
    if let Err(err) = result {
        tracing::warn!(stream_id = %stream_id, kind, "control send failed: {err}");
    }
}
