//! Guaranteed-delivery streams: the per-stream state machines on each end of
//! a link, and the managers that route protocol traffic to them.
//!
//! A source numbers messages with ticks and keeps them until acked. A target
//! tracks which ticks it has seen, nacks gaps, delivers in order and acks its
//! completed prefix. An intermediate node runs an internal input facing
//! upstream and one internal output per downstream neighbour.

pub mod alarm;
pub mod control;
pub mod deliver;
pub mod error;
pub mod internal_input;
pub mod internal_output;
pub mod manager;
pub mod registry;
pub mod source;
pub mod store;
pub mod stream;
pub mod stream_set;
pub mod target;

pub use alarm::{AlarmCallback, AlarmHandle, AlarmManager, ThreadAlarms};
pub use control::{
    Ack, AckExpected, AreYouFlushed, CompletedPrefix, ControlMessage, DataMessage,
    DownstreamControl, Flushed, Nack, NotFlushed, Silence, UpstreamControl,
};
pub use deliver::{Capacity, DeliveryOutcome, MessageDeliverer};
pub use error::{DeliveryError, GdError, SendError, StoreError};
pub use internal_input::InternalInputStream;
pub use internal_output::InternalOutputStream;
pub use manager::{
    FlushReply, InputManager, InternalInputManager, InternalOutputManager, OutputManager,
};
pub use registry::StreamSetRegistry;
pub use source::SourceStream;
pub use store::{JsonFileStore, StoredRange, StreamSetData, StreamStore};
pub use stream::{Stream, StreamContext};
pub use stream_set::StreamSet;
pub use target::{ExpressTargetStream, GuaranteedTargetStream, TargetStream};
