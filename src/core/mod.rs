//! Core domain types for guaranteed delivery
//!
//! Module hierarchy follows type dependency order:
//! - tick: Tick, INFINITY
//! - identity: StreamId, Reliability, Priority, StreamKey
//! - range: TickState, TickRange
//! - range_list: RangeList (the interval engine)
//! - state_stream: StateStream (completed prefix on top of the engine)
//! - gd_config: protocol tunables

pub mod error;
pub mod gd_config;
pub mod identity;
pub mod range;
pub mod range_list;
pub mod state_stream;
pub mod tick;

pub use error::{CoreError, InternalError, InvalidId, RangeError};
pub use gd_config::GdConfig;
pub use identity::{
    MessageRef, NeighbourId, Priority, Reliability, RequestId, StreamId, StreamKey,
};
pub use range::{TickKind, TickRange, TickState, ValueRef};
pub use range_list::{Mark, RangeList};
pub use state_stream::{StateStream, TicksOnStream};
pub use tick::{INFINITY, Tick};
