#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod gd;
pub mod sim;
pub mod telemetry;
pub mod test_harness;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the everyday types at crate root
pub use crate::core::{
    GdConfig, MessageRef, NeighbourId, Priority, Reliability, StateStream, StreamId, StreamKey,
    Tick, TickKind, TickRange, TickState, ValueRef,
};
pub use crate::gd::{
    InputManager, InternalInputManager, InternalOutputManager, OutputManager, SourceStream,
    TargetStream,
};
