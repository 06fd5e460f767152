//! Local delivery seam for target streams.

use crate::core::{StreamId, StreamKey, ValueRef};

use super::error::DeliveryError;

/// Whether the destination behind a stream can take another message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capacity {
    Accepting,
    /// Over its limit; try again later.
    Full,
    /// Cannot accept in its current configuration.
    Unavailable,
}

/// How a successful delivery was made durable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Durable now; the ticks may be acked.
    Committed,
    /// Part of an open batch; the stream waits for `batch_committed` or
    /// `batch_rolled_back`.
    InBatch,
}

pub trait MessageDeliverer: Send + Sync {
    fn check_capacity(&self, stream_id: StreamId, key: StreamKey) -> Capacity;

    /// Hand over `values`, in tick order.
    fn deliver(
        &self,
        stream_id: StreamId,
        key: StreamKey,
        values: &[ValueRef],
    ) -> Result<DeliveryOutcome, DeliveryError>;
}
