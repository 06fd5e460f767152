//! Route control traffic to the owning stream, creating sets and streams on
//! first reference.

mod input;
mod internal_input;
mod internal_output;
mod output;

pub use input::InputManager;
pub use internal_input::InternalInputManager;
pub use internal_output::InternalOutputManager;
pub use output::OutputManager;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::core::{RequestId, StreamId};

use super::control::NotFlushed;

/// Answer to an `AreYouFlushed` query, as also sent to the asker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlushReply {
    Flushed,
    NotFlushed(NotFlushed),
}

/// Outstanding `AreYouFlushed` queries, at most one per stream per interval.
#[derive(Debug, Default)]
pub(crate) struct FlushQueries {
    next_request: AtomicU64,
    pending: Mutex<HashMap<StreamId, (RequestId, u64)>>,
}

impl FlushQueries {
    /// A fresh request id if a query for `stream_id` may go out now.
    pub(crate) fn begin(&self, stream_id: StreamId, now_ms: u64, interval_ms: u64) -> Option<RequestId> {
        let mut pending = self.pending.lock();
        if let Some(&(_, sent_ms)) = pending.get(&stream_id)
            && now_ms.saturating_sub(sent_ms) < interval_ms
        {
            return None;
        }
        let request = RequestId::new(self.next_request.fetch_add(1, Ordering::Relaxed) + 1);
        pending.insert(stream_id, (request, now_ms));
        Some(request)
    }

    /// Whether `request` is the query we are waiting on; clears it if so.
    pub(crate) fn answer(&self, stream_id: StreamId, request: RequestId) -> bool {
        let mut pending = self.pending.lock();
        match pending.get(&stream_id) {
            Some(&(expected, _)) if expected == request => {
                pending.remove(&stream_id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn clear(&self, stream_id: StreamId) {
        self.pending.lock().remove(&stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_are_rate_limited_and_matched() {
        let queries = FlushQueries::default();
        let id = StreamId::random();
        let first = queries.begin(id, 1_000, 500).unwrap();
        assert!(queries.begin(id, 1_200, 500).is_none());
        let second = queries.begin(id, 1_600, 500).unwrap();
        assert_ne!(first, second);
        assert!(!queries.answer(id, first));
        assert!(queries.answer(id, second));
        assert!(!queries.answer(id, second));
    }
}
