//! Upstream-facing side of an intermediate node.
//!
//! Receives a remote source's stream, nacks on behalf of the downstream
//! neighbours and sends upstream one aggregated ack prefix (`iack`), the
//! minimum over everything downstream.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::{
    StateStream, StreamId, StreamKey, Tick, TickKind, TickRange, TicksOnStream, tick,
};

use super::alarm::AlarmHandle;
use super::control::{Ack, Nack, UpstreamControl, log_send};
use super::error::GdError;
use super::stream::{InternalResultExt, Stream, StreamContext};

struct InputState {
    stream: StateStream,
    iack: Tick,
    /// Pending coalesced ack. A firing whose handle differs is stale.
    ack_alarm: Option<AlarmHandle>,
    /// Requested ranges waiting to be forgotten.
    forget: HashMap<AlarmHandle, (Tick, Tick)>,
}

pub struct InternalInputStream {
    ctx: StreamContext,
    upstream: Arc<dyn UpstreamControl>,
    this: Weak<Self>,
    state: Mutex<InputState>,
}

impl InternalInputStream {
    pub fn new(ctx: StreamContext, upstream: Arc<dyn UpstreamControl>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            ctx,
            upstream,
            this: this.clone(),
            state: Mutex::new(InputState {
                stream: StateStream::new(),
                iack: 0,
                ack_alarm: None,
                forget: HashMap::new(),
            }),
        })
    }

    fn id(&self) -> StreamId {
        self.ctx.stream_id
    }

    /// Returns whether the value is new and should go downstream.
    pub fn write_value(&self, range: TickRange) -> Result<bool, GdError> {
        let fresh = self
            .state
            .lock()
            .stream
            .write_combined_range(range)
            .in_stream(self.id())?;
        if !fresh {
            tracing::debug!(stream_id = %self.id(), %range, "duplicate value at intermediate");
        }
        Ok(fresh)
    }

    /// Returns whether any tick changed.
    pub fn write_silence(&self, start: Tick, end: Tick) -> Result<bool, GdError> {
        self.state
            .lock()
            .stream
            .write_completed_range(start, end)
            .in_stream(self.id())
    }

    /// Downstream is missing `[start, end]`: nack upstream whatever nobody
    /// has asked for yet, then hold the range Requested for a while.
    pub fn process_nack(&self, start: Tick, end: Tick) -> Result<(), GdError> {
        let nacks = {
            let mut st = self.state.lock();
            let start = start.max(tick::next(st.stream.completed_prefix()));
            if start > end {
                return Ok(());
            }
            let nacks = st
                .stream
                .segments(start, end, |k| k == TickKind::Unknown);
            st.stream
                .write_range(TickRange::requested(start, end))
                .in_stream(self.id())?;
            let this = self.this.clone();
            let handle = self.ctx.alarms.schedule(
                self.ctx.config.request_forget(),
                Box::new(move |handle| {
                    if let Some(stream) = this.upgrade() {
                        stream.forget_fired(handle);
                    }
                }),
            );
            st.forget.insert(handle, (start, end));
            nacks
        };
        for (start, end) in nacks {
            self.send_nack(start, end);
        }
        Ok(())
    }

    /// Re-send the aggregated ack and nack everything the source thinks we
    /// should have above it.
    pub fn process_ack_expected(&self, stamp: Tick) -> Result<(), GdError> {
        let iack = self.state.lock().iack;
        self.send_ack(iack);
        if stamp > iack {
            self.send_nack(tick::next(iack), stamp);
        }
        Ok(())
    }

    /// Raise the aggregated ack. Acks arriving within one coalescing window
    /// leave as one.
    pub fn write_ack_prefix(&self, stamp: Tick) -> Result<(), GdError> {
        let send_now = {
            let mut st = self.state.lock();
            if stamp <= st.iack {
                return Ok(());
            }
            st.iack = stamp;
            st.stream.set_completed_prefix(stamp).in_stream(self.id())?;
            if self.ctx.config.ack_coalesce_ms == 0 {
                Some(stamp)
            } else {
                if st.ack_alarm.is_none() {
                    let this = self.this.clone();
                    let handle = self.ctx.alarms.schedule(
                        self.ctx.config.ack_coalesce(),
                        Box::new(move |handle| {
                            if let Some(stream) = this.upgrade() {
                                stream.ack_alarm_fired(handle);
                            }
                        }),
                    );
                    st.ack_alarm = Some(handle);
                }
                None
            }
        };
        if let Some(prefix) = send_now {
            self.send_ack(prefix);
        }
        Ok(())
    }

    pub fn ack_prefix(&self) -> Tick {
        self.state.lock().iack
    }

    fn ack_alarm_fired(&self, handle: AlarmHandle) {
        let iack = {
            let mut st = self.state.lock();
            if st.ack_alarm != Some(handle) {
                tracing::debug!(stream_id = %self.id(), alarm = handle.get(), "stale ack alarm");
                return;
            }
            st.ack_alarm = None;
            st.iack
        };
        self.send_ack(iack);
    }

    fn forget_fired(&self, handle: AlarmHandle) {
        let mut st = self.state.lock();
        let Some((start, end)) = st.forget.remove(&handle) else {
            tracing::debug!(stream_id = %self.id(), alarm = handle.get(), "stale forget timer");
            return;
        };
        if let Err(err) = st
            .stream
            .write_range(TickRange::unknown(start, end))
            .in_stream(self.id())
        {
            tracing::warn!(stream_id = %self.id(), start, end, "failed to forget requested ticks: {err}");
        }
    }

    fn send_ack(&self, ack_prefix: Tick) {
        let (stream_id, key) = (self.id(), self.ctx.key);
        log_send(
            "ack",
            stream_id,
            self.upstream.send_ack(Ack {
                stream_id,
                key,
                ack_prefix,
            }),
        );
    }

    fn send_nack(&self, start: Tick, end: Tick) {
        let (stream_id, key) = (self.id(), self.ctx.key);
        log_send(
            "nack",
            stream_id,
            self.upstream.send_nack(Nack {
                stream_id,
                key,
                start,
                end,
            }),
        );
    }
}

impl Stream for InternalInputStream {
    fn stream_id(&self) -> StreamId {
        self.ctx.stream_id
    }

    fn key(&self) -> StreamKey {
        self.ctx.key
    }

    fn completed_prefix(&self) -> Tick {
        self.state.lock().stream.completed_prefix()
    }

    fn state_stream(&self) -> Option<StateStream> {
        Some(self.state.lock().stream.clone())
    }

    fn write_silence_forced(&self, tick: Tick) -> Result<(), GdError> {
        self.state
            .lock()
            .stream
            .write_completed_range_forced(tick, tick)
            .in_stream(self.id())
            .map(|_| ())
    }

    fn ticks_on_stream(&self) -> TicksOnStream {
        self.state.lock().stream.ticks_on_stream()
    }

    fn flush(&self) {
        let mut st = self.state.lock();
        if let Some(handle) = st.ack_alarm.take() {
            self.ctx.alarms.cancel(handle);
        }
        for (handle, _) in st.forget.drain() {
            self.ctx.alarms.cancel(handle);
        }
    }

    fn reconstitute(&self, prefix: Tick) -> Result<(), GdError> {
        let mut st = self.state.lock();
        st.stream.set_completed_prefix(prefix).in_stream(self.id())?;
        st.iack = st.iack.max(prefix);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::{GdConfig, MessageRef, Priority, Reliability};
    use crate::test_harness::{ManualAlarms, RecordingTransport, stream_context};

    fn input(config: GdConfig) -> (Arc<ManualAlarms>, Arc<RecordingTransport>, Arc<InternalInputStream>) {
        let alarms = ManualAlarms::new();
        let transport = RecordingTransport::new();
        let key = StreamKey::new(Priority::DEFAULT, Reliability::AssuredPersistent);
        let ctx = stream_context(StreamId::random(), key, config, &alarms);
        let stream = InternalInputStream::new(ctx, transport.clone());
        (alarms, transport, stream)
    }

    #[test]
    fn acks_in_one_window_coalesce_to_the_last() {
        let (alarms, transport, s) = input(GdConfig::default());
        for prefix in [3, 5, 9, 12] {
            s.write_ack_prefix(prefix).unwrap();
        }
        assert!(transport.acks().is_empty());
        alarms.advance_ms(30);
        assert_eq!(transport.acks(), vec![12]);
        alarms.advance_ms(1_000);
        assert_eq!(transport.acks(), vec![12]);
    }

    #[test]
    fn zero_coalescing_acks_immediately() {
        let (_alarms, transport, s) = input(GdConfig {
            ack_coalesce_ms: 0,
            ..GdConfig::default()
        });
        s.write_ack_prefix(2).unwrap();
        s.write_ack_prefix(4).unwrap();
        s.write_ack_prefix(4).unwrap();
        assert_eq!(transport.acks(), vec![2, 4]);
    }

    #[test]
    fn nack_request_forget_cycle() {
        let (alarms, transport, s) = input(GdConfig::default());
        s.process_nack(5, 10).unwrap();
        assert_eq!(transport.nacks(), vec![(5, 10)]);
        let ss = s.state_stream().unwrap();
        assert!(!ss.contains_state(5, 10, TickKind::Unknown));

        // still Requested: nobody is asked twice
        s.process_nack(5, 10).unwrap();
        assert_eq!(transport.nacks().len(), 1);

        alarms.advance_ms(2_000);
        let ss = s.state_stream().unwrap();
        assert!(!ss.contains_state(5, 10, TickKind::Requested));
        s.process_nack(5, 10).unwrap();
        assert_eq!(transport.nacks(), vec![(5, 10), (5, 10)]);
    }

    #[test]
    fn nack_only_asks_for_unknown_segments() {
        let (_alarms, transport, s) = input(GdConfig::default());
        assert!(s.write_value(TickRange::value(7, MessageRef::new(1))).unwrap());
        assert!(!s.write_value(TickRange::value(7, MessageRef::new(1))).unwrap());
        s.process_nack(5, 10).unwrap();
        assert_eq!(transport.nacks(), vec![(5, 6), (8, 10)]);
    }

    #[test]
    fn ack_expected_acks_then_nacks_the_rest() {
        let (_alarms, transport, s) = input(GdConfig {
            ack_coalesce_ms: 0,
            ..GdConfig::default()
        });
        s.write_ack_prefix(4).unwrap();
        transport.clear();
        s.process_ack_expected(9).unwrap();
        assert_eq!(transport.acks(), vec![4]);
        assert_eq!(transport.nacks(), vec![(5, 9)]);
        s.process_ack_expected(4).unwrap();
        assert_eq!(transport.nacks().len(), 1);
    }
}
