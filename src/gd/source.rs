//! Sending end of a stream.
//!
//! Values are sent while they fall inside the send window; the rest wait for
//! acks to free room. An AckExpected timer keeps asking the target for an
//! ack while anything sent is unacknowledged, backing off while the target
//! stays silent.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::{
    INFINITY, InternalError, StateStream, StreamId, StreamKey, Tick, TickKind, TickRange,
    TickState, TicksOnStream, tick,
};

use super::alarm::AlarmHandle;
use super::control::{AckExpected, DataMessage, DownstreamControl, Silence, log_send};
use super::error::GdError;
use super::stream::{InternalResultExt, Stream, StreamContext};

enum Outbound {
    Data(TickRange),
    Silence(Tick, Tick),
    AckExpected(Tick),
}

struct SourceState {
    stream: StateStream,
    /// Highest value tick sent downstream.
    last_msg_sent: Tick,
    ack_expected: Option<AlarmHandle>,
    ack_expected_interval_ms: u64,
    /// Control traffic arrived since the AckExpected timer last fired.
    inbound_flow: bool,
    /// Values at or above this tick are held back.
    first_outside_window: Tick,
    total_sent: u64,
    last_sent_ms: Option<u64>,
}

impl SourceState {
    fn prefix(&self) -> Tick {
        self.stream.completed_prefix()
    }

    /// Recompute the window edge; returns the previous one.
    fn recompute_window(&mut self, send_window: u64) -> Tick {
        let previous = self.first_outside_window;
        let window = usize::try_from(send_window.max(1)).unwrap_or(usize::MAX);
        self.first_outside_window = self
            .stream
            .message_ranges()
            .get(window)
            .and_then(TickRange::value_tick)
            .unwrap_or(INFINITY);
        previous
    }

    /// Committed values that moved inside the window since `previous`.
    fn released(&self, previous: Tick) -> Vec<TickRange> {
        if self.first_outside_window <= previous {
            return Vec::new();
        }
        self.stream
            .message_ranges()
            .into_iter()
            .filter(|r| {
                r.kind() == TickKind::Value
                    && r.value_tick()
                        .is_some_and(|t| t >= previous && t < self.first_outside_window)
            })
            .collect()
    }

    fn note_sent(&mut self, range: &TickRange, now_ms: u64) {
        if let Some(t) = range.value_tick() {
            self.last_msg_sent = self.last_msg_sent.max(t);
        }
        self.total_sent += 1;
        self.last_sent_ms = Some(now_ms);
    }
}

pub struct SourceStream {
    ctx: StreamContext,
    downstream: Arc<dyn DownstreamControl>,
    this: Weak<Self>,
    state: Mutex<SourceState>,
}

impl SourceStream {
    pub fn new(ctx: StreamContext, downstream: Arc<dyn DownstreamControl>) -> Arc<Self> {
        let interval = ctx.config.ack_expected_ms;
        Arc::new_cyclic(|this| Self {
            ctx,
            downstream,
            this: this.clone(),
            state: Mutex::new(SourceState {
                stream: StateStream::new(),
                last_msg_sent: 0,
                ack_expected: None,
                ack_expected_interval_ms: interval,
                inbound_flow: false,
                first_outside_window: INFINITY,
                total_sent: 0,
                last_sent_ms: None,
            }),
        })
    }

    fn id(&self) -> StreamId {
        self.ctx.stream_id
    }

    /// Reserve a tick for a message whose transaction is still open.
    pub fn write_uncommitted(&self, range: TickRange) -> Result<bool, GdError> {
        if range.kind() != TickKind::Uncommitted {
            return Err(self.wrong_kind("write_uncommitted", range));
        }
        let mut st = self.state.lock();
        let written = st.stream.write_combined_range(range).in_stream(self.id())?;
        st.recompute_window(self.ctx.config.send_window);
        Ok(written)
    }

    /// A committed message. Sent at once if it fits the window. Returns
    /// whether it was sent.
    pub fn write_value(&self, range: TickRange) -> Result<bool, GdError> {
        let Some(value_tick) = range.value_tick().filter(|_| range.kind() == TickKind::Value)
        else {
            return Err(self.wrong_kind("write_value", range));
        };
        let mut out = Vec::new();
        {
            let mut st = self.state.lock();
            if !st.stream.write_combined_range(range).in_stream(self.id())? {
                tracing::debug!(stream_id = %self.id(), tick = value_tick, "value already on stream");
                return Ok(false);
            }
            st.recompute_window(self.ctx.config.send_window);
            if value_tick < st.first_outside_window {
                let stored = st.stream.range_at(value_tick);
                st.note_sent(&stored, self.ctx.alarms.now_ms());
                out.push(Outbound::Data(stored));
                self.arm_ack_expected(&mut st);
            } else {
                tracing::debug!(
                    stream_id = %self.id(),
                    tick = value_tick,
                    window_edge = st.first_outside_window,
                    "value held outside send window"
                );
            }
        }
        let sent = !out.is_empty();
        self.send(out);
        Ok(sent)
    }

    /// The open transaction behind `[start, end]` rolled back: every tick
    /// there without a committed value becomes silence.
    pub fn write_silence(&self, start: Tick, end: Tick) -> Result<(), GdError> {
        let mut out = Vec::new();
        {
            let mut st = self.state.lock();
            let open = st.stream.segments(start, end, |k| k != TickKind::Value);
            for (s, e) in open {
                st.stream
                    .write_completed_range_forced(s, e)
                    .in_stream(self.id())?;
                out.push(Outbound::Silence(s, e));
            }
            self.release_window(&mut st, &mut out);
        }
        self.send(out);
        Ok(())
    }

    /// Target acked through `stamp`. Returns the value ranges now Completed,
    /// whose messages can be discarded.
    pub fn write_ack_prefix(&self, stamp: Tick) -> Result<Vec<TickRange>, GdError> {
        let mut out = Vec::new();
        let removed = {
            let mut st = self.state.lock();
            st.inbound_flow = true;
            let prefix = st.prefix();
            if stamp <= prefix {
                return Ok(Vec::new());
            }
            let acked = st.stream.ranges_in(tick::next(prefix), stamp);
            let mut removed = Vec::new();
            for r in acked {
                match r.kind() {
                    TickKind::Value if r.value_tick().is_some_and(|t| t <= stamp) => {
                        removed.push(r)
                    }
                    TickKind::Value | TickKind::Completed => {}
                    kind => tracing::warn!(
                        stream_id = %self.id(),
                        start = r.start,
                        end = r.end,
                        ?kind,
                        "ack covers ticks never sent"
                    ),
                }
            }
            st.stream.set_completed_prefix(stamp).in_stream(self.id())?;
            self.release_window(&mut st, &mut out);
            if st.last_msg_sent <= st.prefix()
                && let Some(handle) = st.ack_expected.take()
            {
                self.ctx.alarms.cancel(handle);
            }
            removed
        };
        self.send(out);
        Ok(removed)
    }

    /// Resend what the target is missing in `[start, end]`.
    pub fn process_nack(&self, start: Tick, end: Tick) -> Result<(), GdError> {
        let mut out = Vec::new();
        {
            let mut st = self.state.lock();
            st.inbound_flow = true;
            let prefix = st.prefix();
            let mut start = start;
            if start <= prefix {
                out.push(Outbound::Silence(start, prefix.min(end)));
                start = tick::next(prefix);
            }
            let ranges = if start <= end {
                st.stream.ranges_in(start, end)
            } else {
                Vec::new()
            };
            let now = self.ctx.alarms.now_ms();
            let mut i = 0;
            while i < ranges.len() {
                let r = ranges[i];
                match r.state {
                    TickState::Completed => {
                        push_silence(&mut out, r.start.max(start), r.end.min(end));
                    }
                    TickState::Value(v) if v.value_tick < st.first_outside_window => {
                        let mut resend_end = r.end;
                        while let Some(next) = ranges.get(i + 1)
                            && next.kind() == TickKind::Completed
                        {
                            resend_end = resend_end.max(next.end.min(end));
                            i += 1;
                        }
                        let resend =
                            TickRange::combined_value(r.start, v.value_tick, resend_end, v.item);
                        st.note_sent(&resend, now);
                        out.push(Outbound::Data(resend));
                    }
                    _ => break,
                }
                i += 1;
            }
        }
        self.send(out);
        Ok(())
    }

    /// Rebuild a committed value from the store after a restart. Not sent;
    /// the AckExpected timer will prompt the target.
    pub fn restore_value(&self, range: TickRange) -> Result<(), GdError> {
        if range.kind() != TickKind::Value {
            return Err(self.wrong_kind("restore_value", range));
        }
        let mut st = self.state.lock();
        st.stream.write_combined_range(range).in_stream(self.id())?;
        if let Some(t) = range.value_tick() {
            st.last_msg_sent = st.last_msg_sent.max(t);
        }
        st.recompute_window(self.ctx.config.send_window);
        self.arm_ack_expected(&mut st);
        Ok(())
    }

    pub fn restore_uncommitted(&self, range: TickRange) -> Result<(), GdError> {
        if range.kind() != TickKind::Uncommitted {
            return Err(self.wrong_kind("restore_uncommitted", range));
        }
        let mut st = self.state.lock();
        st.stream.write_combined_range(range).in_stream(self.id())?;
        st.recompute_window(self.ctx.config.send_window);
        Ok(())
    }

    /// Nothing in doubt: every message is acked or gone.
    pub fn is_flushable(&self) -> bool {
        self.state.lock().stream.message_ranges().is_empty()
    }

    pub fn last_msg_sent(&self) -> Tick {
        self.state.lock().last_msg_sent
    }

    pub fn first_outside_window(&self) -> Tick {
        self.state.lock().first_outside_window
    }

    pub fn total_sent(&self) -> u64 {
        self.state.lock().total_sent
    }

    pub fn last_sent_ms(&self) -> Option<u64> {
        self.state.lock().last_sent_ms
    }

    pub fn ack_expected_interval(&self) -> Duration {
        Duration::from_millis(self.state.lock().ack_expected_interval_ms)
    }

    fn release_window(&self, st: &mut SourceState, out: &mut Vec<Outbound>) {
        let previous = st.recompute_window(self.ctx.config.send_window);
        let released = st.released(previous);
        if released.is_empty() {
            return;
        }
        let now = self.ctx.alarms.now_ms();
        for range in released {
            st.note_sent(&range, now);
            out.push(Outbound::Data(range));
        }
        self.arm_ack_expected(st);
    }

    fn arm_ack_expected(&self, st: &mut SourceState) {
        if st.ack_expected.is_some() {
            return;
        }
        let this = self.this.clone();
        let handle = self.ctx.alarms.schedule(
            Duration::from_millis(st.ack_expected_interval_ms),
            Box::new(move |handle| {
                if let Some(stream) = this.upgrade() {
                    stream.ack_expected_fired(handle);
                }
            }),
        );
        st.ack_expected = Some(handle);
    }

    fn ack_expected_fired(&self, handle: AlarmHandle) {
        let mut out = Vec::new();
        {
            let mut st = self.state.lock();
            if st.ack_expected != Some(handle) {
                tracing::debug!(stream_id = %self.id(), alarm = handle.get(), "stale ack expected timer");
                return;
            }
            st.ack_expected = None;
            if st.last_msg_sent <= st.prefix() {
                return;
            }
            out.push(Outbound::AckExpected(st.last_msg_sent));
            let config = &self.ctx.config;
            st.ack_expected_interval_ms = if st.inbound_flow {
                config.ack_expected_ms
            } else {
                st.ack_expected_interval_ms
                    .saturating_mul(2)
                    .clamp(1, config.max_ack_expected_ms.max(1))
            };
            st.inbound_flow = false;
            self.arm_ack_expected(&mut st);
        }
        self.send(out);
    }

    fn wrong_kind(&self, op: &str, range: TickRange) -> GdError {
        GdError::internal(
            self.id(),
            InternalError::InvalidReplacement {
                reason: format!("{op} cannot take {range}"),
            },
        )
    }

    fn send(&self, out: Vec<Outbound>) {
        let (stream_id, key) = (self.id(), self.ctx.key);
        for msg in out {
            match msg {
                Outbound::Data(range) => log_send(
                    "data",
                    stream_id,
                    self.downstream.send_data(DataMessage {
                        stream_id,
                        key,
                        range,
                    }),
                ),
                Outbound::Silence(start, end) => log_send(
                    "silence",
                    stream_id,
                    self.downstream.send_silence(Silence {
                        stream_id,
                        key,
                        start,
                        end,
                    }),
                ),
                Outbound::AckExpected(tick) => log_send(
                    "ack_expected",
                    stream_id,
                    self.downstream.send_ack_expected(AckExpected {
                        stream_id,
                        key,
                        tick,
                    }),
                ),
            }
        }
    }
}

/// Append silence, merging with a directly preceding silence.
fn push_silence(out: &mut Vec<Outbound>, start: Tick, end: Tick) {
    if let Some(Outbound::Silence(_, last_end)) = out.last_mut()
        && *last_end != INFINITY
        && *last_end + 1 == start
    {
        *last_end = end;
        return;
    }
    out.push(Outbound::Silence(start, end));
}

impl Stream for SourceStream {
    fn stream_id(&self) -> StreamId {
        self.ctx.stream_id
    }

    fn key(&self) -> StreamKey {
        self.ctx.key
    }

    fn completed_prefix(&self) -> Tick {
        self.state.lock().prefix()
    }

    fn state_stream(&self) -> Option<StateStream> {
        Some(self.state.lock().stream.clone())
    }

    fn write_silence_forced(&self, tick: Tick) -> Result<(), GdError> {
        let mut out = Vec::new();
        {
            let mut st = self.state.lock();
            st.stream
                .write_completed_range_forced(tick, tick)
                .in_stream(self.id())?;
            out.push(Outbound::Silence(tick, tick));
            self.release_window(&mut st, &mut out);
        }
        self.send(out);
        Ok(())
    }

    fn ticks_on_stream(&self) -> TicksOnStream {
        self.state.lock().stream.ticks_on_stream()
    }

    fn flush(&self) {
        if let Some(handle) = self.state.lock().ack_expected.take() {
            self.ctx.alarms.cancel(handle);
        }
    }

    fn reconstitute(&self, prefix: Tick) -> Result<(), GdError> {
        let mut st = self.state.lock();
        st.stream.set_completed_prefix(prefix).in_stream(self.id())?;
        st.last_msg_sent = st.last_msg_sent.max(st.prefix());
        st.recompute_window(self.ctx.config.send_window);
        Ok(())
    }

    fn persisted_ranges(&self) -> Vec<TickRange> {
        self.state.lock().stream.message_ranges()
    }
}
