//! Receiving end of a stream.
//!
//! The guaranteed variant tracks every tick, nacks gaps and acks the
//! completed prefix once delivered messages are durable. The express variant
//! tracks nothing but a high-water mark and drops what the destination
//! cannot take.
//!
//! Lock order is delivery then state. The delivery lock keeps hand-overs to
//! the deliverer in tick order; control messages go out after both are
//! released.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::{
    GdConfig, INFINITY, InternalError, StateStream, StreamId, StreamKey, Tick, TickKind,
    TickRange, TickState, TicksOnStream, ValueRef, tick,
};

use super::alarm::AlarmHandle;
use super::control::{Ack, Nack, UpstreamControl, log_send};
use super::deliver::{Capacity, DeliveryOutcome, MessageDeliverer};
use super::error::{DeliveryError, GdError};
use super::stream::{InternalResultExt, Stream, StreamContext};

enum Outbound {
    Ack(Tick),
    Nack(Tick, Tick),
}

/// Re-nack schedule for one gap.
#[derive(Clone, Copy, Debug)]
struct GapTimer {
    start: Tick,
    end: Tick,
    /// Firings between two nacks; doubles after each nack.
    repeat: u64,
    iteration: u64,
}

/// The destination refused the message at `tick`.
#[derive(Clone, Copy, Debug)]
struct Blocked {
    tick: Tick,
    rounds: u32,
}

/// Duplicate-value sampling for the repeated-value warning.
#[derive(Debug, Default)]
struct ReceiveStats {
    sampled: u64,
    repeated: u64,
    last_warning_ms: Option<u64>,
}

impl ReceiveStats {
    /// Returns the duplicate percentage when a finished sample should be
    /// reported.
    fn record(&mut self, repeated: bool, now_ms: u64, config: &GdConfig) -> Option<u64> {
        self.sampled += 1;
        if repeated {
            self.repeated += 1;
        }
        if self.sampled < config.repeated_value_interval.max(1) {
            return None;
        }
        let percentage = self.repeated * 100 / self.sampled;
        self.sampled = 0;
        self.repeated = 0;
        if percentage <= config.repeated_value_percentage {
            return None;
        }
        if let Some(last) = self.last_warning_ms
            && now_ms.saturating_sub(last) < config.repeated_value_warning_ms
        {
            return None;
        }
        self.last_warning_ms = Some(now_ms);
        Some(percentage)
    }
}

struct TargetState {
    stream: StateStream,
    /// First tick not yet handed to the deliverer.
    doubt_horizon: Tick,
    /// Highest tick any message has mentioned.
    unknown_horizon: Tick,
    /// Delivered in an open batch, waiting for its commit.
    next_completed_prefix: Option<Tick>,
    last_acked: Tick,
    gaps: HashMap<AlarmHandle, GapTimer>,
    blocked: Option<Blocked>,
    stats: ReceiveStats,
    received: u64,
    last_received_ms: Option<u64>,
}

impl TargetState {
    fn new() -> Self {
        Self {
            stream: StateStream::new(),
            doubt_horizon: 1,
            unknown_horizon: 0,
            next_completed_prefix: None,
            last_acked: 0,
            gaps: HashMap::new(),
            blocked: None,
            stats: ReceiveStats::default(),
            received: 0,
            last_received_ms: None,
        }
    }

    fn prefix(&self) -> Tick {
        self.stream.completed_prefix()
    }

    /// Values from the doubt horizon up to the first unresolved tick, and the
    /// last tick they settle.
    fn collect_deliverable(&mut self) -> (Vec<ValueRef>, Tick) {
        self.doubt_horizon = self.doubt_horizon.max(tick::next(self.prefix()));
        let mut values = Vec::new();
        loop {
            let range = self.stream.range_at(self.doubt_horizon);
            match range.state {
                TickState::Value(v) if v.value_tick >= self.doubt_horizon => values.push(v),
                TickState::Value(_) | TickState::Completed => {}
                _ => break,
            }
            if range.end == INFINITY {
                break;
            }
            self.doubt_horizon = range.end + 1;
        }
        (values, tick::prev(self.doubt_horizon))
    }

    fn commit_through(&mut self, through: Tick, out: &mut Vec<Outbound>) -> Result<(), InternalError> {
        self.stream.set_completed_prefix(through)?;
        if let Some(next) = self.next_completed_prefix
            && next <= self.prefix()
        {
            self.next_completed_prefix = None;
        }
        self.ack_if_advanced(out);
        Ok(())
    }

    fn ack_if_advanced(&mut self, out: &mut Vec<Outbound>) {
        let prefix = self.prefix();
        if prefix > self.last_acked {
            self.last_acked = prefix;
            out.push(Outbound::Ack(prefix));
        }
    }
}

/// Gap-tracking receiver for reliable and assured tiers.
pub struct GuaranteedTargetStream {
    ctx: StreamContext,
    upstream: Arc<dyn UpstreamControl>,
    deliverer: Arc<dyn MessageDeliverer>,
    this: Weak<Self>,
    delivery: Mutex<()>,
    state: Mutex<TargetState>,
}

impl GuaranteedTargetStream {
    pub fn new(
        ctx: StreamContext,
        upstream: Arc<dyn UpstreamControl>,
        deliverer: Arc<dyn MessageDeliverer>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            ctx,
            upstream,
            deliverer,
            this: this.clone(),
            delivery: Mutex::new(()),
            state: Mutex::new(TargetState::new()),
        })
    }

    fn id(&self) -> StreamId {
        self.ctx.stream_id
    }

    /// Accept a value, possibly combined with silence around it.
    pub fn write_value(&self, range: TickRange) -> Result<(), GdError> {
        let value = match range.state {
            TickState::Value(v) => v,
            _ => {
                return Err(GdError::internal(
                    self.id(),
                    InternalError::InvalidReplacement {
                        reason: format!("target streams only take values, got {range}"),
                    },
                ));
            }
        };
        let value_tick = value.value_tick;
        let now = self.ctx.alarms.now_ms();
        let mut out = Vec::new();
        {
            let _delivery = self.delivery.lock();
            let capacity = self.deliverer.check_capacity(self.id(), self.ctx.key);
            let admitted = {
                let mut st = self.state.lock();
                st.received += 1;
                st.last_received_ms = Some(now);
                let prefix = st.prefix();
                let duplicate = value_tick <= prefix
                    || matches!(
                        st.stream.range_at(value_tick).kind(),
                        TickKind::Value | TickKind::Completed
                    );
                if let Some(percentage) = st.stats.record(duplicate, now, &self.ctx.config) {
                    tracing::warn!(
                        stream_id = %self.id(),
                        key = %self.ctx.key,
                        percentage,
                        "high rate of repeated values, acks may be getting lost"
                    );
                }

                if duplicate {
                    tracing::debug!(stream_id = %self.id(), tick = value_tick, "duplicate value ignored");
                    if value_tick <= prefix {
                        // The source missed our ack.
                        st.last_acked = st.last_acked.max(prefix);
                        out.push(Outbound::Ack(prefix));
                    }
                    false
                } else if capacity != Capacity::Accepting {
                    if !st.blocked.is_some_and(|b| b.tick <= value_tick) {
                        tracing::debug!(
                            stream_id = %self.id(),
                            tick = value_tick,
                            ?capacity,
                            "destination cannot accept, stream blocked"
                        );
                        st.blocked = Some(Blocked {
                            tick: value_tick,
                            rounds: 0,
                        });
                    }
                    false
                } else if let Some(b) = st.blocked
                    && value_tick > b.tick
                {
                    tracing::debug!(
                        stream_id = %self.id(),
                        tick = value_tick,
                        blocked_at = b.tick,
                        "value above blocked tick discarded"
                    );
                    false
                } else {
                    st.blocked = None;
                    st.stream.write_combined_range(range).in_stream(self.id())?;
                    let gap_start = tick::next(st.unknown_horizon);
                    if range.start > gap_start {
                        self.open_gap(&mut st, gap_start, range.start - 1)?;
                    }
                    st.unknown_horizon = st.unknown_horizon.max(range.end);
                    true
                }
            };
            if admitted {
                self.deliver_ready(&mut out)?;
            }
        }
        self.send(out);
        Ok(())
    }

    /// `[start, end]` holds no messages.
    pub fn write_silence(&self, start: Tick, end: Tick) -> Result<(), GdError> {
        let mut out = Vec::new();
        {
            let _delivery = self.delivery.lock();
            {
                let mut st = self.state.lock();
                st.stream
                    .write_completed_range(start, end)
                    .in_stream(self.id())?;
                if end != INFINITY {
                    st.unknown_horizon = st.unknown_horizon.max(end);
                }
                if let Some(b) = st.blocked
                    && start <= b.tick
                    && b.tick <= end
                {
                    st.blocked = None;
                }
            }
            self.deliver_ready(&mut out)?;
            let mut st = self.state.lock();
            let prefix = st.prefix();
            if end.saturating_sub(st.last_acked) >= self.ctx.config.ack_gap_for_silence_ticks
                && prefix > st.last_acked
            {
                st.last_acked = prefix;
                out.push(Outbound::Ack(prefix));
            }
        }
        self.send(out);
        Ok(())
    }

    /// The source wants an ack up to `stamp`: ack what we have and nack the
    /// rest.
    pub fn process_ack_expected(&self, stamp: Tick) -> Result<(), GdError> {
        let blocked = self.state.lock().blocked.is_some();
        let capacity = blocked.then(|| self.deliverer.check_capacity(self.id(), self.ctx.key));
        let mut out = Vec::new();
        {
            let mut st = self.state.lock();
            let prefix = st.prefix();
            st.last_acked = st.last_acked.max(prefix);
            out.push(Outbound::Ack(prefix));

            let mut nack_limit = stamp;
            if let Some(mut b) = st.blocked.take() {
                if capacity == Some(Capacity::Accepting) {
                    tracing::debug!(stream_id = %self.id(), tick = b.tick, "destination accepting again");
                } else {
                    b.rounds += 1;
                    nack_limit = nack_limit.min(tick::prev(b.tick));
                    if b.rounds >= self.ctx.config.blocked_renack_rounds {
                        b.rounds = 0;
                        st.stream
                            .write_range(TickRange::requested(b.tick, b.tick))
                            .in_stream(self.id())?;
                        out.push(Outbound::Nack(b.tick, b.tick));
                    }
                    st.blocked = Some(b);
                }
            }

            if nack_limit > prefix {
                let missing = st.stream.segments(tick::next(prefix), nack_limit, |k| {
                    matches!(k, TickKind::Unknown | TickKind::Requested)
                });
                for (start, end) in missing {
                    st.stream
                        .write_range(TickRange::requested(start, end))
                        .in_stream(self.id())?;
                    out.push(Outbound::Nack(start, end));
                }
            }
            if stamp != INFINITY {
                st.unknown_horizon = st.unknown_horizon.max(stamp);
            }
        }
        self.send(out);
        Ok(())
    }

    /// Record that delivered ticks up to `tick` complete when the open batch
    /// commits.
    pub fn set_next_completed_prefix(&self, tick: Tick) {
        let mut st = self.state.lock();
        st.next_completed_prefix = Some(st.next_completed_prefix.map_or(tick, |t| t.max(tick)));
    }

    pub fn next_completed_prefix(&self) -> Option<Tick> {
        self.state.lock().next_completed_prefix
    }

    pub fn batch_committed(&self) -> Result<(), GdError> {
        let mut out = Vec::new();
        {
            let _delivery = self.delivery.lock();
            let mut st = self.state.lock();
            if let Some(next) = st.next_completed_prefix.take() {
                st.commit_through(next, &mut out).in_stream(self.id())?;
            }
        }
        self.send(out);
        Ok(())
    }

    /// Everything delivered in the open batch is undone; deliver it again.
    pub fn batch_rolled_back(&self) -> Result<(), GdError> {
        let mut out = Vec::new();
        {
            let _delivery = self.delivery.lock();
            {
                let mut st = self.state.lock();
                st.next_completed_prefix = None;
                st.doubt_horizon = tick::next(st.prefix());
            }
            self.deliver_ready(&mut out)?;
        }
        self.send(out);
        Ok(())
    }

    pub fn doubt_horizon(&self) -> Tick {
        self.state.lock().doubt_horizon
    }

    pub fn is_blocked(&self) -> bool {
        self.state.lock().blocked.is_some()
    }

    /// Values held on the stream, delivered or not, in tick order.
    pub fn messages_on_stream(&self) -> Vec<ValueRef> {
        self.state
            .lock()
            .stream
            .message_ranges()
            .iter()
            .filter_map(|r| match r.state {
                TickState::Value(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    pub fn count_messages_on_stream(&self) -> usize {
        self.messages_on_stream().len()
    }

    pub fn number_of_messages_received(&self) -> u64 {
        self.state.lock().received
    }

    pub fn last_msg_received_ms(&self) -> Option<u64> {
        self.state.lock().last_received_ms
    }

    pub fn last_known_tick(&self) -> Tick {
        self.state.lock().stream.last_known_tick()
    }

    /// Hand values at the doubt horizon to the deliverer. Caller holds the
    /// delivery lock.
    fn deliver_ready(&self, out: &mut Vec<Outbound>) -> Result<(), GdError> {
        let (values, through, from) = {
            let mut st = self.state.lock();
            let from = st.doubt_horizon;
            let (values, through) = st.collect_deliverable();
            (values, through, from)
        };
        if values.is_empty() {
            return Ok(());
        }
        let outcome = self.deliverer.deliver(self.id(), self.ctx.key, &values);
        let mut st = self.state.lock();
        match outcome {
            Ok(DeliveryOutcome::Committed) => {
                st.commit_through(through, out).in_stream(self.id())?;
            }
            Ok(DeliveryOutcome::InBatch) => {
                st.next_completed_prefix =
                    Some(st.next_completed_prefix.map_or(through, |t| t.max(through)));
            }
            Err(DeliveryError::NotPossible { reason, .. }) => {
                tracing::warn!(
                    stream_id = %self.id(),
                    key = %self.ctx.key,
                    through,
                    "destination cannot take messages, discarding: {reason}"
                );
                st.commit_through(through, out).in_stream(self.id())?;
            }
            Err(err) => {
                st.doubt_horizon = from;
                return Err(err.into());
            }
        }
        Ok(())
    }

    fn open_gap(&self, st: &mut TargetState, start: Tick, end: Tick) -> Result<(), GdError> {
        st.stream
            .write_range(TickRange::requested(start, end))
            .in_stream(self.id())?;
        let gap = GapTimer {
            start,
            end,
            repeat: 1,
            iteration: 0,
        };
        self.arm_gap(st, gap, self.ctx.config.gap_curiosity());
        Ok(())
    }

    fn arm_gap(&self, st: &mut TargetState, gap: GapTimer, delay: Duration) {
        let this = self.this.clone();
        let handle = self.ctx.alarms.schedule(
            delay,
            Box::new(move |handle| {
                if let Some(stream) = this.upgrade() {
                    stream.gap_fired(handle);
                }
            }),
        );
        st.gaps.insert(handle, gap);
    }

    fn gap_fired(&self, handle: AlarmHandle) {
        let mut out = Vec::new();
        {
            let mut st = self.state.lock();
            let Some(mut gap) = st.gaps.remove(&handle) else {
                tracing::debug!(stream_id = %self.id(), alarm = handle.get(), "stale gap timer");
                return;
            };
            let requested = st
                .stream
                .segments(gap.start, gap.end, |k| k == TickKind::Requested);
            let Some(&(first, _)) = requested.first() else {
                return;
            };
            gap.start = first;
            gap.iteration += 1;
            if gap.iteration >= gap.repeat {
                out.extend(requested.iter().map(|&(s, e)| Outbound::Nack(s, e)));
                gap.iteration = 0;
                gap.repeat = (gap.repeat * 2).min(self.ctx.config.max_nack_repetitions());
            }
            self.arm_gap(&mut st, gap, self.ctx.config.nack_repetition());
        }
        self.send(out);
    }

    fn send(&self, out: Vec<Outbound>) {
        let (stream_id, key) = (self.id(), self.ctx.key);
        for msg in out {
            match msg {
                Outbound::Ack(ack_prefix) => log_send(
                    "ack",
                    stream_id,
                    self.upstream.send_ack(Ack {
                        stream_id,
                        key,
                        ack_prefix,
                    }),
                ),
                Outbound::Nack(start, end) => log_send(
                    "nack",
                    stream_id,
                    self.upstream.send_nack(Nack {
                        stream_id,
                        key,
                        start,
                        end,
                    }),
                ),
            }
        }
    }
}

impl Stream for GuaranteedTargetStream {
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
            let _delivery = self.delivery.lock();
            {
                let mut st = self.state.lock();
                st.stream
                    .write_completed_range_forced(tick, tick)
                    .in_stream(self.id())?;
                if st.blocked.is_some_and(|b| b.tick == tick) {
                    st.blocked = None;
                }
            }
            self.deliver_ready(&mut out)?;
        }
        self.send(out);
        Ok(())
    }

    fn ticks_on_stream(&self) -> TicksOnStream {
        self.state.lock().stream.ticks_on_stream()
    }

    fn flush(&self) {
        let mut st = self.state.lock();
        for (handle, _) in st.gaps.drain() {
            self.ctx.alarms.cancel(handle);
        }
    }

    fn reconstitute(&self, prefix: Tick) -> Result<(), GdError> {
        let mut st = self.state.lock();
        st.stream
            .set_completed_prefix(prefix)
            .in_stream(self.id())?;
        let prefix = st.prefix();
        st.doubt_horizon = st.doubt_horizon.max(tick::next(prefix));
        st.unknown_horizon = st.unknown_horizon.max(prefix);
        st.last_acked = st.last_acked.max(prefix);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ExpressState {
    high_water: Tick,
    received: u64,
    last_received_ms: Option<u64>,
}

/// Fire-and-forget receiver: no gaps, no acks, no state stream.
pub struct ExpressTargetStream {
    ctx: StreamContext,
    deliverer: Arc<dyn MessageDeliverer>,
    state: Mutex<ExpressState>,
}

impl ExpressTargetStream {
    pub fn new(ctx: StreamContext, deliverer: Arc<dyn MessageDeliverer>) -> Self {
        Self {
            ctx,
            deliverer,
            state: Mutex::new(ExpressState::default()),
        }
    }

    pub fn write_value(&self, range: TickRange) -> Result<(), GdError> {
        let Some(value) = range.value_ref() else {
            return Err(GdError::internal(
                self.ctx.stream_id,
                InternalError::InvalidReplacement {
                    reason: format!("target streams only take values, got {range}"),
                },
            ));
        };
        {
            let mut st = self.state.lock();
            st.received += 1;
            st.last_received_ms = Some(self.ctx.alarms.now_ms());
        }
        if self.deliverer.check_capacity(self.ctx.stream_id, self.ctx.key) != Capacity::Accepting {
            tracing::debug!(stream_id = %self.ctx.stream_id, tick = value.value_tick, "express value dropped, destination full");
            return Ok(());
        }
        match self
            .deliverer
            .deliver(self.ctx.stream_id, self.ctx.key, &[value])
        {
            Ok(_) => {
                // Dropped values never raise the mark.
                let mut st = self.state.lock();
                st.high_water = st.high_water.max(range.end);
                Ok(())
            }
            Err(DeliveryError::NotPossible { reason, .. }) => {
                tracing::debug!(stream_id = %self.ctx.stream_id, tick = value.value_tick, "express value dropped: {reason}");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn write_silence(&self, _start: Tick, end: Tick) {
        let mut st = self.state.lock();
        st.high_water = st.high_water.max(end);
    }

    pub fn number_of_messages_received(&self) -> u64 {
        self.state.lock().received
    }

    pub fn last_msg_received_ms(&self) -> Option<u64> {
        self.state.lock().last_received_ms
    }
}

impl Stream for ExpressTargetStream {
    fn stream_id(&self) -> StreamId {
        self.ctx.stream_id
    }

    fn key(&self) -> StreamKey {
        self.ctx.key
    }

    fn completed_prefix(&self) -> Tick {
        self.state.lock().high_water
    }

    fn state_stream(&self) -> Option<StateStream> {
        None
    }

    fn write_silence_forced(&self, tick: Tick) -> Result<(), GdError> {
        self.write_silence(tick, tick);
        Ok(())
    }

    fn ticks_on_stream(&self) -> TicksOnStream {
        TicksOnStream::empty()
    }

    fn flush(&self) {}

    fn reconstitute(&self, prefix: Tick) -> Result<(), GdError> {
        let mut st = self.state.lock();
        st.high_water = st.high_water.max(prefix);
        Ok(())
    }
}

/// Receiver chosen by reliability tier.
pub enum TargetStream {
    Express(ExpressTargetStream),
    Guaranteed(Arc<GuaranteedTargetStream>),
}

impl TargetStream {
    pub fn new(
        ctx: StreamContext,
        upstream: Arc<dyn UpstreamControl>,
        deliverer: Arc<dyn MessageDeliverer>,
    ) -> Self {
        if ctx.key.reliability.is_express() {
            TargetStream::Express(ExpressTargetStream::new(ctx, deliverer))
        } else {
            TargetStream::Guaranteed(GuaranteedTargetStream::new(ctx, upstream, deliverer))
        }
    }

    pub fn write_value(&self, range: TickRange) -> Result<(), GdError> {
        match self {
            TargetStream::Express(s) => s.write_value(range),
            TargetStream::Guaranteed(s) => s.write_value(range),
        }
    }

    pub fn write_silence(&self, start: Tick, end: Tick) -> Result<(), GdError> {
        match self {
            TargetStream::Express(s) => {
                s.write_silence(start, end);
                Ok(())
            }
            TargetStream::Guaranteed(s) => s.write_silence(start, end),
        }
    }

    /// Express streams never ack.
    pub fn process_ack_expected(&self, stamp: Tick) -> Result<(), GdError> {
        match self {
            TargetStream::Express(_) => Ok(()),
            TargetStream::Guaranteed(s) => s.process_ack_expected(stamp),
        }
    }

    pub fn batch_committed(&self) -> Result<(), GdError> {
        match self {
            TargetStream::Express(_) => Ok(()),
            TargetStream::Guaranteed(s) => s.batch_committed(),
        }
    }

    pub fn batch_rolled_back(&self) -> Result<(), GdError> {
        match self {
            TargetStream::Express(_) => Ok(()),
            TargetStream::Guaranteed(s) => s.batch_rolled_back(),
        }
    }

    pub fn number_of_messages_received(&self) -> u64 {
        match self {
            TargetStream::Express(s) => s.number_of_messages_received(),
            TargetStream::Guaranteed(s) => s.number_of_messages_received(),
        }
    }

    pub fn last_msg_received_ms(&self) -> Option<u64> {
        match self {
            TargetStream::Express(s) => s.last_msg_received_ms(),
            TargetStream::Guaranteed(s) => s.last_msg_received_ms(),
        }
    }

    pub fn as_guaranteed(&self) -> Option<&Arc<GuaranteedTargetStream>> {
        match self {
            TargetStream::Guaranteed(s) => Some(s),
            TargetStream::Express(_) => None,
        }
    }

    fn inner(&self) -> &dyn Stream {
        match self {
            TargetStream::Express(s) => s,
            TargetStream::Guaranteed(s) => s.as_ref(),
        }
    }
}

impl Stream for TargetStream {
    fn stream_id(&self) -> StreamId {
        self.inner().stream_id()
    }

    fn key(&self) -> StreamKey {
        self.inner().key()
    }

    fn completed_prefix(&self) -> Tick {
        self.inner().completed_prefix()
    }

    fn state_stream(&self) -> Option<StateStream> {
        self.inner().state_stream()
    }

    fn write_silence_forced(&self, tick: Tick) -> Result<(), GdError> {
        self.inner().write_silence_forced(tick)
    }

    fn ticks_on_stream(&self) -> TicksOnStream {
        self.inner().ticks_on_stream()
    }

    fn flush(&self) {
        self.inner().flush()
    }

    fn reconstitute(&self, prefix: Tick) -> Result<(), GdError> {
        self.inner().reconstitute(prefix)
    }
}
