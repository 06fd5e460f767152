//! Downstream-facing side of an intermediate node, one stream per
//! neighbour and key.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{
    INFINITY, NeighbourId, StateStream, StreamId, StreamKey, Tick, TickKind, TickRange, TickState,
    TicksOnStream, tick,
};

use super::control::{AckExpected, DataMessage, DownstreamControl, Silence, log_send};
use super::error::GdError;
use super::stream::{InternalResultExt, Stream, StreamContext};

enum Outbound {
    Data(TickRange),
    Silence(Tick, Tick),
    AckExpected(Tick),
}

struct OutputState {
    stream: StateStream,
    last_msg_sent: Tick,
    total_sent: u64,
}

pub struct InternalOutputStream {
    ctx: StreamContext,
    neighbour: NeighbourId,
    downstream: Arc<dyn DownstreamControl>,
    state: Mutex<OutputState>,
}

impl InternalOutputStream {
    pub fn new(
        ctx: StreamContext,
        neighbour: NeighbourId,
        downstream: Arc<dyn DownstreamControl>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            neighbour,
            downstream,
            state: Mutex::new(OutputState {
                stream: StateStream::new(),
                last_msg_sent: 0,
                total_sent: 0,
            }),
        })
    }

    pub fn neighbour(&self) -> NeighbourId {
        self.neighbour
    }

    fn id(&self) -> StreamId {
        self.ctx.stream_id
    }

    /// Forward a value if this neighbour has not seen it.
    pub fn write_value(&self, range: TickRange) -> Result<bool, GdError> {
        let sent = {
            let mut st = self.state.lock();
            if !st.stream.write_combined_range(range).in_stream(self.id())? {
                return Ok(false);
            }
            if let Some(t) = range.value_tick() {
                st.last_msg_sent = st.last_msg_sent.max(t);
            }
            st.total_sent += 1;
            st.stream.range_at(range.value_tick().unwrap_or(range.start))
        };
        self.send(vec![Outbound::Data(sent)]);
        Ok(true)
    }

    pub fn write_silence(&self, start: Tick, end: Tick) -> Result<bool, GdError> {
        let changed = self
            .state
            .lock()
            .stream
            .write_completed_range(start, end)
            .in_stream(self.id())?;
        if changed {
            self.send(vec![Outbound::Silence(start, end)]);
        }
        Ok(changed)
    }

    /// The neighbour acked through `stamp`.
    pub fn write_ack_prefix(&self, stamp: Tick) -> Result<bool, GdError> {
        self.state
            .lock()
            .stream
            .set_completed_prefix(stamp)
            .in_stream(self.id())
    }

    /// Answer a neighbour's nack from local state. Returns the segments this
    /// node does not have, to be asked for upstream.
    pub fn process_nack(&self, start: Tick, end: Tick) -> Result<Vec<(Tick, Tick)>, GdError> {
        let mut out = Vec::new();
        let mut missing: Vec<(Tick, Tick)> = Vec::new();
        {
            let mut st = self.state.lock();
            let prefix = st.stream.completed_prefix();
            let mut start = start;
            if start <= prefix {
                out.push(Outbound::Silence(start, prefix.min(end)));
                start = tick::next(prefix);
            }
            if start <= end {
                for r in st.stream.ranges_in(start, end) {
                    let (s, e) = (r.start.max(start), r.end.min(end));
                    match r.state {
                        TickState::Completed => out.push(Outbound::Silence(s, e)),
                        TickState::Value(v) => {
                            out.push(Outbound::Data(r));
                            st.last_msg_sent = st.last_msg_sent.max(v.value_tick);
                            st.total_sent += 1;
                        }
                        _ => match missing.last_mut() {
                            Some(last) if last.1 != INFINITY && last.1 + 1 == s => last.1 = e,
                            _ => missing.push((s, e)),
                        },
                    }
                }
            }
        }
        self.send(out);
        Ok(missing)
    }

    /// Prompt the neighbour if it has not acked through `stamp`.
    pub fn process_ack_expected(&self, stamp: Tick) {
        let behind = {
            let st = self.state.lock();
            let limit = stamp.min(st.last_msg_sent);
            (limit > st.stream.completed_prefix()).then_some(limit)
        };
        if let Some(tick) = behind {
            self.send(vec![Outbound::AckExpected(tick)]);
        }
    }

    pub fn total_sent(&self) -> u64 {
        self.state.lock().total_sent
    }

    /// Whether the neighbour still owes an ack for something sent.
    pub fn has_in_doubt(&self) -> bool {
        let st = self.state.lock();
        st.stream.contains_state(
            tick::next(st.stream.completed_prefix()),
            st.last_msg_sent.max(tick::next(st.stream.completed_prefix())),
            TickKind::Value,
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

impl Stream for InternalOutputStream {
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
            .in_stream(self.id())?;
        self.send(vec![Outbound::Silence(tick, tick)]);
        Ok(())
    }

    fn ticks_on_stream(&self) -> TicksOnStream {
        self.state.lock().stream.ticks_on_stream()
    }

    fn flush(&self) {}

    fn reconstitute(&self, prefix: Tick) -> Result<(), GdError> {
        let mut st = self.state.lock();
        st.stream.set_completed_prefix(prefix).in_stream(self.id())?;
        st.last_msg_sent = st.last_msg_sent.max(prefix);
        Ok(())
    }
}
