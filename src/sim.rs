//! In-process simulation of one stream crossing a lossy link, optionally
//! through an intermediate node, on virtual time.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::core::{GdConfig, MessageRef, NeighbourId, StreamId, StreamKey, Tick, TickRange};
use crate::gd::{
    Ack, AckExpected, AreYouFlushed, ControlMessage, DataMessage, DownstreamControl, Flushed,
    GdError, InputManager, InternalInputManager, InternalOutputManager, Nack, NotFlushed,
    OutputManager, SendError, Silence, UpstreamControl,
};
use crate::test_harness::{ManualAlarms, RecordingDeliverer};

#[derive(Clone, Debug)]
pub struct SimConfig {
    pub messages: u64,
    /// Chance, in percent, that any one control message is lost.
    pub loss_percent: u8,
    pub seed: u64,
    pub key: StreamKey,
    pub intermediate: bool,
    pub step_ms: u64,
    pub max_steps: u64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SimReport {
    pub stream_id: String,
    pub messages: u64,
    pub delivered: u64,
    pub in_order: bool,
    pub flushed: bool,
    pub target_cleaned: bool,
    pub steps: u64,
    pub virtual_ms: u64,
    pub dropped: u64,
    /// Messages that made it across, by kind.
    pub carried: BTreeMap<&'static str, u64>,
}

/// One direction of a link. Drops a share of what it is given.
struct Wire {
    queue: Mutex<VecDeque<ControlMessage>>,
    loss: f64,
    rng: Mutex<StdRng>,
    dropped: Mutex<u64>,
}

impl Wire {
    fn new(loss_percent: u8, seed: u64) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(VecDeque::new()),
            loss: f64::from(loss_percent.min(100)) / 100.0,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            dropped: Mutex::new(0),
        })
    }

    fn push(&self, msg: ControlMessage) -> Result<(), SendError> {
        if self.rng.lock().gen_bool(self.loss) {
            *self.dropped.lock() += 1;
            tracing::trace!(kind = msg.kind(), stream_id = %msg.stream_id(), "message lost");
            return Ok(());
        }
        self.queue.lock().push_back(msg);
        Ok(())
    }

    fn pop(&self) -> Option<ControlMessage> {
        self.queue.lock().pop_front()
    }

    fn dropped(&self) -> u64 {
        *self.dropped.lock()
    }
}

impl UpstreamControl for Wire {
    fn send_ack(&self, ack: Ack) -> Result<(), SendError> {
        self.push(ControlMessage::Ack(ack))
    }

    fn send_nack(&self, nack: Nack) -> Result<(), SendError> {
        self.push(ControlMessage::Nack(nack))
    }

    fn send_are_you_flushed(&self, query: AreYouFlushed) -> Result<(), SendError> {
        self.push(ControlMessage::AreYouFlushed(query))
    }
}

impl DownstreamControl for Wire {
    fn send_data(&self, msg: DataMessage) -> Result<(), SendError> {
        self.push(ControlMessage::Data(msg))
    }

    fn send_silence(&self, msg: Silence) -> Result<(), SendError> {
        self.push(ControlMessage::Silence(msg))
    }

    fn send_ack_expected(&self, msg: AckExpected) -> Result<(), SendError> {
        self.push(ControlMessage::AckExpected(msg))
    }

    fn send_flushed(&self, msg: Flushed) -> Result<(), SendError> {
        self.push(ControlMessage::Flushed(msg))
    }

    fn send_not_flushed(&self, msg: NotFlushed) -> Result<(), SendError> {
        self.push(ControlMessage::NotFlushed(msg))
    }
}

struct Relay {
    node: InternalOutputManager,
    neighbour: NeighbourId,
    down: Arc<Wire>,
    up: Arc<Wire>,
}

struct Sim {
    alarms: Arc<ManualAlarms>,
    output: OutputManager,
    input: InputManager,
    deliverer: Arc<RecordingDeliverer>,
    /// Source side of the first link.
    first_down: Arc<Wire>,
    first_up: Arc<Wire>,
    relay: Option<Relay>,
    carried: BTreeMap<&'static str, u64>,
}

impl Sim {
    fn new(gd: GdConfig, cfg: &SimConfig) -> Self {
        let gd = Arc::new(gd);
        let alarms = ManualAlarms::new();
        let deliverer = RecordingDeliverer::new();
        let first_down = Wire::new(cfg.loss_percent, cfg.seed);
        let first_up = Wire::new(cfg.loss_percent, cfg.seed.wrapping_add(1));
        let output = OutputManager::new(gd.clone(), alarms.clone(), first_down.clone());

        let (input, relay) = if cfg.intermediate {
            let down = Wire::new(cfg.loss_percent, cfg.seed.wrapping_add(2));
            let up = Wire::new(cfg.loss_percent, cfg.seed.wrapping_add(3));
            let node_input = Arc::new(InternalInputManager::new(
                gd.clone(),
                alarms.clone(),
                first_up.clone(),
            ));
            let node = InternalOutputManager::new(gd.clone(), alarms.clone(), node_input);
            let neighbour = NeighbourId::new(uuid::Uuid::from_u64_pair(cfg.seed, 1));
            node.add_neighbour(neighbour, down.clone());
            let input = InputManager::new(gd, alarms.clone(), up.clone(), deliverer.clone());
            (
                input,
                Some(Relay {
                    node,
                    neighbour,
                    down,
                    up,
                }),
            )
        } else {
            let input = InputManager::new(gd, alarms.clone(), first_up.clone(), deliverer.clone());
            (input, None)
        };

        Self {
            alarms,
            output,
            input,
            deliverer,
            first_down,
            first_up,
            relay,
            carried: BTreeMap::new(),
        }
    }

    /// Carry messages until every wire is empty.
    fn pump(&mut self) -> Result<(), GdError> {
        loop {
            let mut moved = false;
            while let Some(msg) = self.first_up.pop() {
                moved = true;
                self.count(&msg);
                self.to_source(msg)?;
            }
            while let Some(msg) = self.first_down.pop() {
                moved = true;
                self.count(&msg);
                match &self.relay {
                    Some(relay) => relay_from_upstream(&relay.node, msg)?,
                    None => self.to_target(msg)?,
                }
            }
            if let Some(relay) = &self.relay {
                let (down, up) = (relay.down.clone(), relay.up.clone());
                while let Some(msg) = up.pop() {
                    moved = true;
                    self.count(&msg);
                    if let Some(relay) = &self.relay {
                        relay_from_downstream(&relay.node, relay.neighbour, msg)?;
                    }
                }
                while let Some(msg) = down.pop() {
                    moved = true;
                    self.count(&msg);
                    self.to_target(msg)?;
                }
            }
            if !moved {
                return Ok(());
            }
        }
    }

    fn count(&mut self, msg: &ControlMessage) {
        *self.carried.entry(msg.kind()).or_default() += 1;
    }

    fn to_source(&self, msg: ControlMessage) -> Result<(), GdError> {
        match msg {
            ControlMessage::Ack(ack) => {
                self.output.process_ack(ack)?;
            }
            ControlMessage::Nack(nack) => self.output.process_nack(nack)?,
            ControlMessage::AreYouFlushed(query) => {
                self.output.process_flush_query(query);
            }
            other => tracing::debug!(kind = other.kind(), "source ignores downstream message"),
        }
        Ok(())
    }

    fn to_target(&self, msg: ControlMessage) -> Result<(), GdError> {
        match msg {
            ControlMessage::Data(data) => self.input.process_value(data)?,
            ControlMessage::Silence(silence) => self.input.process_silence(silence)?,
            ControlMessage::AckExpected(ae) => self.input.process_ack_expected(ae)?,
            ControlMessage::Flushed(flushed) => {
                self.input.process_flushed(flushed);
            }
            ControlMessage::NotFlushed(reply) => self.input.process_not_flushed(reply)?,
            other => tracing::debug!(kind = other.kind(), "target ignores upstream message"),
        }
        Ok(())
    }
}

fn relay_from_upstream(node: &InternalOutputManager, msg: ControlMessage) -> Result<(), GdError> {
    match msg {
        ControlMessage::Data(data) => {
            node.write_value(data)?;
        }
        ControlMessage::Silence(silence) => node.write_silence(silence)?,
        ControlMessage::AckExpected(ae) => node.process_ack_expected(ae)?,
        ControlMessage::Flushed(flushed) => {
            node.process_flushed(flushed);
        }
        ControlMessage::NotFlushed(reply) => node.process_not_flushed(reply)?,
        other => tracing::debug!(kind = other.kind(), "relay ignores message from upstream"),
    }
    Ok(())
}

fn relay_from_downstream(
    node: &InternalOutputManager,
    neighbour: NeighbourId,
    msg: ControlMessage,
) -> Result<(), GdError> {
    match msg {
        ControlMessage::Ack(ack) => node.process_ack(neighbour, ack)?,
        ControlMessage::Nack(nack) => node.process_nack(neighbour, nack)?,
        ControlMessage::AreYouFlushed(query) => {
            node.process_flush_query(neighbour, query);
        }
        other => tracing::debug!(kind = other.kind(), "relay ignores message from downstream"),
    }
    Ok(())
}

/// Send `messages` values with small silent gaps between them, then let
/// timers run until the source can flush or `max_steps` runs out.
pub fn run(gd: GdConfig, cfg: &SimConfig) -> Result<SimReport, GdError> {
    let mut sim = Sim::new(gd, cfg);
    let stream_id = StreamId::random();
    let started_ms = sim.alarms.clock().now_ms();

    let mut expected: Vec<Tick> = Vec::with_capacity(cfg.messages as usize);
    let mut last: Tick = 0;
    for i in 0..cfg.messages {
        let start = last + 1;
        let value_tick = start + i % 3;
        sim.output.write_value(
            stream_id,
            cfg.key,
            TickRange::combined_value(start, value_tick, value_tick, MessageRef::new(i + 1)),
        )?;
        expected.push(value_tick);
        last = value_tick;
        sim.pump()?;
    }

    let mut steps = 0;
    let mut flushed = false;
    while steps < cfg.max_steps {
        if sim.output.flush_if_complete(stream_id) {
            flushed = true;
            sim.pump()?;
            break;
        }
        sim.alarms.advance_ms(cfg.step_ms);
        sim.pump()?;
        steps += 1;
    }

    let delivered = sim.deliverer.delivered_ticks();
    let dropped = sim.first_down.dropped()
        + sim.first_up.dropped()
        + sim
            .relay
            .as_ref()
            .map_or(0, |r| r.down.dropped() + r.up.dropped());
    let report = SimReport {
        stream_id: stream_id.to_string(),
        messages: cfg.messages,
        delivered: delivered.len() as u64,
        in_order: delivered == expected,
        flushed,
        target_cleaned: sim.input.stream(stream_id, cfg.key).is_none(),
        steps,
        virtual_ms: sim.alarms.clock().now_ms() - started_ms,
        dropped,
        carried: std::mem::take(&mut sim.carried),
    };
    tracing::info!(
        stream_id = %stream_id,
        delivered = report.delivered,
        flushed = report.flushed,
        dropped = report.dropped,
        steps = report.steps,
        "simulation finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::{Priority, Reliability};

    fn sim(loss_percent: u8, intermediate: bool) -> SimConfig {
        SimConfig {
            messages: 40,
            loss_percent,
            seed: 7,
            key: StreamKey::new(Priority::DEFAULT, Reliability::AssuredPersistent),
            intermediate,
            step_ms: 100,
            max_steps: 50_000,
        }
    }

    #[test]
    fn lossless_link_delivers_everything_and_flushes() {
        let report = run(GdConfig::default(), &sim(0, false)).unwrap();
        assert_eq!(report.delivered, 40);
        assert!(report.in_order);
        assert!(report.flushed);
        assert!(report.target_cleaned);
        assert_eq!(report.dropped, 0);
    }

    #[test]
    fn lossy_link_still_delivers_in_order() {
        let report = run(GdConfig::default(), &sim(25, false)).unwrap();
        assert!(report.dropped > 0);
        assert!(report.in_order, "{report:?}");
        assert!(report.flushed, "{report:?}");
    }

    #[test]
    fn intermediate_node_relays_under_loss() {
        let report = run(GdConfig::default(), &sim(15, true)).unwrap();
        assert!(report.in_order, "{report:?}");
        assert!(report.flushed, "{report:?}");
    }
}
