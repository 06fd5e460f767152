//! A source and a target wired back to back through recording transports.
//! Nothing moves until a test pumps, so tests choose what gets lost.

use std::sync::Arc;

use gd_rs::core::{GdConfig, MessageRef, Priority, Reliability, StreamKey, Tick, TickRange};
use gd_rs::gd::{ControlMessage, InputManager, OutputManager, StreamStore};
use gd_rs::test_harness::{ManualAlarms, RecordingDeliverer, RecordingTransport};

pub fn assured() -> StreamKey {
    StreamKey::new(Priority::DEFAULT, Reliability::AssuredPersistent)
}

pub fn reliable() -> StreamKey {
    StreamKey::new(Priority::DEFAULT, Reliability::ReliableNonPersistent)
}

pub fn value(tick: Tick) -> TickRange {
    TickRange::value(tick, MessageRef::new(tick))
}

pub struct Pair {
    pub config: Arc<GdConfig>,
    pub alarms: Arc<ManualAlarms>,
    /// Source to target.
    pub downstream: Arc<RecordingTransport>,
    /// Target to source.
    pub upstream: Arc<RecordingTransport>,
    pub deliverer: Arc<RecordingDeliverer>,
    pub output: OutputManager,
    pub input: InputManager,
}

impl Pair {
    pub fn new(config: GdConfig) -> Self {
        let config = Arc::new(config);
        let alarms = ManualAlarms::new();
        let downstream = RecordingTransport::new();
        let upstream = RecordingTransport::new();
        let deliverer = RecordingDeliverer::new();
        let output = OutputManager::new(config.clone(), alarms.clone(), downstream.clone());
        let input = InputManager::new(
            config.clone(),
            alarms.clone(),
            upstream.clone(),
            deliverer.clone(),
        );
        Self {
            config,
            alarms,
            downstream,
            upstream,
            deliverer,
            output,
            input,
        }
    }

    pub fn with_source_store(mut self, store: Arc<dyn StreamStore>) -> Self {
        self.output = OutputManager::new(
            self.config.clone(),
            self.alarms.clone(),
            self.downstream.clone(),
        )
        .with_store(store);
        self
    }

    /// The target process restarts with nothing remembered.
    pub fn restart_target(&mut self) {
        self.input = InputManager::new(
            self.config.clone(),
            self.alarms.clone(),
            self.upstream.clone(),
            self.deliverer.clone(),
        );
    }

    pub fn pump(&self) -> usize {
        self.pump_where(|_| true)
    }

    /// Carry traffic both ways until quiet, discarding whatever `keep`
    /// rejects. Returns how many messages arrived.
    pub fn pump_where(&self, mut keep: impl FnMut(&ControlMessage) -> bool) -> usize {
        let mut arrived = 0;
        loop {
            let down = self.downstream.take();
            let up = self.upstream.take();
            if down.is_empty() && up.is_empty() {
                return arrived;
            }
            for msg in down.into_iter().filter(|m| keep(m)) {
                arrived += 1;
                self.to_target(msg);
            }
            for msg in up.into_iter().filter(|m| keep(m)) {
                arrived += 1;
                self.to_source(msg);
            }
        }
    }

    pub fn advance(&self, ms: u64) {
        self.alarms.advance_ms(ms);
    }

    fn to_target(&self, msg: ControlMessage) {
        match msg {
            ControlMessage::Data(m) => self.input.process_value(m).unwrap(),
            ControlMessage::Silence(m) => self.input.process_silence(m).unwrap(),
            ControlMessage::AckExpected(m) => self.input.process_ack_expected(m).unwrap(),
            ControlMessage::Flushed(m) => {
                self.input.process_flushed(m);
            }
            ControlMessage::NotFlushed(m) => self.input.process_not_flushed(m).unwrap(),
            other => panic!("unexpected downstream message {other:?}"),
        }
    }

    fn to_source(&self, msg: ControlMessage) {
        match msg {
            ControlMessage::Ack(m) => {
                self.output.process_ack(m).unwrap();
            }
            ControlMessage::Nack(m) => self.output.process_nack(m).unwrap(),
            ControlMessage::AreYouFlushed(m) => {
                self.output.process_flush_query(m);
            }
            other => panic!("unexpected upstream message {other:?}"),
        }
    }
}
