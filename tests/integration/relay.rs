use gd_rs::core::{GdConfig, Priority, Reliability, StreamKey};
use gd_rs::sim::{self, SimConfig};

fn through_relay(key: StreamKey, seed: u64) -> SimConfig {
    SimConfig {
        messages: 30,
        loss_percent: 20,
        seed,
        key,
        intermediate: true,
        step_ms: 100,
        max_steps: 100_000,
    }
}

#[test]
fn relay_delivers_everything_under_loss() {
    let key = StreamKey::new(Priority::DEFAULT, Reliability::AssuredPersistent);
    for seed in 1..=3 {
        let report = sim::run(GdConfig::default(), &through_relay(key, seed)).unwrap();
        assert!(report.in_order, "seed {seed}: {report:?}");
        assert!(report.flushed, "seed {seed}: {report:?}");
        assert_eq!(report.delivered, report.messages, "seed {seed}");
    }
}

#[test]
fn relay_carries_reliable_streams_too() {
    let key = StreamKey::new(Priority::new(7).unwrap(), Reliability::ReliableNonPersistent);
    let report = sim::run(GdConfig::default(), &through_relay(key, 11)).unwrap();
    assert!(report.in_order, "{report:?}");
    assert!(report.flushed, "{report:?}");
    assert!(report.carried.get("data").copied().unwrap_or(0) >= report.messages);
}
