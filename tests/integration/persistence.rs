use std::sync::Arc;

use gd_rs::core::{GdConfig, StreamId};
use gd_rs::gd::{ControlMessage, JsonFileStore, OutputManager, Stream, StreamStore};

use crate::fixtures::{Pair, assured, value};

#[test]
fn restarted_source_resends_what_was_in_doubt() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::open(dir.path().join("gd")).unwrap());
    let mut pair = Pair::new(GdConfig::default()).with_source_store(store.clone());
    let id = StreamId::random();

    for tick in 1..=3 {
        pair.output.write_value(id, assured(), value(tick)).unwrap();
    }
    pair.pump_where(|m| !matches!(m, ControlMessage::Data(d) if d.range.value_tick() == Some(3)));
    assert_eq!(pair.deliverer.delivered_ticks(), vec![1, 2]);
    assert_eq!(store.stream_ids().unwrap(), vec![id]);

    pair.output = OutputManager::new(
        pair.config.clone(),
        pair.alarms.clone(),
        pair.downstream.clone(),
    )
    .with_store(store.clone());
    assert_eq!(pair.output.restore().unwrap(), 1);
    assert_eq!(pair.output.stream(id, assured()).unwrap().completed_prefix(), 2);
    assert!(!pair.output.is_flushable(id));

    for _ in 0..10 {
        if pair.deliverer.delivered_ticks().len() == 3 {
            break;
        }
        pair.advance(pair.config.ack_expected_ms);
        pair.pump();
    }
    assert_eq!(pair.deliverer.delivered_ticks(), vec![1, 2, 3]);

    assert!(pair.output.flush_if_complete(id));
    pair.pump();
    assert!(store.stream_ids().unwrap().is_empty());
    assert!(pair.input.stream_sets().is_empty());
}

#[test]
fn non_persistent_streams_leave_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::open(dir.path()).unwrap());
    let pair = Pair::new(GdConfig::default()).with_source_store(store.clone());
    let id = StreamId::random();

    pair.output
        .write_value(id, crate::fixtures::reliable(), value(1))
        .unwrap();
    assert!(store.stream_ids().unwrap().is_empty());
}
