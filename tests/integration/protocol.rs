use gd_rs::core::{GdConfig, StreamId, TickKind};
use gd_rs::gd::{ControlMessage, DataMessage, InternalInputStream, Stream};
use gd_rs::test_harness::{ManualAlarms, RecordingTransport, stream_context};

use crate::fixtures::{Pair, assured, reliable, value};

fn is_data_at(msg: &ControlMessage, tick: u64) -> bool {
    matches!(msg, ControlMessage::Data(d) if d.range.value_tick() == Some(tick))
}

#[test]
fn out_of_order_arrival_completes_the_prefix() {
    let pair = Pair::new(GdConfig::default());
    let id = StreamId::random();
    for tick in [1, 3, 2] {
        pair.input
            .process_value(DataMessage {
                stream_id: id,
                key: assured(),
                range: value(tick),
            })
            .unwrap();
    }

    let stream = pair.input.stream(id, assured()).unwrap();
    assert_eq!(stream.completed_prefix(), 3);
    assert_eq!(stream.ticks_on_stream().count(), 0);
    assert_eq!(pair.deliverer.delivered_ticks(), vec![1, 2, 3]);
    assert_eq!(pair.upstream.acks(), vec![1, 3]);
}

#[test]
fn lost_value_is_recovered_by_the_gap_timer() {
    let pair = Pair::new(GdConfig::default());
    let id = StreamId::random();
    for tick in 1..=3 {
        assert!(pair.output.write_value(id, assured(), value(tick)).unwrap());
    }
    pair.pump_where(|m| !is_data_at(m, 2));
    assert_eq!(pair.deliverer.delivered_ticks(), vec![1]);
    assert!(!pair.output.is_flushable(id));

    pair.advance(pair.config.gap_curiosity_ms);
    pair.pump();

    assert_eq!(pair.deliverer.delivered_ticks(), vec![1, 2, 3]);
    assert!(pair.output.is_flushable(id));
}

#[test]
fn lost_tail_is_recovered_by_ack_expected() {
    let pair = Pair::new(GdConfig::default());
    let id = StreamId::random();
    pair.output.write_value(id, assured(), value(1)).unwrap();
    pair.output.write_value(id, assured(), value(2)).unwrap();
    pair.pump_where(|m| !is_data_at(m, 2));
    assert_eq!(pair.deliverer.delivered_ticks(), vec![1]);

    pair.advance(pair.config.ack_expected_ms);
    pair.pump();

    assert_eq!(pair.deliverer.delivered_ticks(), vec![1, 2]);
    assert!(pair.output.is_flushable(id));
}

#[test]
fn send_window_holds_values_until_acked() {
    let pair = Pair::new(GdConfig {
        send_window: 2,
        ..GdConfig::default()
    });
    let id = StreamId::random();
    let sent: Vec<bool> = (1..=4)
        .map(|t| pair.output.write_value(id, reliable(), value(t)).unwrap())
        .collect();
    assert_eq!(sent, vec![true, true, false, false]);
    assert_eq!(pair.downstream.data_ticks(), vec![1, 2]);

    pair.pump();
    assert_eq!(pair.deliverer.delivered_ticks(), vec![1, 2, 3, 4]);
    assert!(pair.output.is_flushable(id));
}

#[test]
fn rolled_back_ticks_become_silence_on_the_target() {
    let pair = Pair::new(GdConfig::default());
    let id = StreamId::random();
    let key = assured();
    pair.output
        .write_uncommitted(
            id,
            key,
            gd_rs::core::TickRange::uncommitted(1, 1, 1, gd_rs::core::MessageRef::new(1)),
        )
        .unwrap();
    pair.output.write_value(id, key, value(2)).unwrap();
    pair.pump();
    assert!(pair.deliverer.delivered_ticks().is_empty());

    pair.output.write_silence(id, key, 1, 1).unwrap();
    pair.pump();
    assert_eq!(pair.deliverer.delivered_ticks(), vec![2]);
    assert_eq!(pair.input.stream(id, key).unwrap().completed_prefix(), 2);
}

#[test]
fn acks_inside_one_window_leave_as_one() {
    let alarms = ManualAlarms::new();
    let upstream = RecordingTransport::new();
    let config = GdConfig {
        ack_coalesce_ms: 30,
        ..GdConfig::default()
    };
    let ctx = stream_context(StreamId::random(), reliable(), config, &alarms);
    let stream = InternalInputStream::new(ctx, upstream.clone());

    for prefix in [1, 2, 3] {
        stream.write_ack_prefix(prefix).unwrap();
    }
    assert!(upstream.acks().is_empty());

    alarms.advance_ms(30);
    assert_eq!(upstream.acks(), vec![3]);
}

#[test]
fn requested_ticks_are_forgotten_and_nacked_again() {
    let alarms = ManualAlarms::new();
    let upstream = RecordingTransport::new();
    let config = GdConfig::default();
    let forget_ms = config.request_forget_ms;
    let ctx = stream_context(StreamId::random(), reliable(), config, &alarms);
    let stream = InternalInputStream::new(ctx, upstream.clone());

    stream.process_nack(5, 10).unwrap();
    assert_eq!(upstream.nacks(), vec![(5, 10)]);
    let state = stream.state_stream().unwrap();
    assert_eq!(state.segments(5, 10, |k| k == TickKind::Requested), vec![(5, 10)]);

    stream.process_nack(5, 10).unwrap();
    assert_eq!(upstream.nacks().len(), 1);

    alarms.advance_ms(forget_ms);
    let state = stream.state_stream().unwrap();
    assert_eq!(state.segments(5, 10, |k| k == TickKind::Unknown), vec![(5, 10)]);

    stream.process_nack(5, 10).unwrap();
    assert_eq!(upstream.nacks(), vec![(5, 10), (5, 10)]);
}
