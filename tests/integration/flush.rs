use gd_rs::core::{GdConfig, Priority, Reliability, RequestId, StreamId, StreamKey};
use gd_rs::gd::{
    Ack, AreYouFlushed, CompletedPrefix, ControlMessage, FlushReply, NotFlushed, Stream,
};

use crate::fixtures::{Pair, assured, value};

#[test]
fn flush_query_answers_from_live_streams() {
    let pair = Pair::new(GdConfig::default());
    let unknown = pair.output.process_flush_query(AreYouFlushed {
        stream_id: StreamId::random(),
        request_id: RequestId::new(1),
    });
    assert_eq!(unknown, FlushReply::Flushed);

    let id = StreamId::random();
    let low = StreamKey::new(Priority::new(2).unwrap(), Reliability::ReliableNonPersistent);
    pair.output.write_value(id, low, value(1)).unwrap();
    pair.output.write_value(id, assured(), value(1)).unwrap();
    pair.output.write_value(id, assured(), value(2)).unwrap();
    pair.output
        .process_ack(Ack {
            stream_id: id,
            key: assured(),
            ack_prefix: 1,
        })
        .unwrap();

    let reply = pair.output.process_flush_query(AreYouFlushed {
        stream_id: id,
        request_id: RequestId::new(2),
    });
    let mut expected: Vec<CompletedPrefix> = pair
        .output
        .stream_sets()
        .iter()
        .flat_map(|set| set.streams())
        .map(|s| CompletedPrefix {
            key: s.key(),
            completed_prefix: s.completed_prefix(),
        })
        .collect();
    expected.sort();
    let FlushReply::NotFlushed(NotFlushed {
        stream_id,
        request_id,
        mut prefixes,
    }) = reply
    else {
        panic!("expected a not-flushed reply");
    };
    prefixes.sort();
    assert_eq!(stream_id, id);
    assert_eq!(request_id, RequestId::new(2));
    assert_eq!(prefixes, expected);
    assert!(prefixes.contains(&CompletedPrefix {
        key: assured(),
        completed_prefix: 1,
    }));
}

#[test]
fn restarted_target_recovers_through_the_flush_query() {
    let mut pair = Pair::new(GdConfig::default());
    let id = StreamId::random();
    pair.output.write_value(id, assured(), value(1)).unwrap();
    pair.output.write_value(id, assured(), value(2)).unwrap();
    pair.pump();
    assert_eq!(pair.deliverer.delivered_ticks(), vec![1, 2]);

    pair.restart_target();
    pair.output.write_value(id, assured(), value(3)).unwrap();
    pair.pump_where(|m| !matches!(m, ControlMessage::Data(_)));

    let mut queries = 0;
    for _ in 0..10 {
        if pair.deliverer.delivered_ticks().len() == 3 {
            break;
        }
        pair.advance(pair.config.ack_expected_ms);
        pair.pump_where(|m| {
            if matches!(m, ControlMessage::AreYouFlushed(_)) {
                queries += 1;
            }
            true
        });
    }

    assert!(queries >= 1);
    assert_eq!(pair.deliverer.delivered_ticks(), vec![1, 2, 3]);
    assert_eq!(pair.input.stream(id, assured()).unwrap().completed_prefix(), 3);
}

#[test]
fn source_flush_clears_the_target() {
    let pair = Pair::new(GdConfig::default());
    let id = StreamId::random();
    pair.output.write_value(id, assured(), value(1)).unwrap();
    pair.pump();
    assert!(pair.input.stream(id, assured()).is_some());

    assert!(pair.output.flush_if_complete(id));
    pair.pump();
    assert!(pair.input.stream(id, assured()).is_none());
    assert!(pair.input.stream_sets().is_empty());

    // a late ack for the flushed stream is dropped
    let removed = pair
        .output
        .process_ack(Ack {
            stream_id: id,
            key: assured(),
            ack_prefix: 1,
        })
        .unwrap();
    assert!(removed.is_empty());
}

#[test]
fn force_flush_survives_a_failing_transport() {
    let pair = Pair::new(GdConfig::default());
    let id = StreamId::random();
    pair.output.write_value(id, assured(), value(1)).unwrap();
    pair.downstream.set_failing(true);

    assert!(pair.output.force_flush(id));
    assert!(pair.output.stream(id, assured()).is_none());
    assert_eq!(pair.downstream.count("flushed"), 1);
    assert!(!pair.output.force_flush(id));
}
