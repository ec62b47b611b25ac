use super::engine::{BrokerState, OutboundTable, dispatch_once};
use super::message::{MIN_ENCODED_LEN, Message, Payload, Value, decode, encode};
use super::queue::MessageQueue;
use crate::utils::BrokerError;
use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn status_payload() -> Payload {
    [
        ("sent", 0),
        ("loco", 1111),
        ("speed", 22),
        ("lat", 333),
        ("long", 444),
        ("base", 555),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), Value::from(v)))
    .collect()
}

fn msg(dest: &str, seq: i64) -> Message {
    let mut payload = Payload::new();
    payload.insert("seq".to_string(), Value::Int(seq));
    Message::new(6000, "sim.l.7357", dest, payload).unwrap()
}

fn assert_malformed(raw: &[u8]) {
    match decode(raw) {
        Err(BrokerError::MalformedMessage { .. }) => {}
        other => panic!("expected MalformedMessage, got {other:?}"),
    }
}

/// Hand-build a frame with a valid checksum, for bodies `encode` refuses
/// to produce.
fn frame_with_body(body: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u16(1);
    buf.put_u16(1);
    buf.put_slice(b"a");
    buf.put_u16(1);
    buf.put_slice(b"b");
    buf.put_u16(body.len() as u16);
    buf.put_slice(body);
    let crc = crc32c::crc32c(&buf);
    buf.put_u32(crc);
    buf.to_vec()
}

#[test]
fn test_round_trip_status_report() {
    let payload = status_payload();
    let raw = encode(6000, "sim.l.7357", "sim.b", &payload).unwrap();
    let (msg_type, source, dest, decoded) = decode(&raw).unwrap();

    assert_eq!(msg_type, 6000);
    assert_eq!(source, "sim.l.7357");
    assert_eq!(dest, "sim.b");
    assert_eq!(decoded, payload);
}

#[test]
fn test_payload_keys_come_back_sorted() {
    let msg = Message::new(6000, "sim.l.7357", "sim.b", status_payload()).unwrap();
    let back = Message::from_raw(msg.raw().clone()).unwrap();

    let keys: Vec<&str> = back.payload().keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["base", "lat", "loco", "long", "sent", "speed"]);
}

#[test]
fn test_round_trip_mixed_values() {
    let mut payload = Payload::new();
    payload.insert("milepost".to_string(), Value::Float(12.75));
    payload.insert("direction".to_string(), Value::from("increasing"));
    payload.insert("bpp".to_string(), Value::Int(-90));
    payload.insert("note".to_string(), Value::from(""));

    let msg = Message::new(6001, "sim.l.1", "sim.b", payload.clone()).unwrap();
    let back = Message::from_raw(msg.raw().clone()).unwrap();

    assert_eq!(back, msg);
    assert_eq!(back.payload(), &payload);
    assert_eq!(back.raw(), msg.raw());
}

#[test]
fn test_round_trip_empty_payload() {
    let msg = Message::new(0, "s", "d", Payload::new()).unwrap();
    assert_eq!(msg.raw().len(), MIN_ENCODED_LEN + 2);
    let back = Message::from_hex(&msg.to_hex()).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn test_encode_is_deterministic() {
    let a = encode(6000, "sim.l.7357", "sim.b", &status_payload()).unwrap();
    let b = encode(6000, "sim.l.7357", "sim.b", &status_payload()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_every_truncation_is_malformed() {
    let raw = encode(6000, "sim.l.7357", "sim.b", &status_payload()).unwrap();
    for len in 0..raw.len() {
        assert_malformed(&raw[..len]);
    }
}

#[test]
fn test_every_single_byte_corruption_is_malformed() {
    let raw = encode(6000, "sim.l.7357", "sim.b", &status_payload()).unwrap();
    for i in 0..raw.len() {
        let mut corrupted = raw.to_vec();
        corrupted[i] ^= 0x5a;
        assert_malformed(&corrupted);
    }
}

#[test]
fn test_trailing_bytes_are_malformed() {
    let mut body = BytesMut::new();
    body.put_u16(1);
    body.put_slice(b"k");
    body.put_u8(b'i');
    body.put_u16(8);
    body.put_i64(7);
    let good = frame_with_body(&body);
    assert!(decode(&good).is_ok());

    // one extra byte inside the checksummed frame, after the body
    let mut buf = BytesMut::from(&good[..good.len() - 4]);
    buf.put_u8(0);
    let crc = crc32c::crc32c(&buf);
    buf.put_u32(crc);
    assert_malformed(&buf);
}

#[test]
fn test_unknown_tag_and_bad_numeric_length_are_malformed() {
    let mut body = BytesMut::new();
    body.put_u16(1);
    body.put_slice(b"k");
    body.put_u8(b'x');
    body.put_u16(1);
    body.put_u8(0);
    assert_malformed(&frame_with_body(&body));

    let mut body = BytesMut::new();
    body.put_u16(1);
    body.put_slice(b"k");
    body.put_u8(b'i');
    body.put_u16(4);
    body.put_u32(0);
    assert_malformed(&frame_with_body(&body));
}

#[test]
fn test_out_of_order_or_duplicate_keys_are_malformed() {
    let entry = |key: &[u8], value: i64| {
        let mut e = BytesMut::new();
        e.put_u16(key.len() as u16);
        e.put_slice(key);
        e.put_u8(b'i');
        e.put_u16(8);
        e.put_i64(value);
        e
    };

    let mut body = entry(b"b", 1);
    body.extend_from_slice(&entry(b"a", 2));
    assert_malformed(&frame_with_body(&body));

    let mut body = entry(b"a", 1);
    body.extend_from_slice(&entry(b"a", 2));
    assert_malformed(&frame_with_body(&body));
}

#[test]
fn test_empty_addresses_are_rejected() {
    assert!(matches!(
        Message::new(1, "", "sim.b", Payload::new()),
        Err(BrokerError::MalformedMessage { .. })
    ));
    assert!(matches!(
        Message::new(1, "sim.l.1", "", Payload::new()),
        Err(BrokerError::MalformedMessage { .. })
    ));
}

#[test]
fn test_oversized_field_is_rejected_by_encoder() {
    let long = "x".repeat(u16::MAX as usize + 1);
    assert!(matches!(
        encode(1, &long, "sim.b", &Payload::new()),
        Err(BrokerError::MalformedMessage { .. })
    ));
}

#[test]
fn test_check_size() {
    let m = Message::new(6000, "sim.l.7357", "sim.b", status_payload()).unwrap();
    let size = m.raw().len();
    assert!(m.check_size(size).is_ok());
    match m.check_size(size - 1) {
        Err(BrokerError::MessageTooLarge { size: s, max }) => {
            assert_eq!(s, size);
            assert_eq!(max, size - 1);
        }
        other => panic!("expected MessageTooLarge, got {other:?}"),
    }
}

#[test]
fn test_invalid_hex_is_malformed() {
    assert!(matches!(
        Message::from_hex("not hex"),
        Err(BrokerError::MalformedMessage { .. })
    ));
    assert!(matches!(
        Message::from_hex("abc"),
        Err(BrokerError::MalformedMessage { .. })
    ));
}

#[test]
fn test_payload_values_from_json() {
    let payload: Payload =
        serde_json::from_str(r#"{"speed": 22, "lat": 61.2, "direction": "up"}"#).unwrap();
    assert_eq!(payload["speed"], Value::Int(22));
    assert_eq!(payload["lat"], Value::Float(61.2));
    assert_eq!(payload["direction"], Value::Text("up".to_string()));
}

#[test]
fn test_queue_fifo_order() {
    let queue = MessageQueue::new();
    for i in 0..5 {
        queue.push(msg("sim.b", i));
    }
    assert_eq!(queue.len(), 5);
    for i in 0..5 {
        assert_eq!(queue.pop().unwrap(), msg("sim.b", i));
    }
    assert!(queue.is_empty());
}

#[test]
fn test_queue_pop_empty_is_none() {
    let queue = MessageQueue::new();
    assert!(queue.pop().is_none());
    assert!(queue.peek().is_none());
}

#[test]
fn test_queue_peek_does_not_remove() {
    let queue = MessageQueue::new();
    queue.push(msg("sim.b", 1));
    assert_eq!(queue.peek().unwrap(), msg("sim.b", 1));
    assert_eq!(queue.len(), 1);
}

#[test]
fn test_queue_purge_older_than() {
    let queue = MessageQueue::new();
    queue.push(msg("sim.b", 1));
    queue.push(msg("sim.b", 2));

    assert_eq!(queue.purge_older_than(Duration::from_secs(60), Instant::now()), 0);
    assert_eq!(queue.len(), 2);

    let later = Instant::now() + Duration::from_secs(61);
    assert_eq!(queue.purge_older_than(Duration::from_secs(60), later), 2);
    assert!(queue.is_empty());
}

#[test]
fn test_queue_concurrent_producers_keep_their_own_order() {
    let queue = Arc::new(MessageQueue::new());
    let producers: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|dest| {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    queue.push(msg(dest, i));
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    let mut last = std::collections::HashMap::new();
    let mut count = 0;
    while let Some(m) = queue.pop() {
        let Value::Int(seq) = m.payload()["seq"] else {
            panic!("seq is not an int");
        };
        if let Some(prev) = last.insert(m.dest().to_string(), seq) {
            assert!(seq > prev, "producer order violated for {}", m.dest());
        }
        count += 1;
    }
    assert_eq!(count, 300);
}

#[test]
fn test_outbound_unknown_destination_is_none() {
    let table = OutboundTable::default();
    assert!(table.get("nowhere").is_none());
    assert!(table.pop("nowhere").is_none());
    assert_eq!(table.depth("nowhere"), 0);
    assert!(table.destinations().is_empty());
}

#[test]
fn test_dispatch_routes_by_destination_in_order() {
    let state = BrokerState::new();
    let sent = [
        msg("sim.b", 1),
        msg("sim.l.1", 2),
        msg("sim.b", 3),
        msg("sim.l.2", 4),
        msg("sim.l.1", 5),
    ];
    for m in &sent {
        state.intake.push(m.clone());
    }

    assert_eq!(dispatch_once(&state), 5);
    assert!(state.intake.is_empty());
    assert_eq!(
        state.outbound.destinations(),
        vec!["sim.b", "sim.l.1", "sim.l.2"]
    );

    for dest in ["sim.b", "sim.l.1", "sim.l.2"] {
        let expected: Vec<_> = sent.iter().filter(|m| m.dest() == dest).cloned().collect();
        let mut actual = Vec::new();
        while let Some(m) = state.outbound.pop(dest) {
            actual.push(m);
        }
        assert_eq!(actual, expected, "wrong contents for {dest}");
    }
}

#[test]
fn test_dispatch_empty_intake_is_noop() {
    let state = BrokerState::new();
    assert_eq!(dispatch_once(&state), 0);
    assert!(state.outbound.destinations().is_empty());
}

#[test]
fn test_drained_queue_stays_in_table() {
    let state = BrokerState::new();
    state.intake.push(msg("sim.b", 1));
    dispatch_once(&state);

    assert!(state.outbound.pop("sim.b").is_some());
    assert!(state.outbound.pop("sim.b").is_none());
    assert_eq!(state.outbound.destinations(), vec!["sim.b"]);
}

#[test]
fn test_purge_expired_across_destinations() {
    let state = BrokerState::new();
    state.intake.push(msg("sim.b", 1));
    state.intake.push(msg("sim.l.1", 2));
    dispatch_once(&state);

    let later = Instant::now() + Duration::from_secs(10);
    assert_eq!(state.outbound.purge_expired(Duration::from_secs(5), later), 2);
    assert_eq!(state.outbound.depth("sim.b"), 0);
    assert_eq!(state.outbound.depth("sim.l.1"), 0);
}
