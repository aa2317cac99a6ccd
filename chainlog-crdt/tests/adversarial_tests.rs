//! Operations crafted by a hostile or buggy peer.

use chainlog_crdt::{CrdtDocument, CrdtError, CrdtOperation, OperationPayload, VectorClock};
use chainlog_types::PeerId;
use serde_json::json;
use uuid::Uuid;

fn peer(n: u128) -> PeerId {
    PeerId::from_uuid(Uuid::from_u128(n))
}

fn set(field: &str) -> OperationPayload {
    OperationPayload::Set {
        field: field.to_string(),
        value: json!(1),
    }
}

/// An operation by `actor` whose clock also claims `counters`.
fn forged(actor: PeerId, counters: &[(PeerId, u64)]) -> CrdtOperation {
    let mut op = CrdtDocument::new().prepare(actor, set("x"));
    for &(who, value) in counters {
        op.vector_clock.update(who, value);
    }
    op
}

#[test]
fn increment_saturates() {
    let actor = peer(1);
    let mut clock = VectorClock::new();
    clock.update(actor, u64::MAX);

    assert_eq!(clock.increment(actor), u64::MAX);
    assert_eq!(clock.checked_weight(), Some(u64::MAX));
}

#[test]
fn checked_weight_detects_overflowing_sum() {
    let mut clock = VectorClock::new();
    clock.update(peer(1), u64::MAX / 2 + 1);
    clock.update(peer(2), u64::MAX / 2 + 1);

    assert_eq!(clock.checked_weight(), None);
    assert_eq!(clock.weight(), u64::MAX);
}

#[test]
fn decode_rejects_maxed_counter() {
    let op = forged(peer(1), &[(peer(2), u64::MAX)]);
    let bytes = op.encode().unwrap();

    assert!(matches!(
        CrdtOperation::decode(&bytes),
        Err(CrdtError::ClockExhausted { .. })
    ));
}

#[test]
fn decode_rejects_counters_summing_past_max() {
    let op = forged(peer(1), &[(peer(2), u64::MAX - 1)]);
    let bytes = op.encode().unwrap();

    assert!(matches!(
        CrdtOperation::decode(&bytes),
        Err(CrdtError::ClockExhausted { .. })
    ));
}

#[test]
fn hostile_counter_for_local_actor_blocks_local_edit_without_panicking() {
    let me = peer(1);
    let them = peer(2);
    let mut doc = CrdtDocument::new();
    let hostile = forged(them, &[(me, u64::MAX - 2)]);
    assert!(hostile.validate().is_ok());
    assert!(doc.apply_encoded(&hostile.encode().unwrap()).unwrap());

    let next = doc.prepare(me, set("y"));

    assert!(matches!(
        next.validate(),
        Err(CrdtError::ClockExhausted { .. })
    ));
}
