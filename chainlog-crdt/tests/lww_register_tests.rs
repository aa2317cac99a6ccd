use chainlog_crdt::{LWWRegister, OpId, WriteStamp};
use chainlog_types::PeerId;
use uuid::Uuid;

fn stamp(weight: u64, actor: PeerId) -> WriteStamp {
    WriteStamp {
        weight,
        actor,
        op_id: OpId::new(),
    }
}

fn peer(n: u128) -> PeerId {
    PeerId::from_uuid(Uuid::from_u128(n))
}

#[test]
fn new_register_holds_value() {
    let s = stamp(1, peer(1));
    let reg = LWWRegister::new("hello", s);
    assert_eq!(*reg.value(), "hello");
    assert_eq!(reg.stamp(), s);
}

#[test]
fn heavier_write_wins() {
    let mut reg = LWWRegister::new(1, stamp(1, peer(9)));
    assert!(reg.set(2, stamp(2, peer(1))));
    assert_eq!(*reg.value(), 2);
}

#[test]
fn lighter_write_loses() {
    let mut reg = LWWRegister::new(1, stamp(5, peer(1)));
    assert!(!reg.set(2, stamp(4, peer(9))));
    assert_eq!(*reg.value(), 1);
}

#[test]
fn equal_weight_breaks_tie_by_actor() {
    let low = LWWRegister::new("low", stamp(3, peer(1)));
    let high = LWWRegister::new("high", stamp(3, peer(2)));

    assert_eq!(*low.merged(&high).value(), "high");
    assert_eq!(*high.merged(&low).value(), "high");
}

#[test]
fn replaying_same_write_is_noop() {
    let s = stamp(2, peer(1));
    let mut reg = LWWRegister::new("a", s);
    assert!(!reg.set("a", s));
}

#[test]
fn merge_is_idempotent() {
    let reg = LWWRegister::new(7, stamp(1, peer(1)));
    assert_eq!(reg.merged(&reg), reg);
}

#[test]
fn merge_is_associative() {
    let a = LWWRegister::new('a', stamp(1, peer(3)));
    let b = LWWRegister::new('b', stamp(2, peer(1)));
    let c = LWWRegister::new('c', stamp(2, peer(2)));

    let left = a.merged(&b).merged(&c);
    let right = a.merged(&b.merged(&c));
    assert_eq!(left, right);
    assert_eq!(*left.value(), 'c');
}

#[test]
fn stamps_order_by_weight_then_actor_then_op() {
    let actor = peer(1);
    let first = WriteStamp {
        weight: 1,
        actor,
        op_id: OpId::from_uuid(Uuid::from_u128(1)),
    };
    let second = WriteStamp {
        op_id: OpId::from_uuid(Uuid::from_u128(2)),
        ..first
    };
    let third = WriteStamp {
        actor: peer(2),
        ..first
    };
    assert!(first < second);
    assert!(second < third);
    assert!(third < WriteStamp { weight: 2, ..first });
}
