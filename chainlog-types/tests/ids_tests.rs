use chainlog_types::PeerId;
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;

#[test]
fn peer_id_new_is_unique() {
    let a = PeerId::new();
    let b = PeerId::new();
    assert_ne!(a, b);
}

#[test]
fn peer_id_from_uuid_roundtrip() {
    let uuid = uuid::Uuid::now_v7();
    let id = PeerId::from_uuid(uuid);
    assert_eq!(id.as_uuid(), uuid);
}

#[test]
fn peer_id_display_and_parse() {
    let id = PeerId::new();
    let parsed = PeerId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn peer_id_from_str_invalid() {
    assert!(PeerId::from_str("garbage").is_err());
    assert!(PeerId::parse("not-a-uuid").is_err());
}

#[test]
fn peer_id_hash_and_eq() {
    let id = PeerId::new();
    let mut set = HashSet::new();
    set.insert(id);
    set.insert(id);
    assert_eq!(set.len(), 1);
}

#[test]
fn peer_ids_are_totally_ordered() {
    let low = PeerId::from_uuid(uuid::Uuid::from_u128(1));
    let high = PeerId::from_uuid(uuid::Uuid::from_u128(2));
    assert!(low < high);

    let set: BTreeSet<_> = [high, low].into_iter().collect();
    assert_eq!(set.into_iter().collect::<Vec<_>>(), vec![low, high]);
}

#[test]
fn peer_id_serializes_transparently() {
    let id = PeerId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
}
