use chainlog_crdt::{CrdtError, CrdtOperation, OperationPayload, VectorClock};
use chainlog_store::{Corestore, CorestoreConfig, Entry};
use chainlog_sync::{
    Channel, CrdtBridge, ReplicationConfig, ReplicationManager, ReplicationObserver, RetryPolicy,
    SyncError,
};
use chainlog_types::{Hash, HybridTimestamp, PeerId};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

struct Peer {
    id: PeerId,
    store: Arc<Corestore>,
    manager: Arc<ReplicationManager>,
    bridge: Arc<CrdtBridge>,
}

fn peer(doc_log: &str) -> Peer {
    let id = PeerId::new();
    let store = Arc::new(Corestore::new(CorestoreConfig::default()));
    let config = ReplicationConfig {
        retry: RetryPolicy::none(),
        ..ReplicationConfig::default()
    };
    let manager = Arc::new(ReplicationManager::new(id, Arc::clone(&store), config));
    let bridge = Arc::new(CrdtBridge::open(id, store.get(doc_log).unwrap()).unwrap());
    manager.add_observer(bridge.clone());
    Peer {
        id,
        store,
        manager,
        bridge,
    }
}

fn link(requester: &Peer, responder: &Peer) {
    let (near, far) = Channel::local_pair();
    requester
        .manager
        .add_peer_with_channel(responder.id, "local", near);
    let manager = Arc::clone(&responder.manager);
    tokio::spawn(async move {
        let _ = manager.serve(far).await;
    });
}

fn set_op(actor: PeerId, field: &str, value: serde_json::Value) -> CrdtOperation {
    CrdtOperation::new(
        actor,
        &VectorClock::new(),
        OperationPayload::Set {
            field: field.to_string(),
            value,
        },
    )
}

fn as_entry(index: u64, op: &CrdtOperation) -> Entry {
    Entry::new(index, op.encode().unwrap(), Hash::ZERO, HybridTimestamp::now())
}

#[test]
fn local_edits_are_logged_and_applied() {
    let p = peer("doc");

    p.bridge.set("title", json!("draft")).unwrap();
    p.bridge.set("pages", json!(3)).unwrap();
    p.bridge.delete("pages").unwrap();

    assert_eq!(p.bridge.log().length(), 3);
    assert_eq!(p.bridge.get("title"), Some(json!("draft")));
    assert_eq!(p.bridge.get("pages"), None);
    assert_eq!(p.bridge.snapshot().to_json(), json!({ "title": "draft" }));
}

#[test]
fn submit_appends_before_applying() {
    let p = peer("doc");
    let op = set_op(p.id, "k", json!("v"));

    assert_eq!(p.bridge.submit(&op).unwrap(), 0);
    assert_eq!(p.bridge.submit(&op).unwrap(), 1);

    let snapshot = p.bridge.snapshot();
    assert_eq!(snapshot.applied_count(), 1);
    assert!(snapshot.has_applied(&op.op_id));
}

#[test]
fn reopening_replays_the_log() {
    let p = peer("doc");
    p.bridge.set("a", json!(1)).unwrap();
    p.bridge.set("b", json!([1, 2])).unwrap();

    let reopened = CrdtBridge::open(p.id, p.store.get("doc").unwrap()).unwrap();

    assert_eq!(reopened.snapshot(), p.bridge.snapshot());
}

#[test]
fn edits_on_a_replica_fail() {
    let p = peer("doc");
    let other = Corestore::new(CorestoreConfig::default());
    let identity = other.writer_identity("theirs");
    let replica = p.store.get_replica("theirs", identity).unwrap();
    let bridge = CrdtBridge::open(p.id, replica).unwrap();

    assert!(bridge.set("x", json!(1)).is_err());
    assert!(bridge.snapshot().is_empty());
}

#[test]
fn opposite_delivery_orders_converge() {
    let x = PeerId::new();
    let y = PeerId::new();
    let first = peer("left");
    let second = peer("right");
    let from_x = as_entry(0, &set_op(x, "color", json!("red")));
    let from_y = as_entry(0, &set_op(y, "color", json!("blue")));

    first.bridge.on_replicated(&from_x).unwrap();
    first.bridge.on_replicated(&from_y).unwrap();
    second.bridge.on_replicated(&from_y).unwrap();
    second.bridge.on_replicated(&from_x).unwrap();
    assert!(!second.bridge.on_replicated(&from_x).unwrap());

    let left = first.bridge.snapshot();
    let right = second.bridge.snapshot();
    assert_eq!(left.get("color"), right.get("color"));
    assert_eq!(left.to_bytes().unwrap(), right.to_bytes().unwrap());
}

#[test]
fn undecodable_entries_are_reported() {
    let p = peer("doc");
    let junk = Entry::new(0, b"not json".to_vec(), Hash::ZERO, HybridTimestamp::now());

    assert!(p.bridge.on_replicated(&junk).is_err());
    // The observer path swallows it.
    ReplicationObserver::on_replicated(p.bridge.as_ref(), "doc", &junk);
    assert!(p.bridge.snapshot().is_empty());
}

#[test]
fn replicated_maxed_clock_is_refused() {
    let p = peer("doc");
    let mut op = set_op(PeerId::new(), "k", json!(1));
    op.vector_clock.update(p.id, u64::MAX);

    assert!(matches!(
        p.bridge.on_replicated(&as_entry(0, &op)),
        Err(SyncError::Crdt(CrdtError::ClockExhausted { .. }))
    ));
    p.bridge.set("title", json!("still editable")).unwrap();
    assert_eq!(p.bridge.get("title"), Some(json!("still editable")));
}

#[test]
fn exhausted_local_clock_fails_edit_cleanly() {
    let p = peer("doc");
    let mut op = set_op(PeerId::new(), "k", json!(1));
    op.vector_clock.update(p.id, u64::MAX - 2);
    assert!(p.bridge.on_replicated(&as_entry(0, &op)).unwrap());

    assert!(matches!(
        p.bridge.set("title", json!("x")),
        Err(SyncError::Crdt(CrdtError::ClockExhausted { .. }))
    ));
    assert_eq!(p.bridge.log().length(), 0);
    assert_eq!(p.bridge.get("title"), None);
}

#[test]
fn unwatched_logs_are_ignored() {
    let p = peer("doc");
    let entry = as_entry(0, &set_op(PeerId::new(), "k", json!(1)));

    ReplicationObserver::on_replicated(p.bridge.as_ref(), "elsewhere", &entry);
    assert!(p.bridge.snapshot().is_empty());

    p.bridge.watch("elsewhere");
    assert!(p.bridge.is_watching("elsewhere"));
    ReplicationObserver::on_replicated(p.bridge.as_ref(), "elsewhere", &entry);
    assert_eq!(p.bridge.get("k"), Some(json!(1)));
}

#[tokio::test]
async fn concurrent_edits_converge_across_peers() {
    let a = peer("doc/a");
    let b = peer("doc/b");
    a.bridge.watch("doc/b");
    b.bridge.watch("doc/a");
    link(&a, &b);
    link(&b, &a);

    a.bridge.set("title", json!("from a")).unwrap();
    a.bridge.set("owner", json!("a")).unwrap();
    b.bridge.set("title", json!("from b")).unwrap();
    b.bridge.delete("owner").unwrap();

    a.manager.sync(b.id, "doc/b").await.unwrap();
    b.manager.sync(a.id, "doc/a").await.unwrap();

    let left = a.bridge.snapshot();
    let right = b.bridge.snapshot();
    assert_eq!(left, right);
    assert_eq!(left.to_bytes().unwrap(), right.to_bytes().unwrap());
    assert_eq!(left.applied_count(), 4);

    // An edit made after seeing the other side wins everywhere.
    a.bridge.set("title", json!("final")).unwrap();
    b.manager.sync(a.id, "doc/a").await.unwrap();
    assert_eq!(b.bridge.get("title"), Some(json!("final")));
}

#[tokio::test]
async fn attach_folds_an_existing_replica() {
    let a = peer("doc/a");
    let b = peer("doc/b");
    link(&b, &a);
    a.bridge.set("k", json!("v")).unwrap();
    a.bridge.set("n", json!(2)).unwrap();

    // b replicates before it starts watching.
    b.manager.sync(a.id, "doc/a").await.unwrap();
    assert!(b.bridge.snapshot().is_empty());

    let replica = b.store.find("doc/a").unwrap();
    assert_eq!(b.bridge.attach(&replica).unwrap(), 2);
    assert_eq!(b.bridge.get("k"), Some(json!("v")));
    assert_eq!(b.bridge.attach(&replica).unwrap(), 0);
}
