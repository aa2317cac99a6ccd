use chainlog_store::{Corestore, CorestoreConfig, Entry, StorageError, verify_entries};
use chainlog_types::Hash;
use pretty_assertions::assert_eq;

fn corestore() -> Corestore {
    Corestore::new(CorestoreConfig::default())
}

#[test]
fn fresh_log_is_empty() {
    let store = corestore();
    let log = store.get("notes").unwrap();
    assert_eq!(log.length(), 0);
    assert!(log.is_empty());
    assert!(log.is_writable());
    assert_eq!(log.tail_hash().unwrap(), Hash::ZERO);
    assert!(log.verify_chain(0, 0));
}

#[test]
fn append_three_and_verify() {
    let store = corestore();
    let log = store.get("letters").unwrap();

    assert_eq!(log.append("a").unwrap(), 0);
    assert_eq!(log.append("b").unwrap(), 1);
    assert_eq!(log.append("c").unwrap(), 2);

    assert_eq!(log.length(), 3);
    assert_eq!(log.get(1).unwrap().payload, b"b");
    assert!(log.verify_chain(0, 3));

    let mut copy = log.range(0, 3).unwrap();
    assert!(verify_entries(&copy));
    copy[1].hash = Hash::digest(&[b"forged"]);
    assert!(!verify_entries(&copy));
}

#[test]
fn entries_link_to_predecessor() {
    let store = corestore();
    let log = store.get("chain").unwrap();
    log.append("first").unwrap();
    log.append("second").unwrap();

    let first = log.get(0).unwrap();
    let second = log.get(1).unwrap();
    assert_eq!(first.previous_hash, Hash::ZERO);
    assert_eq!(second.previous_hash, first.hash);
    assert_eq!(
        second.hash,
        Entry::compute_hash(&first.hash, b"second", 1)
    );
    assert_eq!(log.tail_hash().unwrap(), second.hash);
}

#[test]
fn timestamps_strictly_increase() {
    let store = corestore();
    let log = store.get("clock").unwrap();
    for i in 0..50u32 {
        log.append(i.to_le_bytes().to_vec()).unwrap();
    }
    let entries = log.range(0, 50).unwrap();
    for pair in entries.windows(2) {
        assert!(pair[0].timestamp < pair[1].timestamp);
    }
}

#[test]
fn get_out_of_range() {
    let store = corestore();
    let log = store.get("short").unwrap();
    log.append("only").unwrap();

    let err = log.get(1).unwrap_err();
    assert!(matches!(err, StorageError::OutOfRange { index: 1, length: 1 }));
}

#[test]
fn verify_chain_rejects_bad_ranges() {
    let store = corestore();
    let log = store.get("ranges").unwrap();
    for p in ["a", "b", "c"] {
        log.append(p).unwrap();
    }
    assert!(log.verify_chain(1, 3));
    assert!(log.verify_chain(2, 2));
    assert!(!log.verify_chain(2, 1));
    assert!(!log.verify_chain(0, 4));
}

#[test]
fn capacity_exceeded_leaves_length_unchanged() {
    let store = Corestore::new(CorestoreConfig {
        max_log_length: Some(2),
    });
    let log = store.get("bounded").unwrap();
    log.append("1").unwrap();
    log.append("2").unwrap();

    let err = log.append("3").unwrap_err();
    assert!(matches!(err, StorageError::CapacityExceeded { max: 2 }));
    assert_eq!(log.length(), 2);
    assert!(log.verify_chain(0, 2));
}

#[test]
fn proven_entries_verify_under_identity() {
    let store = corestore();
    let log = store.get("signed").unwrap();
    log.append("payload").unwrap();

    let proven = log.get_proven(0).unwrap();
    assert!(proven.proof.verify(&log.identity(), &proven.entry.hash));
    assert!(!proven.proof.verify(&log.identity(), &Hash::digest(&[b"other"])));
}

#[test]
fn replica_accepts_verified_batch() {
    let writer = corestore();
    let source = writer.get("shared").unwrap();
    for i in 0..5u8 {
        source.append(vec![i]).unwrap();
    }

    let reader = corestore();
    let replica = reader.get_replica("shared", source.identity()).unwrap();
    assert!(!replica.is_writable());

    let batch = source.proven_range(0, 3).unwrap();
    assert_eq!(replica.append_verified(&batch).unwrap(), 0..3);
    let batch = source.proven_range(3, 5).unwrap();
    assert_eq!(replica.append_verified(&batch).unwrap(), 3..5);

    assert_eq!(replica.range(0, 5).unwrap(), source.range(0, 5).unwrap());
    assert!(replica.verify_chain(0, 5));
}

#[test]
fn replica_rejects_local_append() {
    let writer = corestore();
    let source = writer.get("shared").unwrap();
    let reader = corestore();
    let replica = reader.get_replica("shared", source.identity()).unwrap();

    assert!(matches!(
        replica.append("nope").unwrap_err(),
        StorageError::ReadOnly(_)
    ));
}

#[test]
fn replica_rejects_tampered_payload() {
    let writer = corestore();
    let source = writer.get("shared").unwrap();
    for p in ["a", "b", "c"] {
        source.append(p).unwrap();
    }
    let reader = corestore();
    let replica = reader.get_replica("shared", source.identity()).unwrap();

    let mut batch = source.proven_range(0, 3).unwrap();
    batch[1].entry.payload = b"B".to_vec();

    let err = replica.append_verified(&batch).unwrap_err();
    assert!(matches!(err, StorageError::Corruption { index: 1, .. }));
    assert_eq!(replica.length(), 0);
}

#[test]
fn replica_rejects_rehashed_forgery() {
    let writer = corestore();
    let source = writer.get("shared").unwrap();
    source.append("genuine").unwrap();
    let reader = corestore();
    let replica = reader.get_replica("shared", source.identity()).unwrap();

    // A consistent chain built by someone without the writer's key.
    let mut batch = source.proven_range(0, 1).unwrap();
    let forged = Entry::new(0, b"forged".to_vec(), Hash::ZERO, batch[0].entry.timestamp);
    batch[0].entry = forged;

    assert!(matches!(
        replica.append_verified(&batch).unwrap_err(),
        StorageError::Corruption { index: 0, .. }
    ));
    assert_eq!(replica.length(), 0);
}

#[test]
fn replica_rejects_gap() {
    let writer = corestore();
    let source = writer.get("shared").unwrap();
    for p in ["a", "b", "c"] {
        source.append(p).unwrap();
    }
    let reader = corestore();
    let replica = reader.get_replica("shared", source.identity()).unwrap();

    let batch = source.proven_range(1, 3).unwrap();
    assert!(matches!(
        replica.append_verified(&batch).unwrap_err(),
        StorageError::Corruption { index: 1, .. }
    ));
}

#[test]
fn overlapping_batch_is_idempotent() {
    let writer = corestore();
    let source = writer.get("shared").unwrap();
    for p in ["a", "b", "c", "d"] {
        source.append(p).unwrap();
    }
    let reader = corestore();
    let replica = reader.get_replica("shared", source.identity()).unwrap();

    replica
        .append_verified(&source.proven_range(0, 2).unwrap())
        .unwrap();
    assert_eq!(
        replica
            .append_verified(&source.proven_range(0, 4).unwrap())
            .unwrap(),
        2..4
    );
    assert!(
        replica
            .append_verified(&source.proven_range(0, 4).unwrap())
            .unwrap()
            .is_empty()
    );
    assert_eq!(replica.length(), 4);
}

#[test]
fn closed_log_rejects_access() {
    let store = corestore();
    let log = store.get("doomed").unwrap();
    log.append("x").unwrap();
    store.close();

    assert!(log.is_closed());
    assert!(matches!(log.append("y").unwrap_err(), StorageError::Closed));
    assert!(matches!(log.get(0).unwrap_err(), StorageError::Closed));
    assert!(!log.verify_chain(0, 1));
}

#[test]
fn concurrent_readers_see_consistent_prefix() {
    use std::sync::Arc;
    use std::thread;

    let store = corestore();
    let log = store.get("busy").unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let log = Arc::clone(&log);
            thread::spawn(move || {
                for _ in 0..200 {
                    let length = log.length();
                    assert!(log.verify_chain(0, length));
                    if length > 0 {
                        assert!(log.get(length - 1).is_ok());
                    }
                }
            })
        })
        .collect();

    for i in 0..200u32 {
        log.append(i.to_be_bytes().to_vec()).unwrap();
    }
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(log.length(), 200);
}
