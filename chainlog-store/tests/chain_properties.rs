//! Property tests for the hash chain.

use chainlog_store::{Corestore, CorestoreConfig, verify_entries};
use chainlog_types::Hash;
use proptest::prelude::*;

fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

proptest! {
    #[test]
    fn length_matches_appends_and_chain_verifies(
        payloads in prop::collection::vec(payload_strategy(), 0..40),
    ) {
        let store = Corestore::new(CorestoreConfig::default());
        let log = store.get("p").unwrap();
        for (i, payload) in payloads.iter().enumerate() {
            prop_assert_eq!(log.append(payload.clone()).unwrap(), i as u64);
        }
        prop_assert_eq!(log.length(), payloads.len() as u64);
        prop_assert!(log.verify_chain(0, log.length()));
    }

    #[test]
    fn any_single_mutation_breaks_the_copy(
        payloads in prop::collection::vec(payload_strategy(), 1..20),
        target in any::<prop::sample::Index>(),
        field in 0u8..3,
    ) {
        let store = Corestore::new(CorestoreConfig::default());
        let log = store.get("p").unwrap();
        for payload in &payloads {
            log.append(payload.clone()).unwrap();
        }
        let mut copy = log.range(0, log.length()).unwrap();
        let i = target.index(copy.len());
        match field {
            0 => copy[i].payload.push(0xff),
            1 => copy[i].previous_hash = Hash::digest(&[b"x", &copy[i].previous_hash.as_bytes()[..]]),
            _ => copy[i].hash = Hash::digest(&[b"y", &copy[i].hash.as_bytes()[..]]),
        }
        prop_assert!(!verify_entries(&copy));
    }
}
