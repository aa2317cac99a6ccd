//! Entries and the hash chain that links them.

use chainlog_types::{Hash, HybridTimestamp};
use serde::{Deserialize, Serialize};

use crate::identity::ChainProof;

/// One append-only record.
///
/// `hash = SHA-256(previous_hash ++ payload ++ index as u64 LE)`. The first
/// entry of every log links to [`Hash::ZERO`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub index: u64,
    #[serde(with = "hex_payload")]
    pub payload: Vec<u8>,
    pub previous_hash: Hash,
    pub hash: Hash,
    pub timestamp: HybridTimestamp,
}

impl Entry {
    /// Builds the entry at `index` that follows `previous_hash`.
    #[must_use]
    pub fn new(
        index: u64,
        payload: Vec<u8>,
        previous_hash: Hash,
        timestamp: HybridTimestamp,
    ) -> Self {
        let hash = Self::compute_hash(&previous_hash, &payload, index);
        Self {
            index,
            payload,
            previous_hash,
            hash,
            timestamp,
        }
    }

    /// The chain hash for the given fields.
    #[must_use]
    pub fn compute_hash(previous_hash: &Hash, payload: &[u8], index: u64) -> Hash {
        Hash::digest(&[previous_hash.as_bytes(), payload, &index.to_le_bytes()])
    }

    /// Returns true if `hash` matches the entry's other fields.
    #[must_use]
    pub fn hash_is_valid(&self) -> bool {
        Self::compute_hash(&self.previous_hash, &self.payload, self.index) == self.hash
    }
}

/// An entry together with its writer's signature, as shipped to peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenEntry {
    pub entry: Entry,
    pub proof: ChainProof,
}

/// Verifies a detached run of entries.
///
/// Checks that indices are contiguous, each hash recomputes, each
/// `previous_hash` links to its predecessor, and that a run starting at
/// index 0 links to the genesis sentinel. An empty run is valid.
#[must_use]
pub fn verify_entries(entries: &[Entry]) -> bool {
    first_invalid(entries).is_none()
}

/// Returns the index of the first entry that breaks the chain, with a reason.
pub(crate) fn first_invalid(entries: &[Entry]) -> Option<(u64, &'static str)> {
    let first = entries.first()?;
    if first.index == 0 && !first.previous_hash.is_zero() {
        return Some((0, "genesis entry does not link to zero hash"));
    }
    let mut previous: Option<&Entry> = None;
    for entry in entries {
        if let Some(prev) = previous {
            if entry.index != prev.index + 1 {
                return Some((entry.index, "non-contiguous index"));
            }
            if entry.previous_hash != prev.hash {
                return Some((entry.index, "previous hash does not link"));
            }
        }
        if !entry.hash_is_valid() {
            return Some((entry.index, "hash mismatch"));
        }
        previous = Some(entry);
    }
    None
}

mod hex_payload {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
