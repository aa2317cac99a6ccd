//! Fixed-size byte identifiers: hash-chain digests, log identity keys and
//! discovery topics.
//!
//! All of them serialize as lowercase hex strings so wire messages and
//! persisted rows stay human-readable.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::Error;

macro_rules! hex_bytes32 {
    ($name:ident) => {
        impl $name {
            /// Wraps raw bytes.
            #[must_use]
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Returns the raw bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Returns the lowercase hex encoding.
            #[must_use]
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parses a 64-character hex string.
            pub fn from_hex(s: &str) -> Result<Self, Error> {
                let bytes = hex::decode(s)?;
                let got = bytes.len();
                let array: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| Error::InvalidLength { expected: 32, got })?;
                Ok(Self(array))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..16])
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

/// A SHA-256 digest.
///
/// Used for entry hashes in the append-only chain. [`Hash::ZERO`] is the
/// `previous_hash` of the first entry in every log.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; 32]);

hex_bytes32!(Hash);

impl Hash {
    /// The all-zero genesis sentinel.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Hashes the concatenation of `parts`.
    #[must_use]
    pub fn digest(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }

    /// Returns true for the genesis sentinel.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl Default for Hash {
    fn default() -> Self {
        Self::ZERO
    }
}

/// The public half of a log's writer keypair.
///
/// A log has exactly one writer; every entry it appends carries a proof
/// that verifies under this key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityKey([u8; 32]);

hex_bytes32!(IdentityKey);

/// An opaque discovery topic, stored as the SHA-256 of its name.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TopicHash([u8; 32]);

hex_bytes32!(TopicHash);

impl TopicHash {
    /// Derives the topic hash for a human-readable topic name.
    #[must_use]
    pub fn from_topic(topic: &str) -> Self {
        let hash = Hash::digest(&[b"chainlog/topic/v1", topic.as_bytes()]);
        Self(*hash.as_bytes())
    }
}
