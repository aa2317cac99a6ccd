//! Ed25519 writer identities and per-entry chain proofs.
//!
//! A writable log signs each entry hash with its signing key; replicas
//! check those signatures against the log's [`IdentityKey`] before
//! accepting pulled entries.

use chainlog_types::{Hash, IdentityKey};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

const LOG_KEY_DOMAIN: &[u8] = b"chainlog/log-key/v1";

/// Signature of a log's writer over one entry hash.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ChainProof([u8; 64]);

impl ChainProof {
    /// Wraps a raw 64-byte signature.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Returns the raw signature bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Returns true if this proof was produced for `hash` by the holder of
    /// `identity`.
    #[must_use]
    pub fn verify(&self, identity: &IdentityKey, hash: &Hash) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(identity.as_bytes()) else {
            return false;
        };
        key.verify(hash.as_bytes(), &Signature::from_bytes(&self.0))
            .is_ok()
    }
}

impl fmt::Debug for ChainProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainProof({})", &hex::encode(self.0)[..16])
    }
}

impl Serialize for ChainProof {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for ChainProof {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let len = bytes.len();
        let array: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::invalid_length(len, &"64 bytes"))?;
        Ok(Self(array))
    }
}

/// The signing half of a writable log.
pub struct LogSigner(SigningKey);

impl LogSigner {
    /// Derives the signer for log `name` under a corestore seed.
    #[must_use]
    pub fn derive(seed: &[u8; 32], name: &str) -> Self {
        let secret = Hash::digest(&[LOG_KEY_DOMAIN, seed, name.as_bytes()]);
        Self(SigningKey::from_bytes(secret.as_bytes()))
    }

    /// Generates a signer from fresh randomness.
    #[must_use]
    pub fn generate() -> Self {
        Self(SigningKey::generate(&mut OsRng))
    }

    /// The public key replicas verify against.
    #[must_use]
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::from_bytes(self.0.verifying_key().to_bytes())
    }

    /// Signs an entry hash.
    #[must_use]
    pub fn sign(&self, hash: &Hash) -> ChainProof {
        ChainProof(self.0.sign(hash.as_bytes()).to_bytes())
    }
}

impl fmt::Debug for LogSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LogSigner").field(&self.identity()).finish()
    }
}

/// Generates a fresh 32-byte corestore seed.
#[must_use]
pub fn random_seed() -> [u8; 32] {
    let mut seed = [0u8; 32];
    OsRng.fill_bytes(&mut seed);
    seed
}
