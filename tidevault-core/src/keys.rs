//! Deterministic keyspace: master key, index identifiers, locators
//!
//! Every identifier the vault ever uses is a keyed BLAKE3 hash of a
//! domain-separated message under the master key. Clients that know the
//! credentials can therefore blind-probe the transport for the next
//! assurance slot without any remote metadata.
//!
//! Derivation domains:
//! - `tidevault/v1/assurance`   — assurance log slot i
//! - `tidevault/v1/raw`         — content-addressed data or parity blob
//! - `tidevault/v1/meta-file`   — i-th meta record of a file path
//! - `tidevault/v1/meta-folder` — i-th meta record of a folder path
//! - `tidevault/v1/locator`     — transport address of (IndexId, replication)
//! - `tidevault/v1/segment-key` — per-locator encryption key
//! - `tidevault/v1/public`      — public fingerprint of the vault

use crate::crypto::{derive_master_secret, SegmentKey};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

const DOMAIN_ASSURANCE: &[u8] = b"tidevault/v1/assurance";
const DOMAIN_RAW: &[u8] = b"tidevault/v1/raw";
const DOMAIN_META_FILE: &[u8] = b"tidevault/v1/meta-file";
const DOMAIN_META_FOLDER: &[u8] = b"tidevault/v1/meta-folder";
const DOMAIN_LOCATOR: &[u8] = b"tidevault/v1/locator";
const DOMAIN_SEGMENT_KEY: &[u8] = b"tidevault/v1/segment-key";
const DOMAIN_PUBLIC: &[u8] = b"tidevault/v1/public";

/// The vault master key, derived from (storage code, password)
#[derive(Clone)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    /// Derive the master key from credentials
    pub fn from_credentials(storage_code: &str, password: &str) -> Result<Self> {
        Ok(Self(derive_master_secret(storage_code, password)?))
    }

    fn keyed(&self, domain: &[u8], payload: &[u8]) -> [u8; 32] {
        let mut message = Vec::with_capacity(domain.len() + 1 + payload.len());
        message.extend_from_slice(domain);
        message.push(0x00);
        message.extend_from_slice(payload);
        *blake3::keyed_hash(&self.0, &message).as_bytes()
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([REDACTED])")
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

/// Opaque per-blob index identifier
///
/// Stable across sessions and machines given the same credentials.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexId([u8; 32]);

impl IndexId {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string (cache keys, logs)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IndexId({})", &self.to_hex()[..16])
    }
}

/// Transport-level address of one blob copy
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locator([u8; 32]);

impl Locator {
    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The transport-visible address string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Locator({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Deterministic identifier generator bound to one master key
#[derive(Clone, Debug)]
pub struct Generator {
    master: MasterKey,
}

impl Generator {
    /// Build a generator from credentials
    pub fn from_credentials(storage_code: &str, password: &str) -> Result<Self> {
        Ok(Self {
            master: MasterKey::from_credentials(storage_code, password)?,
        })
    }

    /// Build a generator from an existing master key
    pub fn new(master: MasterKey) -> Self {
        Self { master }
    }

    /// Identifier of the i-th assurance log slot
    pub fn assurance_id(&self, slot: u32) -> IndexId {
        IndexId(self.master.keyed(DOMAIN_ASSURANCE, &slot.to_le_bytes()))
    }

    /// Identifier of a content-addressed data or parity blob
    pub fn raw_or_parity_id(&self, hash: &crate::crypto::ContentHash) -> IndexId {
        IndexId(self.master.keyed(DOMAIN_RAW, hash.as_bytes()))
    }

    /// Identifier of the i-th meta record of a file path
    pub fn meta_file_id(&self, index: u32, path: &str) -> IndexId {
        IndexId(self.master.keyed(DOMAIN_META_FILE, &meta_payload(index, path)))
    }

    /// Identifier of the i-th meta record of a folder path
    pub fn meta_folder_id(&self, index: u32, path: &str) -> IndexId {
        IndexId(
            self.master
                .keyed(DOMAIN_META_FOLDER, &meta_payload(index, path)),
        )
    }

    /// Transport locator for one replication of an index identifier
    pub fn derive_locator(&self, id: &IndexId, replication: u32) -> Locator {
        let mut payload = Vec::with_capacity(32 + 4);
        payload.extend_from_slice(id.as_bytes());
        payload.extend_from_slice(&replication.to_le_bytes());
        Locator(self.master.keyed(DOMAIN_LOCATOR, &payload))
    }

    /// Per-locator segment encryption key
    pub fn segment_key(&self, locator: &Locator) -> SegmentKey {
        SegmentKey::from_bytes(self.master.keyed(DOMAIN_SEGMENT_KEY, locator.as_bytes()))
    }

    /// Deterministic public fingerprint of the vault (names the state dir)
    pub fn public_hash(&self) -> String {
        hex::encode(self.master.keyed(DOMAIN_PUBLIC, &[]))
    }
}

fn meta_payload(index: u32, path: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + path.len());
    payload.extend_from_slice(&index.to_le_bytes());
    payload.extend_from_slice(path.as_bytes());
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{generate_storage_code, ContentHash};

    fn generator() -> Generator {
        Generator::from_credentials(
            "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff",
            "correct horse battery staple",
        )
        .unwrap()
    }

    #[test]
    fn test_identifiers_deterministic() {
        let a = generator();
        let b = generator();

        assert_eq!(a.assurance_id(0), b.assurance_id(0));
        assert_eq!(a.assurance_id(17), b.assurance_id(17));
        assert_eq!(a.public_hash(), b.public_hash());

        let hash = ContentHash::compute(b"chunk");
        assert_eq!(a.raw_or_parity_id(&hash), b.raw_or_parity_id(&hash));
        assert_eq!(a.meta_file_id(3, "x/y"), b.meta_file_id(3, "x/y"));
    }

    #[test]
    fn test_identifiers_distinct_across_roles() {
        let g = generator();
        let hash = ContentHash::compute(b"chunk");

        // Same inputs under different semantic tags must not collide
        assert_ne!(g.meta_file_id(0, "a"), g.meta_folder_id(0, "a"));
        assert_ne!(g.assurance_id(0), g.meta_file_id(0, ""));
        assert_ne!(
            g.raw_or_parity_id(&hash).as_bytes(),
            g.assurance_id(0).as_bytes()
        );
    }

    #[test]
    fn test_slots_distinct() {
        let g = generator();
        assert_ne!(g.assurance_id(0), g.assurance_id(1));
        assert_ne!(g.meta_file_id(0, "a"), g.meta_file_id(1, "a"));
        assert_ne!(g.meta_file_id(0, "a"), g.meta_file_id(0, "b"));
    }

    #[test]
    fn test_replications_address_independent_copies() {
        let g = generator();
        let id = g.assurance_id(0);

        let l0 = g.derive_locator(&id, 0);
        let l1 = g.derive_locator(&id, 1);
        assert_ne!(l0.as_bytes(), l1.as_bytes());

        // Different locators get unrelated keys
        assert_ne!(g.segment_key(&l0).as_bytes(), g.segment_key(&l1).as_bytes());
    }

    #[test]
    fn test_different_credentials_different_keyspace() {
        let g = generator();
        let other =
            Generator::from_credentials(&generate_storage_code(), "correct horse battery staple")
                .unwrap();

        assert_ne!(g.assurance_id(0), other.assurance_id(0));
        assert_ne!(g.public_hash(), other.public_hash());
    }
}
