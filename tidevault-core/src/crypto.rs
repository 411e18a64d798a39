//! Cryptographic primitives for Tidevault
//!
//! Provides:
//! - SHA-256 content hashing (plain-hash of every stored chunk)
//! - AES-256-GCM authenticated encryption with a per-locator key
//! - Argon2id master-key derivation from (storage code, password)
//! - Storage-code generation from the OS CSPRNG

use crate::error::{Result, VaultError};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// AES-256-GCM key size (32 bytes)
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size (12 bytes / 96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Storage code length in bytes (rendered as 64 hex characters)
pub const STORAGE_CODE_SIZE: usize = 32;

/// SHA-256 hash wrapper for content addressing
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Compute the SHA-256 hash of data
    pub fn compute(data: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw hash bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| VaultError::InvalidFormat(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(VaultError::InvalidFormat(format!(
                "invalid hash length: expected 32, got {}",
                bytes.len()
            )));
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }

    /// Verify that data matches this hash
    pub fn verify(&self, data: &[u8]) -> bool {
        self == &Self::compute(data)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// AES-256-GCM segment encryption key, derived per locator
#[derive(Clone)]
pub struct SegmentKey([u8; KEY_SIZE]);

impl SegmentKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SegmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentKey([REDACTED])")
    }
}

impl Drop for SegmentKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

/// Generate a fresh storage code: 32 random bytes as a hex string
pub fn generate_storage_code() -> String {
    use rand::RngCore;
    let mut code = [0u8; STORAGE_CODE_SIZE];
    OsRng.fill_bytes(&mut code);
    hex::encode(code)
}

/// Derive the 32-byte master secret from credentials using Argon2id.
///
/// The storage code bytes act as the salt, so identical credentials yield
/// the identical keyspace on any machine. Parameters are the Argon2 crate
/// defaults, fixed for the life of a vault.
pub fn derive_master_secret(storage_code: &str, password: &str) -> Result<[u8; 32]> {
    let salt = hex::decode(storage_code)
        .map_err(|e| VaultError::Configuration(format!("storage code is not hex: {}", e)))?;
    if salt.len() != STORAGE_CODE_SIZE {
        return Err(VaultError::Configuration(format!(
            "storage code must be {} bytes, got {}",
            STORAGE_CODE_SIZE,
            salt.len()
        )));
    }

    let mut secret = [0u8; 32];
    argon2::Argon2::default()
        .hash_password_into(password.as_bytes(), &salt, &mut secret)
        .map_err(|e| VaultError::Configuration(e.to_string()))?;
    Ok(secret)
}

/// Encrypt data using AES-256-GCM; the random nonce is prepended to the
/// returned ciphertext.
pub fn encrypt(plaintext: &[u8], key: &SegmentKey) -> Result<Vec<u8>> {
    use rand::RngCore;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| VaultError::Encryption(e.to_string()))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt data produced by [`encrypt`].
///
/// Fails with [`VaultError::Decryption`] when the ciphertext is corrupt or
/// keyed for a different locator.
pub fn decrypt(data: &[u8], key: &SegmentKey) -> Result<Vec<u8>> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(VaultError::Decryption(
            "data too short for encrypted content".to_string(),
        ));
    }

    let nonce = Nonce::from_slice(&data[..NONCE_SIZE]);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| VaultError::Decryption(e.to_string()))?;

    cipher
        .decrypt(nonce, &data[NONCE_SIZE..])
        .map_err(|_| VaultError::Decryption("authentication failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(byte: u8) -> SegmentKey {
        SegmentKey::from_bytes([byte; KEY_SIZE])
    }

    #[test]
    fn test_content_hash() {
        let data = b"hello world";
        let hash = ContentHash::compute(data);

        // Same data produces same hash
        assert_eq!(hash, ContentHash::compute(data));

        // Different data produces different hash
        assert_ne!(hash, ContentHash::compute(b"different data"));

        // Known SHA-256 vector
        assert_eq!(
            hash.to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );

        assert!(hash.verify(data));
        assert!(!hash.verify(b"wrong data"));
    }

    #[test]
    fn test_content_hash_hex_roundtrip() {
        let hash = ContentHash::compute(b"roundtrip");
        let recovered = ContentHash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, recovered);

        assert!(ContentHash::from_hex("abcd").is_err());
        assert!(ContentHash::from_hex("zz").is_err());
    }

    #[test]
    fn test_storage_code_format() {
        let code = generate_storage_code();
        assert_eq!(code.len(), STORAGE_CODE_SIZE * 2);
        assert!(hex::decode(&code).is_ok());

        // Two codes from the CSPRNG must differ
        assert_ne!(code, generate_storage_code());
    }

    #[test]
    fn test_master_secret_deterministic() {
        let code = generate_storage_code();
        let a = derive_master_secret(&code, "hunter2").unwrap();
        let b = derive_master_secret(&code, "hunter2").unwrap();
        assert_eq!(a, b);

        let c = derive_master_secret(&code, "other password").unwrap();
        assert_ne!(a, c);

        let other_code = generate_storage_code();
        let d = derive_master_secret(&other_code, "hunter2").unwrap();
        assert_ne!(a, d);
    }

    #[test]
    fn test_master_secret_rejects_bad_code() {
        assert!(derive_master_secret("not hex", "pw").is_err());
        assert!(derive_master_secret("abcd", "pw").is_err());
    }

    #[test]
    fn test_encryption_roundtrip() {
        let key = test_key(7);
        let plaintext = b"secret message";

        let encrypted = encrypt(plaintext, &key).unwrap();
        let decrypted = decrypt(&encrypted, &key).unwrap();

        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
        assert_eq!(encrypted.len(), plaintext.len() + NONCE_SIZE + TAG_SIZE);
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = encrypt(b"secret", &test_key(1)).unwrap();
        let result = decrypt(&encrypted, &test_key(2));
        assert!(matches!(result, Err(VaultError::Decryption(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key(3);
        let mut encrypted = encrypt(b"secret", &key).unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0xFF;

        assert!(matches!(
            decrypt(&encrypted, &key),
            Err(VaultError::Decryption(_))
        ));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = test_key(4);
        assert!(matches!(
            decrypt(&[0u8; 8], &key),
            Err(VaultError::Decryption(_))
        ));
    }
}
