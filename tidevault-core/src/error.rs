//! Error types for Tidevault
//!
//! Provides a unified error type for all vault operations.
//!
//! The enum is `Clone` on purpose: single-flight deduplication hands the
//! leader's error to every attached waiter, so error payloads are plain
//! strings and counters rather than wrapped source errors.

use thiserror::Error;

/// Result type alias for vault operations
pub type Result<T> = std::result::Result<T, VaultError>;

/// Unified error type for Tidevault
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    // ===== Transport Errors =====
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ===== Cryptography Errors =====
    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    // ===== Segment Errors =====
    #[error("Invalid segment format: {0}")]
    InvalidFormat(String),

    #[error("Segment too large: {size} bytes (max: {max})")]
    SegmentTooLarge { size: usize, max: usize },

    // ===== Parity Errors =====
    #[error("Not enough parity: {broken} broken shards, {parity} parity shards")]
    NotEnoughParity { broken: usize, parity: usize },

    #[error("Parity coding error: {0}")]
    ParityCoding(String),

    // ===== Upload Errors =====
    #[error("Upload exhausted: all {attempts} replication locators refused")]
    UploadExhausted { attempts: u32 },

    #[error("Insufficient assurance replication: {valid} valid, {required} required")]
    InsufficientAssuranceReplication { valid: u32, required: u32 },

    // ===== Meta Errors =====
    #[error("Meta entry overwrite: {0}")]
    MetaEntryOverwrite(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // ===== Catalog Errors =====
    #[error("Catalog error: {0}")]
    Catalog(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(String),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl VaultError {
    /// Transport errors always escape optimistic scans; everything else is
    /// treated as a per-replication miss or a broken shard.
    pub fn is_transport(&self) -> bool {
        matches!(self, VaultError::Transport(_))
    }
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        VaultError::Io(err.to_string())
    }
}

impl From<bincode::Error> for VaultError {
    fn from(err: bincode::Error) -> Self {
        VaultError::Serialization(err.to_string())
    }
}

impl From<reed_solomon_erasure::Error> for VaultError {
    fn from(err: reed_solomon_erasure::Error) -> Self {
        VaultError::ParityCoding(err.to_string())
    }
}
