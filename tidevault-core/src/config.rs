//! Vault configuration
//!
//! All tunables are carried in one explicit record threaded through the
//! engine at construction. The segment size and parity geometry are fixed
//! for the life of a vault; changing them against an existing keyspace
//! makes old blobs undecodable.

use crate::error::{Result, VaultError};

/// Minimum accepted segment size
pub const MIN_SEGMENT_SIZE: usize = 4 * 1024;

/// Default plaintext bytes per segment (512 KiB)
pub const DEFAULT_SEGMENT_SIZE: usize = 512 * 1024;

/// Default parity geometry: N data members per collection, M parity shards
pub const DEFAULT_PARITY_DATA_COUNT: usize = 10;
pub const DEFAULT_PARITY_COUNT: usize = 4;

/// Total bytes of chunk payload allowed in flight during one file upload
pub const UPLOAD_WINDOW_BYTES: usize = 32 * 1024 * 1024;

/// Vault configuration record
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Plaintext size bound per segment, fixed for the life of a vault
    pub segment_size: usize,

    /// Data members per parity collection (N)
    pub parity_data_count: usize,

    /// Parity shards per collection (M)
    pub parity_count: usize,

    /// Replications tried per data/parity upload before UploadExhausted
    pub replication_attempt_count: u32,

    /// Valid replications required per flushed assurance slot
    pub assurance_replication_default_count: u32,

    /// Hard cap on replications probed per assurance slot
    pub assurance_replication_search_count: u32,

    /// Total concurrent transport sessions
    pub total_connections: usize,

    /// Concurrent transport sessions allowed to upload
    pub upload_connections: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            parity_data_count: DEFAULT_PARITY_DATA_COUNT,
            parity_count: DEFAULT_PARITY_COUNT,
            replication_attempt_count: 3,
            assurance_replication_default_count: 2,
            assurance_replication_search_count: 8,
            total_connections: 8,
            upload_connections: 4,
        }
    }
}

impl VaultConfig {
    /// Set the segment size
    pub fn with_segment_size(mut self, bytes: usize) -> Self {
        self.segment_size = bytes;
        self
    }

    /// Set the parity geometry (N data, M parity)
    pub fn with_parity(mut self, data: usize, parity: usize) -> Self {
        self.parity_data_count = data;
        self.parity_count = parity;
        self
    }

    /// Set the connection caps
    pub fn with_connections(mut self, total: usize, upload: usize) -> Self {
        self.total_connections = total;
        self.upload_connections = upload;
        self
    }

    /// Concurrent in-flight chunk uploads for one file
    pub fn chunk_upload_window(&self) -> usize {
        (UPLOAD_WINDOW_BYTES / self.segment_size).max(1)
    }

    /// Validate the record; called once at engine construction
    pub fn validate(&self) -> Result<()> {
        if self.segment_size < MIN_SEGMENT_SIZE {
            return Err(VaultError::Configuration(format!(
                "segment_size must be >= {}",
                MIN_SEGMENT_SIZE
            )));
        }
        if self.parity_data_count == 0 || self.parity_count == 0 {
            return Err(VaultError::Configuration(
                "parity geometry must be nonzero".to_string(),
            ));
        }
        if self.replication_attempt_count == 0 {
            return Err(VaultError::Configuration(
                "replication_attempt_count must be >= 1".to_string(),
            ));
        }
        if self.assurance_replication_search_count < self.assurance_replication_default_count {
            return Err(VaultError::Configuration(
                "assurance search count must be >= default count".to_string(),
            ));
        }
        if self.total_connections == 0 {
            return Err(VaultError::Configuration(
                "total_connections must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
