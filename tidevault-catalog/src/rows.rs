//! Catalog row types
//!
//! Every row carries a local monotonically increasing sequence number. The
//! sequence orders parity collection members and defines the window of rows
//! belonging to one assurance-log aggregation.

use serde::{Deserialize, Serialize};
use tidevault_core::{ContentHash, IndexId, MetaCommand};

/// The authoritative local mirror of one remotely stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssuranceRow {
    pub index_id: IndexId,

    /// Replication that was confirmed stored
    pub replication: u32,

    pub plain_hash: ContentHash,

    /// Compressed length for data blobs, raw shard length for parity blobs
    pub stored_length: u32,

    /// Assurance log slot this row was written to, once flushed or fetched
    pub log_slot: Option<u32>,

    pub seq: u64,
}

/// Membership of one blob in a parity collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParityRow {
    pub collection_id: u64,
    pub plain_hash: ContentHash,
    pub is_parity: bool,
    pub seq: u64,
}

/// A meta command not yet written to the meta log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaCacheRow {
    /// Canonical path the command applies to
    pub path: String,

    /// Position in the path's overall command sequence
    pub index: u32,

    /// Whether this command created the path
    pub is_new: bool,

    pub command: MetaCommand,
}

/// Progress of the current assurance-log aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushState {
    /// First row sequence included in the aggregation
    pub min_seq: u64,

    /// Last row sequence included in the aggregation
    pub max_seq: u64,

    /// Segments of the aggregation already written to their slots
    pub flushed_count: u32,
}
