//! Tidevault Core Library
//!
//! Core primitives for the Tidevault deterministic storage engine.
//! This crate provides:
//! - Credential handling and the deterministic identifier generator
//! - Authenticated segment encryption with per-locator keys
//! - The segment codec and wire-stable record formats
//! - Reed-Solomon parity over segment payloads
//! - The vault configuration record and unified error handling

pub mod config;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod parity;
pub mod segment;

pub use config::VaultConfig;
pub use crypto::{generate_storage_code, ContentHash, SegmentKey};
pub use error::{Result, VaultError};
pub use keys::{Generator, IndexId, Locator, MasterKey};
pub use parity::{create_parity, repair_with_parity, ShardInfo};
pub use segment::{
    AssuranceSegment, MetaCommand, MetaKind, MetaSegment, ParityRelationEntry, SegmentCodec,
    SegmentEntry,
};
