//! Tidevault Catalog
//!
//! Persistent local index of a vault: which blobs are known to exist
//! remotely, how they group into parity collections, which meta commands
//! are still waiting to reach the meta log, and how far the assurance log
//! has been flushed and fetched.

pub mod catalog;
pub mod rows;

pub use catalog::{Catalog, MetaFlush};
pub use rows::{AssuranceRow, FlushState, MetaCacheRow, ParityRow};
