//! Tidevault Engine
//!
//! Orchestrates the deterministic vault: chunk upload and download over the
//! blob transport, parity protection, assurance-log flushing and the
//! virtual filesystem meta path.

pub mod cache;
pub mod engine;
pub mod meta;
pub mod pool;
pub mod singleflight;
pub mod transport;

pub use engine::Engine;
pub use meta::{BlockRef, PathMeta};
pub use pool::ConnectionPool;
pub use transport::{
    DirService, DirServiceFactory, MemoryService, MemoryServiceFactory, MemoryStore, Service,
    ServiceFactory, TransportChunk,
};
