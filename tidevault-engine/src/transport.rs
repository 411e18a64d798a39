//! Transport interface and bundled drivers
//!
//! The engine only ever talks to the transport through [`Service`]: an
//! append-only, blob-addressable session. `upload` returning `false` means
//! another blob already occupies the locator; transport failures are
//! errors, never "not found".
//!
//! Two drivers ship with the engine: [`MemoryService`] for tests (shared
//! instrumented store) and [`DirService`] for local development (one file
//! per locator).

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tidevault_core::{Locator, Result, VaultError};

/// One blob headed for the transport
#[derive(Debug, Clone)]
pub struct TransportChunk {
    pub locator: Locator,

    /// Random subject line; carries no information by design of the keyspace
    pub subject: String,

    pub payload: Bytes,
}

/// An append-only blob-addressable transport session
#[async_trait]
pub trait Service: Send + Sync {
    /// Whether the session is currently usable
    fn connected(&self) -> bool;

    /// (Re)connect the session; `false` means the transport refused us
    async fn connect(&mut self) -> Result<bool>;

    /// Store a blob. `Ok(true)` if accepted at this locator, `Ok(false)` if
    /// another blob already occupies it.
    async fn upload(&mut self, chunk: TransportChunk) -> Result<bool>;

    /// Fetch the blob at a locator, `None` if nothing is stored there
    async fn get_body(&mut self, locator: &Locator) -> Result<Option<Bytes>>;
}

/// Constructs transport sessions for the connection pool
pub trait ServiceFactory: Send + Sync {
    fn give(&self) -> Box<dyn Service>;
}

// ===== In-memory transport =====

/// Shared blob store behind [`MemoryService`] sessions
///
/// Instrumented with operation counters so tests can assert single-flight
/// behavior, and supports blob deletion to simulate expiry.
pub struct MemoryStore {
    blobs: RwLock<HashMap<[u8; 32], Bytes>>,
    get_body_calls: AtomicU64,
    upload_calls: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            blobs: RwLock::new(HashMap::new()),
            get_body_calls: AtomicU64::new(0),
            upload_calls: AtomicU64::new(0),
        })
    }

    /// Number of `get_body` calls across all sessions
    pub fn get_body_calls(&self) -> u64 {
        self.get_body_calls.load(Ordering::SeqCst)
    }

    /// Number of `upload` calls across all sessions
    pub fn upload_calls(&self) -> u64 {
        self.upload_calls.load(Ordering::SeqCst)
    }

    /// Number of blobs currently stored
    pub fn blob_count(&self) -> usize {
        self.blobs.read().len()
    }

    /// Delete the blob at a locator, simulating transport-side expiry
    pub fn remove_blob(&self, locator: &Locator) -> bool {
        self.blobs.write().remove(locator.as_bytes()).is_some()
    }
}

/// Transport session over a shared [`MemoryStore`]
pub struct MemoryService {
    store: Arc<MemoryStore>,
    connected: bool,
}

impl MemoryService {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        // Sessions start disconnected so the pool exercises its reconnect path
        Self {
            store,
            connected: false,
        }
    }
}

#[async_trait]
impl Service for MemoryService {
    fn connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<bool> {
        self.connected = true;
        Ok(true)
    }

    async fn upload(&mut self, chunk: TransportChunk) -> Result<bool> {
        if !self.connected {
            return Err(VaultError::Transport("session not connected".to_string()));
        }
        self.store.upload_calls.fetch_add(1, Ordering::SeqCst);

        let mut blobs = self.store.blobs.write();
        if blobs.contains_key(chunk.locator.as_bytes()) {
            return Ok(false);
        }
        blobs.insert(*chunk.locator.as_bytes(), chunk.payload);
        Ok(true)
    }

    async fn get_body(&mut self, locator: &Locator) -> Result<Option<Bytes>> {
        if !self.connected {
            return Err(VaultError::Transport("session not connected".to_string()));
        }
        self.store.get_body_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.blobs.read().get(locator.as_bytes()).cloned())
    }
}

/// Factory handing out sessions over one shared store
pub struct MemoryServiceFactory {
    store: Arc<MemoryStore>,
}

impl MemoryServiceFactory {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

impl ServiceFactory for MemoryServiceFactory {
    fn give(&self) -> Box<dyn Service> {
        Box::new(MemoryService::new(self.store.clone()))
    }
}

// ===== Directory-backed transport =====

/// Development transport: one file per locator under a directory
pub struct DirService {
    root: PathBuf,
    connected: bool,
}

impl DirService {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            connected: false,
        }
    }

    fn blob_path(&self, locator: &Locator) -> PathBuf {
        self.root.join(locator.to_hex())
    }
}

#[async_trait]
impl Service for DirService {
    fn connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<bool> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| VaultError::Transport(e.to_string()))?;
        self.connected = true;
        Ok(true)
    }

    async fn upload(&mut self, chunk: TransportChunk) -> Result<bool> {
        let path = self.blob_path(&chunk.locator);
        // create_new gives write-once semantics per locator
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        match options.open(&path).await {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(&chunk.payload)
                    .await
                    .map_err(|e| VaultError::Transport(e.to_string()))?;
                file.flush()
                    .await
                    .map_err(|e| VaultError::Transport(e.to_string()))?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(VaultError::Transport(e.to_string())),
        }
    }

    async fn get_body(&mut self, locator: &Locator) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.blob_path(locator)).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VaultError::Transport(e.to_string())),
        }
    }
}

/// Factory for [`DirService`] sessions over one directory
pub struct DirServiceFactory {
    root: PathBuf,
}

impl DirServiceFactory {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl ServiceFactory for DirServiceFactory {
    fn give(&self) -> Box<dyn Service> {
        Box::new(DirService::new(self.root.clone()))
    }
}
