//! Bounded transport session pool
//!
//! Two counting semaphores enforce `total >= upload >= 1`: an upload holds
//! one permit of each, a download holds only a total permit, so uploads can
//! never starve downloads past `total - upload` concurrent slots.
//!
//! Sessions are kept in a free list and reconnected before use; the guard
//! returns its session on drop regardless of outcome.

use crate::transport::{Service, ServiceFactory};
use parking_lot::Mutex;
use std::sync::Arc;
use tidevault_core::{Result, VaultError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

struct PoolInner {
    factory: Box<dyn ServiceFactory>,
    free: Mutex<Vec<Box<dyn Service>>>,
    total: Arc<Semaphore>,
    upload: Arc<Semaphore>,
}

/// Shared pool of transport sessions
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool. The upload cap is honored as supplied, clamped into
    /// `1..=total`.
    pub fn new(factory: Box<dyn ServiceFactory>, total: usize, upload: usize) -> Self {
        let total = total.max(1);
        let upload = upload.clamp(1, total);
        Self {
            inner: Arc::new(PoolInner {
                factory,
                free: Mutex::new(Vec::new()),
                total: Arc::new(Semaphore::new(total)),
                upload: Arc::new(Semaphore::new(upload)),
            }),
        }
    }

    /// Acquire a session for an upload (counts against both caps)
    pub async fn acquire_upload(&self) -> Result<SessionGuard> {
        let upload_permit = self
            .inner
            .upload
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore closed");
        let total_permit = self
            .inner
            .total
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore closed");
        self.checkout(total_permit, Some(upload_permit)).await
    }

    /// Acquire a session for a download (counts against the total cap only)
    pub async fn acquire_download(&self) -> Result<SessionGuard> {
        let total_permit = self
            .inner
            .total
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore closed");
        self.checkout(total_permit, None).await
    }

    async fn checkout(
        &self,
        total_permit: OwnedSemaphorePermit,
        upload_permit: Option<OwnedSemaphorePermit>,
    ) -> Result<SessionGuard> {
        let mut service = {
            let mut free = self.inner.free.lock();
            free.pop()
        }
        .unwrap_or_else(|| {
            debug!("constructing new transport session");
            self.inner.factory.give()
        });

        if !service.connected() && !service.connect().await? {
            // Drop the dead session; the permits release on return
            return Err(VaultError::Transport(
                "transport refused connection".to_string(),
            ));
        }

        Ok(SessionGuard {
            service: Some(service),
            pool: self.inner.clone(),
            _total_permit: total_permit,
            _upload_permit: upload_permit,
        })
    }
}

/// A checked-out session; derefs to the service and returns it on drop
pub struct SessionGuard {
    service: Option<Box<dyn Service>>,
    pool: Arc<PoolInner>,
    _total_permit: OwnedSemaphorePermit,
    _upload_permit: Option<OwnedSemaphorePermit>,
}

impl std::ops::Deref for SessionGuard {
    type Target = Box<dyn Service>;

    fn deref(&self) -> &Self::Target {
        self.service.as_ref().expect("session taken")
    }
}

impl std::ops::DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.service.as_mut().expect("session taken")
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(service) = self.service.take() {
            self.pool.free.lock().push(service);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryServiceFactory, MemoryStore};
    use std::time::Duration;

    fn pool(total: usize, upload: usize) -> ConnectionPool {
        let factory = MemoryServiceFactory::new(MemoryStore::new());
        ConnectionPool::new(Box::new(factory), total, upload)
    }

    #[tokio::test]
    async fn test_sessions_are_reused() {
        let pool = pool(2, 1);
        {
            let guard = pool.acquire_download().await.unwrap();
            assert!(guard.connected());
        }
        // The returned session is connected; a fresh one would not be
        let guard = pool.acquire_download().await.unwrap();
        assert!(guard.connected());
        assert_eq!(pool.inner.free.lock().len(), 0);
        drop(guard);
        assert_eq!(pool.inner.free.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_cap_blocks_second_upload() {
        let pool = pool(2, 1);
        let first = pool.acquire_upload().await.unwrap();

        let second = tokio::time::timeout(Duration::from_millis(50), pool.acquire_upload()).await;
        assert!(second.is_err(), "second upload should wait for the cap");

        // Downloads still get the remaining total slot
        let download = tokio::time::timeout(Duration::from_millis(50), pool.acquire_download())
            .await
            .expect("download must not be starved")
            .unwrap();

        drop(download);
        drop(first);
        pool.acquire_upload().await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_cap_clamped() {
        // upload > total must clamp rather than deadlock
        let pool = pool(1, 5);
        let guard = pool.acquire_upload().await.unwrap();
        drop(guard);
        pool.acquire_download().await.unwrap();
    }
}
