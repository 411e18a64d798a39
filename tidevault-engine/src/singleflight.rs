//! Single-flight deduplication per index identifier
//!
//! At most one concrete execution runs per key; concurrent callers with the
//! same key attach to the running execution and receive the same result or
//! the same error. A coarse mutex guards the in-flight map; waiters park on
//! a per-key notifier.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tidevault_core::{IndexId, Result, VaultError};
use tokio::sync::Notify;

struct Flight<T> {
    notify: Notify,
    slot: Mutex<Option<Result<T>>>,
}

/// Keyed single-flight context
pub struct Singleflight<T: Clone> {
    inflight: Mutex<HashMap<IndexId, Arc<Flight<T>>>>,
}

impl<T: Clone> Singleflight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key`, or attach to an execution already in flight.
    pub async fn run<F, Fut>(&self, key: IndexId, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let flight = {
            let mut inflight = self.inflight.lock();
            if let Some(existing) = inflight.get(&key) {
                Some(existing.clone())
            } else {
                inflight.insert(
                    key,
                    Arc::new(Flight {
                        notify: Notify::new(),
                        slot: Mutex::new(None),
                    }),
                );
                None
            }
        };

        match flight {
            Some(flight) => loop {
                // Arm the notifier before checking the slot so a broadcast
                // between the check and the await cannot be missed.
                let notified = flight.notify.notified();
                if let Some(result) = flight.slot.lock().clone() {
                    return result;
                }
                notified.await;
            },
            None => {
                let mut completion = Completion {
                    context: self,
                    key,
                    result: None,
                };
                completion.result = Some(work().await);
                let result = completion.result.clone().expect("result just stored");
                drop(completion);
                result
            }
        }
    }
}

impl<T: Clone> Default for Singleflight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Publishes the leader's result on drop, so waiters are released even if
/// the leader future is cancelled mid-flight.
struct Completion<'a, T: Clone> {
    context: &'a Singleflight<T>,
    key: IndexId,
    result: Option<Result<T>>,
}

impl<T: Clone> Drop for Completion<'_, T> {
    fn drop(&mut self) {
        let result = self
            .result
            .take()
            .unwrap_or_else(|| Err(VaultError::Io("operation cancelled".to_string())));

        let flight = self.context.inflight.lock().remove(&self.key);
        if let Some(flight) = flight {
            *flight.slot.lock() = Some(result);
            flight.notify.notify_waiters();
        }
    }
}
