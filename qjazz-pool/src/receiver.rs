//!
//! Receiver for fetching workers from the pool
//!
use crate::errors::Result;
use crate::pool::{Pool, WorkerQueue};
use crate::restore;
use crate::worker::Worker;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A cloneable handle for acquiring workers
#[derive(Clone)]
pub struct Receiver {
    queue: Arc<WorkerQueue>,
}

/// RAII scoped worker
///
/// Exactly one request is outstanding per worker: holding a
/// `ScopedWorker` takes the worker out of the idle queue; the
/// worker is recycled when the scope is dropped.
pub struct ScopedWorker {
    queue: Arc<WorkerQueue>,
    item: Option<Worker>,
    done: bool,
}

impl ScopedWorker {
    /// Mark the response as completely read.
    ///
    /// A hint for the recycler that no data is left to drain
    /// from the process.
    pub fn done(&mut self) {
        self.done = true;
    }

    /// Remember the worker pid for resource inspection
    pub async fn remember(&self) {
        self.queue.remember_pid(self.id()).await
    }

    pub(crate) fn recycle(&mut self) -> Option<JoinHandle<Result<()>>> {
        self.item
            .take()
            .map(|w| tokio::spawn(self.queue.clone().recycle_owned(w, self.done)))
    }
}

// Recycle the worker on scope exit
impl Drop for ScopedWorker {
    fn drop(&mut self) {
        self.recycle();
    }
}

impl Deref for ScopedWorker {
    type Target = Worker;

    fn deref(&self) -> &Self::Target {
        self.item.as_ref().unwrap()
    }
}

impl DerefMut for ScopedWorker {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.item.as_mut().unwrap()
    }
}

impl Receiver {
    /// Build a new receiver for the given pool
    pub fn new(pool: &Pool) -> Self {
        Self {
            queue: pool.clone_queue(),
        }
    }

    /// Wait for a worker to be available
    pub async fn get(&self) -> Result<ScopedWorker> {
        self.queue.recv().await.map(|w| ScopedWorker {
            queue: self.queue.clone(),
            item: Some(w),
            done: false,
        })
    }

    /// Check that the pool queue is closed
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Drain all idle workers as scoped workers.
    ///
    /// Used by broadcast operations: every drained worker is
    /// recycled (and resynchronized) on drop.
    pub fn drain(&self) -> Vec<ScopedWorker> {
        self.queue.drain(|w| ScopedWorker {
            queue: self.queue.clone(),
            item: Some(w),
            done: false,
        })
    }

    /// Invalidate all current workers.
    ///
    /// Recycled workers of the previous generation are replaced
    /// by the pool maintainer.
    pub fn reload(&self) {
        self.queue.next_generation();
        let _ = self.drain(); // Terminated on drop
    }

    /// Record a cache mutation and resynchronize the idle
    /// workers.
    pub async fn update_cache(&self, state: restore::State) {
        let mut restore = self.queue.restore().write().await;
        let _ = self.drain(); // Resynchronized on drop
        restore.update_cache(state);
    }

    /// Record a configuration patch and resynchronize the idle
    /// workers.
    pub async fn update_config(&self, config: serde_json::Value) {
        let mut restore = self.queue.restore().write().await;
        let _ = self.drain(); // Resynchronized on drop
        restore.update_config(config);
    }
}
