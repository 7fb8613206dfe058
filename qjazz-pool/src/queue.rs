//!
//! Async queue for idle workers
//!
use crate::errors::{Error, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

pub struct Queue<T> {
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
    closed: AtomicBool,
    count: AtomicUsize,
    pending: AtomicUsize,
}

impl<T> Queue<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            count: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
        }
    }

    /// Wait for an item; fails once the queue is closed.
    pub async fn recv(&self) -> Result<T> {
        loop {
            if self.is_closed() {
                return Err(Error::QueueIsClosed);
            }
            if let Some(item) = self.queue.lock().pop_front() {
                self.count.fetch_sub(1, Ordering::Relaxed);
                return Ok(item);
            }
            // Wait for an item to be available
            self.pending.fetch_add(1, Ordering::Relaxed);
            self.notify.notified().await;
            self.pending.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Put an item back on the queue
    pub fn send(&self, item: T) {
        self.queue.lock().push_back(item);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Enqueue a batch of items
    pub fn send_all<I>(&self, iter: I)
    where
        I: IntoIterator<Item = T>,
    {
        let mut q = self.queue.lock();
        let mut sent = 0;
        for item in iter {
            q.push_back(item);
            sent += 1;
        }
        self.count.store(q.len(), Ordering::Relaxed);
        (0..sent).for_each(|_| self.notify.notify_one());
    }

    /// Remove at most n items
    pub fn drain(&self, n: usize) -> Vec<T> {
        let mut q = self.queue.lock();
        let count = usize::min(n, q.len());
        let v = q.drain(0..count).collect();
        self.count.store(q.len(), Ordering::Relaxed);
        v
    }

    /// Drain all items, mapping each one
    pub fn drain_map<B, F>(&self, f: F) -> Vec<B>
    where
        F: FnMut(T) -> B,
    {
        let mut q = self.queue.lock();
        let v = q.drain(..).map(f).collect();
        self.count.store(0, Ordering::Relaxed);
        v
    }

    /// Keep only items matching the predicate, returning the
    /// number of removed items.
    pub fn retain<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&mut T) -> bool,
    {
        let mut q = self.queue.lock();
        let before = q.len();
        q.retain_mut(|item| f(item));
        let removed = before - q.len();
        self.count.store(q.len(), Ordering::Relaxed);
        removed
    }

    /// Close the queue and release all waiters
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Number of tasks waiting on `recv`
    pub fn num_waiters(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }
}

// =======================
// Tests
// =======================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_send_recv() {
        let q = Queue::with_capacity(2);
        q.send(1);
        q.send(2);
        assert_eq!(q.len(), 2);
        assert_eq!(q.recv().await.unwrap(), 1);
        assert_eq!(q.recv().await.unwrap(), 2);
        assert_eq!(q.len(), 0);
    }

    #[tokio::test]
    async fn test_queue_close_releases_waiters() {
        let q = std::sync::Arc::new(Queue::<i32>::with_capacity(1));
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.recv().await })
        };
        tokio::task::yield_now().await;
        q.close();
        assert!(matches!(waiter.await.unwrap(), Err(Error::QueueIsClosed)));
    }

    #[tokio::test]
    async fn test_queue_retain() {
        let q = Queue::with_capacity(4);
        q.send_all([1, 2, 3, 4]);
        assert_eq!(q.retain(|n| *n % 2 == 0), 2);
        assert_eq!(q.len(), 2);
    }
}
