//!
//! Worker pool
//!
//! Manage multiple workers sharing the same configuration.
//!
use crate::builder::Builder;
use crate::config::WorkerOptions;
use crate::errors::{Error, Result};
use crate::queue::Queue;
use crate::restore::Restore;
use crate::worker::{Worker, WorkerId};
use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub(crate) struct WorkerQueue {
    q: Queue<Worker>,
    dead_workers: AtomicUsize,
    max_requests: AtomicUsize,
    generation: AtomicUsize,
    failures: AtomicUsize,
    restore: RwLock<Restore>,
    // Busy worker pids, inspected by resource watchdogs
    pids: RwLock<HashSet<u32>>,
}

impl WorkerQueue {
    pub fn max_requests(&self) -> usize {
        self.max_requests.load(Ordering::Relaxed)
    }

    pub fn generation(&self) -> usize {
        self.generation.load(Ordering::Relaxed)
    }

    pub fn next_generation(&self) -> usize {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn remember_pid(&self, id: WorkerId) {
        if let Some(pid) = id.value {
            self.pids.write().await.insert(pid);
        }
    }

    async fn forget_pid(&self, id: WorkerId) {
        if let Some(pid) = id.value {
            self.pids.write().await.remove(&pid);
        }
    }

    /// Take an idle worker, applying the piling-up guard
    pub async fn recv(&self) -> Result<Worker> {
        if self.q.num_waiters() >= self.max_requests() {
            return Err(Error::MaxRequestsExceeded);
        }
        self.q.recv().await
    }

    pub fn restore(&self) -> &RwLock<Restore> {
        &self.restore
    }

    // Resync the worker with the restore snapshot
    async fn update(&self, worker: &mut Worker) -> Result<()> {
        self.restore.read().await.restore(worker).await
    }

    async fn terminate(&self, mut w: Worker) -> Result<()> {
        self.dead_workers.fetch_add(1, Ordering::Relaxed);
        w.terminate().await
    }

    async fn terminate_failure(&self, w: Worker) -> Result<()> {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.terminate(w).await
    }

    /// Recycle a worker back into the idle queue.
    ///
    /// `done_hint` tells the recycler that the complete response
    /// has been read and no leftover data needs draining.
    ///
    /// The worker returns to the queue only once the rendez-vous
    /// reports idle and the data pipe has been drained; otherwise
    /// it is killed and accounted as a failure.
    pub(crate) async fn recycle_owned(
        self: Arc<Self>,
        mut worker: Worker,
        done_hint: bool,
    ) -> Result<()> {
        let pid = worker.id();
        log::debug!("Recycling worker [{}]", pid);

        self.forget_pid(pid).await;

        // Workers of an older generation are replaced
        if worker.generation < self.generation() {
            self.terminate(worker).await
        } else {
            let mut rv = worker.cancel_timeout(done_hint).await;
            if rv.is_ok() {
                rv = self.update(&mut worker).await;
                if rv.is_ok() {
                    self.q.send(worker);
                } else {
                    self.terminate_failure(worker).await?;
                }
            } else {
                let id = worker.id();
                self.terminate_failure(worker).await?;
                log::error!("Killed stalled process {}", id);
            }
            rv
        }
    }

    #[inline(always)]
    pub fn drain<B, F: FnMut(Worker) -> B>(&self, f: F) -> Vec<B> {
        self.q.drain_map(f)
    }

    #[inline(always)]
    fn close(&self) {
        self.q.close();
    }

    #[inline(always)]
    pub fn is_closed(&self) -> bool {
        self.q.is_closed()
    }
}

//
// Pool
//

/// A pool of workers
pub struct Pool {
    queue: Arc<WorkerQueue>,
    builder: Builder,
    num_processes: usize,
    error: bool,
}

impl Pool {
    /// Create a new pool instance from a worker builder
    pub fn new(mut builder: Builder) -> Self {
        let opts = builder.options_mut();
        Self {
            queue: Arc::new(WorkerQueue {
                q: Queue::with_capacity(opts.num_processes()),
                dead_workers: AtomicUsize::new(0),
                max_requests: AtomicUsize::new(opts.max_waiting_requests()),
                restore: RwLock::new(Restore::with_projects(
                    opts.restore_projects.drain(..),
                )),
                generation: AtomicUsize::new(1),
                failures: AtomicUsize::new(0),
                pids: RwLock::new(HashSet::new()),
            }),
            builder,
            num_processes: 0,
            error: false,
        }
    }

    pub fn set_error(&mut self) {
        self.error = true
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn options(&self) -> &WorkerOptions {
        self.builder.options()
    }

    /// Patch the configuration and rescale accordingly
    pub async fn patch_config(&mut self, patch: &serde_json::Value) -> Result<()> {
        self.builder.patch(patch)?;
        self.queue.max_requests.store(
            self.builder.options().max_waiting_requests(),
            Ordering::Relaxed,
        );
        self.maintain_pool().await
    }

    pub(crate) fn clone_queue(&self) -> Arc<WorkerQueue> {
        self.queue.clone()
    }

    /// Number of dead workers since the last maintenance
    pub fn dead_workers(&self) -> usize {
        self.queue.dead_workers.load(Ordering::Relaxed)
    }

    /// Number of failures since the last maintenance
    pub fn failures(&self) -> usize {
        self.queue.failures.load(Ordering::Relaxed)
    }

    /// Number of requests waiting for an available worker
    pub fn num_waiters(&self) -> usize {
        self.queue.q.num_waiters()
    }

    /// Number of workers owned by the pool
    pub fn num_workers(&self) -> usize {
        self.num_processes
    }

    /// Ratio of failures against the number of owned workers
    pub fn failure_pressure(&self) -> f64 {
        if self.num_processes == 0 {
            0.
        } else {
            self.failures() as f64 / self.num_processes as f64
        }
    }

    /// Inspect the memoized busy pids
    pub async fn inspect_pids<F>(&self, mut f: F)
    where
        F: FnMut(Vec<i32>),
    {
        // Hold the lock the shortest possible time
        let processes = {
            self.queue
                .pids
                .read()
                .await
                .iter()
                .map(|id| *id as i32)
                .collect::<Vec<_>>()
        };

        f(processes);
    }

    pub(crate) fn stats_raw(&self) -> (usize, usize, usize) {
        let dead = self.dead_workers();
        let idle = self.queue.q.len();
        let busy = self.num_processes.saturating_sub(idle + dead);
        (busy, idle, dead)
    }

    /// Remove dead workers from the idle queue.
    ///
    /// No dead worker should normally reach the queue, but an
    /// idle worker may die for external reasons.
    fn cleanup_dead_workers(&self) {
        let dead_workers = self.queue.q.retain(|w| w.is_alive());
        if dead_workers > 0 {
            log::warn!("Removed {} dead workers from queue !", dead_workers);
            self.queue
                .dead_workers
                .fetch_add(dead_workers, Ordering::Relaxed);
        }
    }

    /// Maintain the pool at its nominal number of live workers.
    ///
    /// This is the only place where workers are spawned.
    pub async fn maintain_pool(&mut self) -> Result<()> {
        self.cleanup_dead_workers();
        let nominal = self.builder.options().num_processes();
        let dead_workers = self.dead_workers();
        let failures = self.failures();
        let current = self.num_processes - dead_workers;

        match nominal {
            n if n > current => {
                self.grow(n - current).await?;
                // Replaced dead workers are accounted for
                self.num_processes = n;
            }
            n if n < current => self.shrink(current - n).await?,
            _ => return Ok(()),
        }

        self.queue.failures.fetch_sub(failures, Ordering::Relaxed);
        self.queue
            .dead_workers
            .fetch_sub(dead_workers, Ordering::Relaxed);
        Ok(())
    }

    /// Add workers to the pool
    async fn grow(&mut self, n: usize) -> Result<()> {
        if self.queue.is_closed() {
            return Err(Error::QueueIsClosed);
        }

        let ts = Instant::now();

        log::debug!("Launching {} workers", n);
        let futures: Vec<_> = (0..n).map(|_| self.builder.clone().start_owned()).collect();

        let mut workers = try_join_all(futures).await?;

        let generation = self.queue.generation();

        // Resync the new workers with the restore snapshot
        {
            let restore = self.queue.restore.read().await;
            try_join_all(workers.iter_mut().map(|w| {
                w.generation = generation;
                restore.restore(w)
            }))
            .await?;
        }

        self.queue.q.send_all(workers.drain(..));
        self.num_processes += n;
        log::info!("Started {} workers in {} ms", n, ts.elapsed().as_millis());
        Ok(())
    }

    /// Remove workers from the pool
    async fn shrink(&mut self, n: usize) -> Result<()> {
        if self.queue.is_closed() {
            return Err(Error::QueueIsClosed);
        }
        log::debug!("Pool: Shrinking by {} workers", n);
        let mut removed = self.queue.q.drain(n);
        self.num_processes -= removed.len();
        for mut w in removed.drain(..) {
            let _ = w.quit().await;
        }
        Ok(())
    }

    /// Close the pool and shut down all workers within a grace
    /// period.
    pub async fn close(&mut self, grace_period: Duration) {
        // No worker will be available anymore
        log::info!("Closing worker queue");
        self.queue.close();

        // Wait for the active workers to come back
        log::info!("Waiting for active workers....");
        let wait_active = async {
            loop {
                match self.stats_raw() {
                    (0, _, _) => break,
                    (active, _, _) => log::debug!("Active workers: {}", active),
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        };
        if tokio::time::timeout(grace_period, wait_active).await.is_err() {
            log::warn!("Grace period expired with busy workers left");
        }

        log::info!("Shutting down...");
        for mut w in self.queue.q.drain(self.num_processes) {
            self.num_processes -= 1;
            let _ = w.quit().await;
        }
        log::debug!("Pool terminated (rem: {})", self.num_processes);
    }
}
