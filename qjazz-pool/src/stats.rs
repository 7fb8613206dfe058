//!
//! Pool statistics snapshot
//!
use crate::pool::Pool;
use std::ops::Deref;
use std::time::{Instant, SystemTime};

/// Measurements taken atomically from a pool
pub struct Stats {
    pub active_workers: usize,
    pub idle_workers: usize,
    pub dead_workers: usize,
    pub num_workers: usize,
    /// Ratio of dead processes over started processes
    pub failure_pressure: f64,
    /// Ratio of waiting requests over the allowed maximum
    pub request_pressure: f64,
    instant: Instant,
}

impl Stats {
    pub fn new<T: Deref<Target = Pool>>(pool: T) -> Self {
        let (active_workers, idle_workers, dead_workers) = pool.stats_raw();
        Self {
            active_workers,
            idle_workers,
            dead_workers,
            num_workers: pool.num_workers(),
            failure_pressure: pool.failure_pressure(),
            request_pressure: pool.num_waiters() as f64
                / pool.options().max_waiting_requests() as f64,
            instant: Instant::now(),
        }
    }

    /// Worker activity as `active / (active + idle)`,
    /// `None` when no worker is live.
    pub fn activity(&self) -> Option<f64> {
        match self.active_workers + self.idle_workers {
            0 => None,
            total => Some(self.active_workers as f64 / total as f64),
        }
    }

    /// System time of the measurement
    pub fn timestamp(&self) -> Option<SystemTime> {
        SystemTime::now().checked_sub(self.instant.elapsed())
    }
}
