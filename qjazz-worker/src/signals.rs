//!
//! Signal handling
//!
//! - SIGHUP sets the cancel flag wired to the engine feedback;
//!   the process never terminates on it.
//! - SIGTERM requests a graceful exit: the current request is
//!   finished, then the loop stops.
//! - SIGINT is ignored by default since the parent controls the
//!   worker lifecycle.
//!
//! Handlers only store into atomics so that they stay
//! async-signal-safe; the blocking I/O paths check the
//! termination flag on EINTR.
//!
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use crate::errors::Result;

static CANCELLED: LazyLock<Arc<AtomicBool>> = LazyLock::new(Default::default);
static TERMINATED: AtomicBool = AtomicBool::new(false);
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install the signal handlers
pub fn install() -> Result<()> {
    let cancelled = CANCELLED.clone();
    // SAFETY: atomic stores are async-signal-safe
    unsafe {
        signal_hook::low_level::register(SIGHUP, move || {
            cancelled.store(true, Ordering::Relaxed)
        })?;
        signal_hook::low_level::register(SIGTERM, || TERMINATED.store(true, Ordering::Relaxed))?;
        signal_hook::low_level::register(SIGINT, || INTERRUPTED.store(true, Ordering::Relaxed))?;
    }
    Ok(())
}

/// SIGTERM received: no new work is accepted
pub fn terminated() -> bool {
    TERMINATED.load(Ordering::Relaxed)
}

/// SIGINT received since the last check
pub fn take_interrupt() -> bool {
    INTERRUPTED.swap(false, Ordering::Relaxed)
}

/// Cancellation flag polled by the engine feedback and by the
/// chunked response writer.
#[derive(Clone, Default)]
pub struct Feedback {
    flag: Arc<AtomicBool>,
}

impl Feedback {
    /// The process wide flag raised by SIGHUP
    pub fn global() -> Self {
        Self {
            flag: CANCELLED.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Cancel the in-flight operation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Rearm the flag between requests
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }
}
