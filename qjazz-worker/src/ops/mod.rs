//!
//! Message operations
//!
//! Handlers reply on the connection themselves; an `Err` return
//! means the connection itself failed and the runtime must exit.
//!
use qjazz_cache::Error as CacheError;

pub mod cache;
pub mod plugins;
pub mod requests;

use crate::connection::{Connection, Reply};
use crate::errors::Result;
use crate::signals::Feedback;
use std::time::{Duration, Instant};

/// Status code reported for a cache error
pub(crate) fn error_status(err: &CacheError) -> i64 {
    match err {
        CacheError::ResourceNotAllowed(_) => 403,
        CacheError::NotFound(_) => 404,
        CacheError::MaxProjectsReached(_) => 409,
        CacheError::StrictCheckingFailure(_) => 422,
        CacheError::InvalidUrl(_) | CacheError::UnknownScheme(_) | CacheError::InvalidRootUrl(..) => {
            400
        }
        _ => 500,
    }
}

pub(crate) fn send_cache_error<C: Connection>(conn: &mut C, err: &CacheError) -> Result<()> {
    conn.send_reply(error_status(err), err.to_string())
}

/// Feedback test hook: hold the worker busy for `delay` seconds
pub fn do_sleep<C: Connection>(conn: &mut C, delay: i64, feedback: &Feedback) -> Result<()> {
    log::info!("Entering sleep mode for {} seconds", delay);
    let deadline = Instant::now() + Duration::from_secs(delay.max(0) as u64);
    let mut cancelled = false;
    while Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(250));
        cancelled = feedback.is_cancelled();
        if cancelled {
            break;
        }
    }
    if !cancelled {
        log::info!("** Worker is now awake **");
        conn.send_nodata()?;
    }
    Ok(())
}
