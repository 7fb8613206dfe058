//!
//! Supervisor signal handling
//!
use signal_hook::consts::signal::{SIGCHLD, SIGINT, SIGTERM};
use signal_hook::iterator::{backend::Handle, Signals};
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time;
use tokio_util::sync::CancellationToken;

use qjazz_pool::Pool;

// Run signal handling in its own thread

pub(crate) fn handle_signals(
    pool: Arc<RwLock<Pool>>,
    token: CancellationToken,
    max_failure_pressure: f64,
) -> Result<Handle, Box<dyn Error>> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGCHLD])?;

    let handle = signals.handle();

    tokio::task::spawn_blocking(move || {
        log::debug!("Installing signal handler");

        let rescaling = Arc::new(AtomicBool::new(false));
        let throttle_duration = time::Duration::from_secs(2);

        for signal in signals.forever() {
            match signal {
                SIGINT => {
                    log::info!("Server interrupted");
                    break;
                }
                SIGTERM => {
                    log::info!("Server terminated");
                    break;
                }
                SIGCHLD => {
                    // Throttle rescaling: when a child dies give
                    // some time for others to die too and perform
                    // a single rescaling pass.
                    log::debug!("SIGCHLD detected");
                    if !rescaling.load(Ordering::Relaxed) {
                        rescaling.store(true, Ordering::Relaxed);
                        let pool = pool.clone();
                        let token = token.clone();
                        let state = rescaling.clone();
                        tokio::spawn(async move {
                            time::sleep(throttle_duration).await;
                            // Release the barrier
                            state.store(false, Ordering::Relaxed);
                            maintain(pool, token, max_failure_pressure).await;
                        });
                    }
                }
                _ => {}
            }
        }
        log::trace!("Releasing signal handler");
        token.cancel();
    });
    Ok(handle)
}

/// Single maintenance pass: check the failure pressure then
/// bring the pool back to its nominal size.
pub(crate) async fn maintain(
    pool: Arc<RwLock<Pool>>,
    token: CancellationToken,
    max_failure_pressure: f64,
) {
    let failure_pressure = pool.read().await.failure_pressure();
    log::trace!("Failure pressure: {}", failure_pressure);
    if failure_pressure > max_failure_pressure {
        log::error!("Max failure pressure exceeded, terminating server");
        pool.write().await.set_error();
        token.cancel();
    } else if let Err(err) = pool.write().await.maintain_pool().await {
        log::error!("Pool scaling failed: {:?}, terminating server", err);
        pool.write().await.set_error();
        token.cancel();
    }
}

/// Periodic pool maintenance; with the SIGCHLD handler this is
/// the only place where workers are respawned.
pub(crate) fn handle_maintenance(
    pool: Arc<RwLock<Pool>>,
    token: CancellationToken,
    max_failure_pressure: f64,
    period: time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = time::interval(period);
        ticks.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        ticks.tick().await; // Immediate first tick
        while !token.is_cancelled() {
            ticks.tick().await;
            if token.is_cancelled() {
                break;
            }
            maintain(pool.clone(), token.clone(), max_failure_pressure).await;
        }
    })
}
