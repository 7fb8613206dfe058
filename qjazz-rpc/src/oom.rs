//
// Out-of-memory watchdog
//
// Kill workers when their cumulated memory usage exceeds the
// configured high water mark; the pool maintainer respawns them.
//
use nix::{sys::signal, unistd::Pid};
use procfs::{process::Process, Current, Meminfo, ProcResult};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use qjazz_pool::Pool;

pub(crate) fn handle_oom(
    pool: Arc<RwLock<Pool>>,
    token: CancellationToken,
    high_water_mark: f64,
    throttle_duration: time::Duration,
) -> Result<JoinHandle<()>, Box<dyn Error>> {
    // RSS is reported in pages, get the pagesize from sysconf
    let pagesize = sysconf::pagesize() as u64;
    let total_mem = Meminfo::current()?.mem_total as f64;

    let handle = tokio::spawn(async move {
        log::info!("Installing oom handler");
        while !token.is_cancelled() {
            time::sleep(throttle_duration).await;
            if token.is_cancelled() {
                break;
            }
            pool.read()
                .await
                .inspect_pids(|pids| {
                    log::trace!("Running oom handler");
                    tokio::task::spawn_blocking(move || {
                        if let Err(error) =
                            kill_out_of_memory_processes(pids, total_mem, pagesize, high_water_mark)
                        {
                            log::error!("Failed to run the oom killer {error}");
                        }
                    });
                })
                .await;
        }
    });
    Ok(handle)
}

// Memory usage of a live child process as a fraction of the
// total system memory.
//
// NOTE: procfs holds the /proc/<pid> directory so the pid cannot
// be reused as long as the `Process` exists.
fn memory_usage(proc: &Process, pagesize: u64, total_mem: f64) -> Option<f64> {
    let this = std::process::id() as i32;
    let st = proc.stat().ok()?;
    // The process must be a child of `this` and neither
    // terminated nor zombie
    if st.ppid != this || st.state == 'Z' || st.state == 'X' {
        return None;
    }
    let fraction = (st.rss * pagesize) as f64 / total_mem;
    log::debug!("Processes memory usage [{}]: {:.6}", proc.pid, fraction);
    Some(fraction)
}

pub fn kill_out_of_memory_processes(
    pids: Vec<i32>,
    total_mem: f64,
    pagesize: u64,
    hwm: f64,
) -> ProcResult<()> {
    let mut usage: Vec<(f64, Process)> = pids
        .iter()
        .filter_map(|pid| Process::new(*pid).ok())
        .filter_map(|proc| memory_usage(&proc, pagesize, total_mem).map(|mem| (mem, proc)))
        .collect();

    let mut memory_fraction: f64 = usage.iter().map(|(mem, _)| mem).sum();
    if memory_fraction <= hwm {
        return Ok(());
    }

    log::error!("CRITICAL: high memory water mark reached {memory_fraction}");

    // Kill the fattest children until memory gets low
    usage.sort_by_key(|(mem, _)| (mem * 1000.0).trunc() as i64);
    for (mem, proc) in usage.iter().rev() {
        let pid = Pid::from_raw(proc.pid);
        log::error!("OOM: killing worker: {pid} (mem usage: {mem})");
        if let Err(err) = signal::kill(pid, signal::SIGKILL) {
            log::error!("Failed to kill process {pid}: {err}");
            continue;
        }
        memory_fraction -= mem;
        if memory_fraction < hwm {
            break;
        }
    }

    Ok(())
}
