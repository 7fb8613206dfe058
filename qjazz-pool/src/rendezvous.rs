//!
//! Rendez-vous
//!
//! Out-of-band busy/idle signal from the worker process, over a
//! named pipe distinct from the data pipe. This is the only way
//! to learn that a worker finished without reading its data pipe,
//! which may still be draining chunks nobody consumes.
//!
use nix::{errno::Errno, fcntl, fcntl::OFlag, sys::stat, unistd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::unix::AsyncFd;
use tokio::sync::Notify;
use tokio::task;

use crate::errors::{Error, Result};

/// Rendez-vous listener
///
/// The worker writes a single byte on the pipe: `0x01` when
/// entering busy state, `0x00` when returning to idle. The
/// path of the pipe is passed to the worker in the
/// `RENDEZ_VOUS` environment variable.
pub struct RendezVous {
    tmp_dir: TempDir,
    path: PathBuf,
    handle: Option<task::JoinHandle<Result<()>>>,
    notify: Arc<Notify>,
    busy: Arc<AtomicBool>,
}

impl Drop for RendezVous {
    fn drop(&mut self) {
        if let Some(handle) = &mut self.handle {
            if !handle.is_finished() {
                handle.abort();
            }
        }
    }
}

impl RendezVous {
    pub fn new() -> Result<Self> {
        let tmp_dir = TempDir::with_prefix("qjazz_")?;
        let path = tmp_dir.path().join("_rendez_vous");

        Ok(Self {
            tmp_dir,
            path,
            handle: None,
            notify: Arc::new(Notify::new()),
            // Start in busy state until the worker joins
            busy: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn dir(&self) -> &Path {
        self.tmp_dir.path()
    }

    /// Path of the named pipe
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_ready(&self) -> bool {
        !self.busy.load(atomic::Ordering::Relaxed)
    }

    /// Wait for idle state
    pub async fn wait_ready(&self) {
        if !self.is_ready() {
            self.notify.notified().await
        }
    }

    /// Stop the listener and wait for its task completion
    pub async fn stop(&mut self) {
        if let Some(handle) = &mut self.handle {
            if !handle.is_finished() {
                handle.abort();
                let _ = handle.await;
            }
        }
    }

    /// Check that the listener task is active
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Create the fifo and start the listener task
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::Worker("Rendez-vous already started".into()));
        }

        unistd::mkfifo(&self.path, stat::Mode::S_IRWXU)?;

        // Open in non blocking mode so that we do not wait
        // for the writer side.
        let fd = AsyncFd::new(fcntl::open(
            &self.path,
            OFlag::O_RDONLY | OFlag::O_NONBLOCK,
            stat::Mode::S_IRWXU,
        )?)?;

        let notify = self.notify.clone();
        let busy = self.busy.clone();

        const MAX_EOF_RETURN: u16 = 10;

        let handle = tokio::spawn(async move {
            let mut buf = [1u8; 1];
            let mut eof = 0u16;
            loop {
                // When the write side of the pipe is closed the fd
                // always polls readable; N consecutive empty reads
                // mean the client is gone for good.
                let mut guard = fd.readable().await?;
                match unistd::read(*guard.get_inner(), &mut buf) {
                    Ok(0) => {
                        eof += 1;
                        if eof > MAX_EOF_RETURN {
                            busy.store(true, atomic::Ordering::Relaxed);
                            log::error!("Too many EOF detected, client was probably closed");
                            return Err(Error::RendezVousDisconnected);
                        }
                        guard.clear_ready();
                    }
                    Ok(_) => match buf[0] {
                        0 => {
                            eof = 0;
                            log::trace!("Rendez-vous: IDLE");
                            busy.store(false, atomic::Ordering::Relaxed);
                            notify.notify_waiters();
                        }
                        1 => {
                            eof = 0;
                            log::trace!("Rendez-vous: BUSY");
                            busy.store(true, atomic::Ordering::Relaxed);
                        }
                        _ => {
                            log::error!("Rendez-vous received invalid value {buf:?}");
                        }
                    },
                    Err(Errno::EWOULDBLOCK) => {
                        eof = 0;
                        guard.clear_ready();
                        continue;
                    }
                    Err(errno) => {
                        log::error!("Rendez-vous I/O error: {errno:#?}");
                        return Err(Error::from(errno));
                    }
                }
            }
        });

        self.handle = Some(handle);
        Ok(())
    }
}

// =======================
// Tests
// =======================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::setup;
    use std::fs::File;
    use std::io::Write;

    #[tokio::test]
    async fn test_rendez_vous() {
        setup();
        let mut rdv = RendezVous::new().unwrap();

        assert!(rdv.dir().exists());

        rdv.start().unwrap();

        assert!(rdv.is_running());
        assert!(rdv.path().exists(), "{:?} does not exists", rdv.path);
        assert!(!rdv.is_ready());

        // Meet at the rendez-vous
        let mut file = File::options().write(true).open(rdv.path()).unwrap();
        file.write_all(b"\x00").unwrap();
        file.flush().unwrap();

        rdv.wait_ready().await;

        assert!(rdv.is_ready());

        // Flip busy then idle again
        file.write_all(b"\x01").unwrap();
        file.flush().unwrap();
        while rdv.is_ready() {
            tokio::task::yield_now().await;
        }
        file.write_all(b"\x00").unwrap();
        file.flush().unwrap();
        rdv.wait_ready().await;
        assert!(rdv.is_ready());

        rdv.stop().await;
    }
}
