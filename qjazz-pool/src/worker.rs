//!
//! Worker process handle
//!
use crate::config::{worker_executable, WorkerOptions};
use crate::errors::{Error, Result};
use crate::messages::{self as msg, JsonValue, RequestMessage, RequestReply};
use crate::pipes::{Pipe, PipeOptions};
use crate::rendezvous::RendezVous;
use crate::stream::{ByteStream, ObjectStream};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::time::timeout;

const TERM_TIMEOUT_SEC: u64 = 5;
const QUIT_TIMEOUT_SEC: u64 = 5;

// Child process helper
struct ChildProcess {
    child: Child,
    io: Pipe,
}

impl ChildProcess {
    fn is_alive(&mut self) -> Result<bool> {
        self.child
            .try_wait()
            .map(|r| r.is_none())
            .map_err(Error::from)
    }

    fn send_signal(&mut self, sig: Signal) -> Result<i32> {
        // The child must have been waited on for its pid to stay
        // meaningful; update the status first.
        let _ = self.is_alive()?;
        match self.child.id() {
            Some(pid) => signal::kill(Pid::from_raw(pid as i32), sig)
                .map_err(Error::from)
                .map(|_| pid as i32),
            None => Err(Error::WorkerProcessDead),
        }
    }
}

/// Worker launcher
#[derive(Clone)]
pub struct WorkerLauncher {
    name: String,
    args: Vec<String>,
    start_timeout: u64,
    cancel_timeout: u64,
    buffer_size: usize,
    qgis_options: String,
    log_level: &'static str,
}

impl WorkerLauncher {
    pub fn new(opts: &WorkerOptions, args: Vec<String>, log_level: &'static str) -> Self {
        Self {
            args,
            name: opts.name.clone(),
            start_timeout: opts.process_start_timeout,
            cancel_timeout: opts.cancel_timeout,
            buffer_size: opts.max_chunk_size(),
            qgis_options: opts.qgis.to_string(),
            log_level,
        }
    }

    /// Start a worker, consuming the launcher
    pub async fn spawn(self) -> Result<Worker> {
        let mut rendez_vous = RendezVous::new()?;

        log::debug!("Starting worker process '{}'", self.name);

        rendez_vous.start()?;

        let mut child = Command::new(worker_executable())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .args(&self.args)
            .arg(&self.name)
            .kill_on_drop(true)
            .env("CONF_LOGGING__LEVEL", self.log_level)
            .env("CONF_WORKER__QGIS", &self.qgis_options)
            .env(
                "CONF_WORKER__QGIS__MAX_CHUNK_SIZE",
                self.buffer_size.to_string(),
            )
            .env("RENDEZ_VOUS", rendez_vous.path())
            .spawn()?;

        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();

        let buffer_size = self.buffer_size;
        let result;

        // Wait for the child to join the rendez-vous
        tokio::select! {
            v = timeout(
                Duration::from_secs(self.start_timeout),
                rendez_vous.wait_ready(),
            ) => if v.is_err() {
                log::error!("Worker stalled at start, attempting to terminate");
                if let Err(err) = child.start_kill() {
                    let pid = child.id();
                    log::error!("Failed to kill process <{pid:?}>: {err:?}");
                }
                result = Err(Error::WorkerProcessFailure)
            } else {
                let pipe = Pipe::new(stdin, stdout, PipeOptions { buffer_size });
                result = Ok(ChildProcess { child, io: pipe })
            },
            v = child.wait() => {
                result = v.map_err(Error::from).and_then(|exitstatus| {
                    log::error!("Worker exited prematurely <exitstatus: {exitstatus}>");
                    Err(Error::WorkerProcessFailure)
                })
            }
        }

        let process = result?;

        Ok(Worker {
            name: self.name,
            rendez_vous,
            cancel_timeout: Duration::from_secs(self.cancel_timeout),
            ready_timeout: Duration::from_secs(1),
            process,
            uptime: Instant::now(),
            last_update: 0,
            generation: 1,
        })
    }
}

/// Handle to a worker child process
pub struct Worker {
    name: String,
    rendez_vous: RendezVous,
    cancel_timeout: Duration,
    ready_timeout: Duration,
    process: ChildProcess,
    uptime: Instant,
    pub(crate) generation: usize,
    pub(crate) last_update: u64,
}

impl Worker {
    /// Ask the worker to quit its message loop, then terminate
    /// the process.
    pub async fn quit(&mut self) -> Result<()> {
        if self.is_alive() && self.is_ready() {
            let quit = async {
                self.process.io.put_message(&msg::QuitMsg).await?;
                self.process.io.read_nodata().await
            };
            match timeout(Duration::from_secs(QUIT_TIMEOUT_SEC), quit).await {
                Ok(Ok(())) => log::debug!("Worker {} quit gracefully", self.name),
                Ok(Err(err)) => log::debug!("Worker {} quit error: {err:?}", self.name),
                Err(_) => log::warn!("Worker {} did not acknowledge quit", self.name),
            }
        }
        self.terminate().await
    }

    /// Terminate the child process.
    ///
    /// Attempt a SIGTERM then wait before forcing a kill.
    pub async fn terminate(&mut self) -> Result<()> {
        if let Ok(Some(status)) = self.process.child.try_wait() {
            log::info!(
                "Worker terminated with exit status {:?}",
                status.code().unwrap_or(-1)
            );
        } else {
            log::debug!("Terminating worker {}", self.id());
            self.rendez_vous.stop().await;
            self.process.send_signal(Signal::SIGTERM)?;
            if timeout(
                Duration::from_secs(TERM_TIMEOUT_SEC),
                self.process.child.wait(),
            )
            .await
            .is_err()
            {
                log::warn!(
                    "Worker {} (pid: {:?}) not terminated, kill forced...",
                    self.name,
                    self.process.child.id(),
                );
                self.process.child.start_kill().inspect_err(|err| {
                    log::error!("Failed to kill worker [{}] {:?}", self.id(), err);
                })?;
            }
        }
        Ok(())
    }

    /// Check that the worker is ready to process messages
    pub fn is_ready(&self) -> bool {
        self.rendez_vous.is_ready()
    }

    /// Wait for the worker to be ready to process messages
    pub async fn wait_ready(&self) -> Result<()> {
        if !self.rendez_vous.is_running() {
            return Err(Error::RendezVousDisconnected);
        }
        self.rendez_vous.wait_ready().await;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drain leftover data until the worker reports idle
    pub(crate) async fn drain_until_task_done(&mut self) -> Result<()> {
        loop {
            let drained = self.io()?.drain().await.inspect_err(|err| {
                log::debug!("Drain failed [{}] {:?}", self.id(), err);
            })?;

            if self.rendez_vous.is_ready() {
                // The worker went idle: everything it pushed
                // has been read.
                break;
            }
            if !drained {
                // Nothing to read yet, let the task finish
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
        Ok(())
    }

    /// Cancel the running task by sending SIGHUP
    pub async fn cancel(&mut self) -> Result<()> {
        log::debug!("Cancelling job {}:{:?}", &self.name, self.process.child.id());
        self.process.send_signal(Signal::SIGHUP)?;
        // Pull the output of the cancelled job
        self.drain_until_task_done().await.inspect_err(|err| {
            log::debug!("Worker cancel error: {:?}", err);
        })
    }

    /// Attempt to cancel gracefully any pending job.
    ///
    /// With `done_hint` unset an incomplete response is assumed
    /// pending and leftover data is drained from the process.
    pub async fn cancel_timeout(&mut self, done_hint: bool) -> Result<()> {
        if let Ok(rv) = timeout(self.ready_timeout, self.wait_ready()).await {
            if rv.is_ok() && !done_hint {
                self.drain_until_task_done().await
            } else {
                rv
            }
        } else {
            match timeout(self.cancel_timeout, self.cancel()).await {
                Err(_) => Err(Error::WorkerStalled),
                Ok(rv) => rv,
            }
        }
    }

    /// Displayable worker id
    pub fn id(&self) -> WorkerId {
        WorkerId {
            value: self.process.child.id(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.uptime.elapsed()
    }

    pub fn is_alive(&mut self) -> bool {
        self.process.is_alive().unwrap_or(false)
    }
}

//
// Message stubs
//

impl Worker {
    // Borrow the pipe, failing on a dead process
    fn io(&mut self) -> Result<&mut Pipe> {
        if !self.process.is_alive()? {
            Err(Error::WorkerProcessDead)
        } else {
            Ok(&mut self.process.io)
        }
    }

    /// Send a ping echo string
    pub async fn ping(&mut self, echo: &str) -> Result<String> {
        self.io()?
            .send_message(&msg::PingMsg { echo })
            .await
            .map(|(_, s)| s)
    }

    /// Hold the worker busy (test hook)
    pub async fn sleep(&mut self, delay: i64) -> Result<()> {
        self.io()?
            .send_noreply_message(&msg::SleepMsg { delay })
            .await
    }

    /// Worker environment report
    pub async fn get_env(&mut self) -> Result<JsonValue> {
        self.io()?
            .send_message(&msg::GetEnvMsg)
            .await
            .map(|(_, s)| s)
    }

    /// Send a request to the embedded server.
    ///
    /// Returns the `RequestReply` head; body bytes are retrieved
    /// with `byte_stream()`.
    pub async fn request<M>(&mut self, msg: &M) -> Result<RequestReply>
    where
        M: RequestMessage,
    {
        let io = self.io()?;
        let (_, reply) = io.send_message::<_, RequestReply>(msg).await?;
        Ok(reply)
    }

    /// Byte stream of the current response body
    pub fn byte_stream(&mut self) -> Result<ByteStream<'_>> {
        Ok(ByteStream::new(self.io()?))
    }

    /// OGC collections page
    pub async fn collections(
        &mut self,
        location: Option<&str>,
        resource: Option<&str>,
        range: std::ops::Range<i64>,
    ) -> Result<msg::CollectionsPage> {
        self.io()?
            .send_message(&msg::CollectionsMsg {
                location,
                resource,
                start: range.start,
                end: range.end,
            })
            .await
            .map(|(_, page)| page)
    }

    /// Checkout project status, optionally pulling it in cache
    pub async fn checkout_project(&mut self, uri: &str, pull: bool) -> Result<msg::CacheInfo> {
        self.io()?
            .send_message(&msg::CheckoutProjectMsg { uri, pull })
            .await
            .map(|(_, info)| info)
    }

    /// Drop a project from the cache
    pub async fn drop_project(&mut self, uri: &str) -> Result<msg::CacheInfo> {
        self.io()?
            .send_message(&msg::DropProjectMsg { uri })
            .await
            .map(|(_, info)| info)
    }

    /// Refresh all cached projects
    pub async fn update_cache(&mut self) -> Result<()> {
        self.io()?.send_noreply_message(&msg::UpdateCacheMsg).await
    }

    /// Evict all cached projects
    pub async fn clear_cache(&mut self) -> Result<()> {
        self.io()?.send_noreply_message(&msg::ClearCacheMsg).await
    }

    /// Stream the cache content
    pub async fn list_cache(&mut self) -> Result<ObjectStream<'_, msg::CacheInfo>> {
        let io = self.io()?;
        io.put_message(&msg::ListCacheMsg).await?;
        Ok(ObjectStream::new(io))
    }

    /// Stream all projects available from the search paths.
    ///
    /// With `location` set, only projects under that location.
    pub async fn catalog(
        &mut self,
        location: Option<&str>,
    ) -> Result<ObjectStream<'_, msg::CatalogItem>> {
        let io = self.io()?;
        io.put_message(&msg::CatalogMsg { location }).await?;
        Ok(ObjectStream::new(io))
    }

    /// Project information for a loaded project.
    /// Does NOT load the project in cache.
    pub async fn project_info(&mut self, uri: &str) -> Result<msg::ProjectInfo> {
        self.io()?
            .send_message(&msg::GetProjectInfoMsg { uri })
            .await
            .map(|(_, info)| info)
    }

    /// Stream loaded plugins
    pub async fn list_plugins(&mut self) -> Result<ObjectStream<'_, msg::PluginInfo>> {
        let io = self.io()?;
        io.put_message(&msg::PluginsMsg).await?;
        Ok(ObjectStream::new(io))
    }

    /// Update the worker configuration
    pub async fn put_config(&mut self, config: &JsonValue) -> Result<()> {
        self.io()?
            .send_noreply_message(&msg::PutConfigMsg { config })
            .await
    }

    /// Retrieve the worker configuration
    pub async fn get_config(&mut self) -> Result<JsonValue> {
        self.io()?
            .send_message(&msg::GetConfigMsg {})
            .await
            .map(|(_, config)| config)
    }
}

/// A displayable pid
#[derive(Debug, Clone, Copy)]
pub struct WorkerId {
    pub value: Option<u32>,
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(v) = &self.value {
            write!(f, "{}", v)
        } else {
            write!(f, "<notset>")
        }
    }
}
