//!
//! Worker message loop
//!
//! Single threaded cooperative driver: signal idle on the
//! rendez-vous, receive a message, signal busy, dispatch, reply.
//! Failures are captured and converted to `(status, body)`
//! replies in one place; only connection failures abort the
//! loop.
//!
use std::rc::Rc;
use std::time::Instant;

use qjazz_cache::handlers::Handlers;
use qjazz_cache::{CacheManager, CheckoutState};

use crate::config::{QgisConfig, ENV_PROJECT_FILE};
use crate::connection::{Connection, Reply};
use crate::engine::{EngineLoader, QgisEngine};
use crate::errors::{Error, Result};
use crate::messages::Incoming;
use crate::ops;
use crate::rendezvous::RendezVous;
use crate::signals::{self, Feedback};

pub struct Runtime<E: QgisEngine> {
    engine: Rc<E>,
    conf: QgisConfig,
    name: String,
    cache: CacheManager<EngineLoader<E>>,
    feedback: Feedback,
}

impl<E: QgisEngine> Runtime<E> {
    pub fn new(engine: E, conf: QgisConfig, name: &str) -> Result<Self> {
        let engine = Rc::new(engine);
        let cache = CacheManager::new(
            conf.projects.clone(),
            Handlers::new(),
            EngineLoader::new(engine.clone()),
        )?;
        Ok(Self {
            engine,
            conf,
            name: name.to_string(),
            cache,
            feedback: Feedback::global(),
        })
    }

    pub fn config(&self) -> &QgisConfig {
        &self.conf
    }

    /// Load the default project advertised by the environment
    pub fn load_default_project(&mut self) {
        let Some(path) = std::env::var_os(ENV_PROJECT_FILE) else {
            return;
        };
        let path = path.to_string_lossy().into_owned();
        if let Err(err) = self.pull_project(&path) {
            log::error!("Failed to load default project {}: {:?}", path, err);
        }
    }

    fn pull_project(&mut self, path: &str) -> Result<()> {
        let url = self.cache.resolve_path(path, true)?;
        let state = self.cache.checkout(&url)?;
        match state {
            CheckoutState::New(_) => {
                self.cache.update(state)?;
            }
            _ => log::error!("The project {} does not exists", path),
        }
        Ok(())
    }

    // Swap in a patched configuration.
    //
    // The cache is rebuilt against the new search paths; the
    // supervisor replays the pinned set right after a config
    // update so the cache content is not preserved here.
    fn apply_config(&mut self, conf: QgisConfig) -> Result<()> {
        self.cache = CacheManager::new(
            conf.projects.clone(),
            Handlers::new(),
            EngineLoader::new(self.engine.clone()),
        )?;
        self.conf = conf;
        Ok(())
    }

    /// Run the message loop until quit, termination or
    /// connection loss.
    pub fn run<C: Connection>(
        &mut self,
        conn: &mut C,
        rendez_vous: &mut RendezVous,
    ) -> Result<()> {
        loop {
            if signals::terminated() {
                log::debug!("Termination requested");
                break;
            }

            log::trace!("{}: waiting for messages", self.name);
            rendez_vous.idle();
            let frame = match conn.recv_frame() {
                Ok(frame) => frame,
                Err(Error::Terminated) => break,
                Err(err) => return Err(err),
            };
            rendez_vous.busy();

            if signals::take_interrupt() && !self.conf.ignore_interrupt_signal {
                log::warn!("Worker interrupted");
                break;
            }

            let started = Instant::now();
            let quit = match Incoming::decode(&frame) {
                Ok(msg) => {
                    log::debug!("Received message: {}", msg.name());
                    let quit = self.dispatch(conn, &msg)?;
                    log::trace!(
                        "{}\t{}\tResponse time: {} ms",
                        self.name,
                        msg.name(),
                        started.elapsed().as_millis(),
                    );
                    quit
                }
                Err(Error::UnsupportedMessage(id)) => {
                    log::error!("Unsupported message id {}", id);
                    conn.send_reply(405, "unsupported")?;
                    false
                }
                Err(err) => {
                    log::error!("Invalid message: {:?}", err);
                    conn.send_reply(400, err.to_string())?;
                    false
                }
            };

            // Rearm the cancellation flag for the next request
            self.feedback.reset();

            if quit {
                break;
            }
        }
        log::debug!("Worker exiting");
        Ok(())
    }

    // Returns true when the loop must stop
    fn dispatch<C: Connection>(&mut self, conn: &mut C, msg: &Incoming) -> Result<bool> {
        match msg {
            Incoming::Ping(m) => conn.send_reply(200, &m.echo)?,
            Incoming::Quit => {
                conn.send_nodata()?;
                return Ok(true);
            }
            Incoming::OwsRequest(m) => ops::requests::handle_ows_request(
                conn,
                m,
                self.engine.as_ref(),
                &mut self.cache,
                &self.conf,
                &self.name,
                &self.feedback,
            )?,
            Incoming::ApiRequest(m) => ops::requests::handle_api_request(
                conn,
                m,
                self.engine.as_ref(),
                &mut self.cache,
                &self.conf,
                &self.name,
                &self.feedback,
            )?,
            Incoming::CheckoutProject(m) => {
                ops::cache::checkout_project(conn, &mut self.cache, &m.uri, m.pull, &self.name)?
            }
            Incoming::DropProject(m) => {
                ops::cache::drop_project(conn, &mut self.cache, &m.uri, &self.name)?
            }
            Incoming::ClearCache => {
                self.cache.clear();
                conn.send_nodata()?;
            }
            Incoming::ListCache => ops::cache::send_cache_list(conn, &self.cache, &self.name)?,
            Incoming::UpdateCache => ops::cache::update_cache(conn, &mut self.cache)?,
            Incoming::GetProjectInfo(m) => {
                ops::cache::send_project_info(conn, &self.cache, &m.uri, &self.name)?
            }
            Incoming::Plugins => ops::plugins::inspect_plugins(conn, self.engine.as_ref())?,
            Incoming::Catalog(m) => {
                ops::cache::send_catalog(conn, &self.cache, m.location.as_deref())?
            }
            Incoming::Collections(m) => ops::cache::send_collections(conn, &self.cache, m)?,
            Incoming::PutConfig(m) => {
                match self
                    .conf
                    .patch(&m.config)
                    .and_then(|conf| self.apply_config(conf))
                {
                    Ok(()) => {
                        log::info!("Updating configuration");
                        conn.send_nodata()?;
                    }
                    Err(err) => conn.send_reply(400, err.to_string())?,
                }
            }
            Incoming::GetConfig => conn.send_reply(200, self.conf.to_json())?,
            Incoming::GetEnv => conn.send_reply(200, self.engine.environment())?,
            Incoming::Sleep(m) => ops::do_sleep(conn, m.delay, &self.feedback)?,
        }
        Ok(false)
    }
}
