//!
//! Rendez-vous client
//!
//! Write side of the supervisor busy/idle pipe: a single byte
//! `0x01` when entering busy state, `0x00` when returning to
//! idle. The pipe path is read from the `RENDEZ_VOUS` variable.
//!
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::errors::Result;

pub const ENV_RENDEZ_VOUS: &str = "RENDEZ_VOUS";

pub struct RendezVous {
    pipe: Option<File>,
}

impl RendezVous {
    /// Connect to the rendez-vous pipe set up by the supervisor.
    ///
    /// Runs detached if the variable is not set, which is only
    /// useful when driving the worker manually.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(ENV_RENDEZ_VOUS) {
            Some(path) => Self::open(Path::new(&path)),
            None => {
                log::warn!("No rendez-vous configured, running detached");
                Ok(Self { pipe: None })
            }
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            pipe: Some(OpenOptions::new().write(true).open(path)?),
        })
    }

    /// Signal busy state
    pub fn busy(&mut self) {
        self.send(1)
    }

    /// Signal idle state
    pub fn idle(&mut self) {
        self.send(0)
    }

    fn send(&mut self, state: u8) {
        if let Some(pipe) = &mut self.pipe {
            if pipe.write_all(&[state]).and_then(|_| pipe.flush()).is_err() {
                // The supervisor is gone; the data pipe will
                // report it.
                self.pipe = None;
            }
        }
    }
}
