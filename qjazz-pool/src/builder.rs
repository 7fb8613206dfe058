//! Worker builder
use crate::config::{get_log_level, log_level_from_json, WorkerOptions};
use crate::errors::Result;
use crate::messages::JsonValue;
use crate::utils::json_merge;
use crate::worker::{Worker, WorkerLauncher};

/// Build workers from a common configuration
#[derive(Clone)]
pub struct Builder {
    pub(crate) args: Vec<String>,
    pub(crate) opts: WorkerOptions,
    pub(crate) log_level: &'static str,
}

impl Builder {
    /// Create a new builder with extra worker arguments
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_options(args, Default::default())
    }

    /// Create a new builder from options
    pub fn from_options<I, S>(args: I, opts: WorkerOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            opts,
            log_level: get_log_level(),
        }
    }

    pub fn launcher(&self) -> WorkerLauncher {
        WorkerLauncher::new(&self.opts, self.args.clone(), self.log_level)
    }

    /// Start a worker with the current configuration
    pub async fn start(&self) -> Result<Worker> {
        self.launcher().spawn().await
    }

    /// Start a worker from an owned clone of the builder
    pub async fn start_owned(self) -> Result<Worker> {
        self.launcher().spawn().await
    }

    /// Patch the configuration with a json merge patch
    pub fn patch(&mut self, patch: &serde_json::Value) -> Result<()> {
        if let Some(level) = log_level_from_json(patch) {
            self.log_level = level;
        }

        if let Some(patch) = patch.get("worker") {
            let mut doc = serde_json::to_value(&self.opts)?;
            json_merge(&mut doc, patch);
            self.opts = serde_json::from_value(doc)?;
        }

        Ok(())
    }

    pub(crate) fn options(&self) -> &WorkerOptions {
        &self.opts
    }

    pub(crate) fn options_mut(&mut self) -> &mut WorkerOptions {
        &mut self.opts
    }

    pub fn name(&mut self, value: &str) -> &mut Self {
        self.opts.name = value.to_string();
        self
    }

    pub fn process_start_timeout(&mut self, value: u64) -> &mut Self {
        self.opts.process_start_timeout = value;
        self
    }

    pub fn process_config(&mut self, value: JsonValue) -> &mut Self {
        self.opts.qgis = value;
        self
    }

    pub fn num_processes(&mut self, value: usize) -> Result<&mut Self> {
        self.opts.num_processes = value.try_into()?;
        Ok(self)
    }

    pub fn restore_projects<I>(&mut self, projects: I) -> &mut Self
    where
        I: IntoIterator<Item = String>,
    {
        self.opts.restore_projects = projects.into_iter().collect();
        self
    }
}

// =======================
// Tests
// =======================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_patch() {
        let mut builder = Builder::new(Vec::<String>::new());
        let _ = builder
            .name("test")
            .process_start_timeout(5)
            .num_processes(1)
            .unwrap();

        assert_eq!(builder.opts.num_processes(), 1);

        builder
            .patch(&json!({
                "worker": {
                    "num_processes": 3,
                    "qgis": {
                        "max_projects": 25
                    }
                }
            }))
            .unwrap();

        assert_eq!(builder.opts.num_processes(), 3);
        assert_eq!(builder.opts.qgis, json!({ "max_projects": 25 }));
    }

    #[test]
    fn test_builder_patch_rejects_invalid() {
        let mut builder = Builder::new(Vec::<String>::new());
        assert!(builder
            .patch(&json!({ "worker": { "num_processes": 0 } }))
            .is_err());
    }
}
