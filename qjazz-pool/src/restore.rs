//!
//! Restore set
//!
//! Snapshot of the pinned projects and of the last configuration
//! patch. Workers are resynchronized against the snapshot when
//! they are recycled or spawned, so that rescales and restarts
//! preserve the pinned cache.
//!
use std::collections::BTreeSet;

use crate::errors::Result;
use crate::messages::JsonValue;
use crate::utils::json_merge;
use crate::worker::Worker;

/// Cache synchronization states
#[derive(Debug, Clone)]
pub enum State {
    /// Pin a project on every worker
    Pull(String),
    /// Remove a project from the pinned set
    Remove(String),
    /// Drop everything
    Clear,
    /// Refresh cached projects against their storage
    Update,
}

pub struct Restore {
    projects: BTreeSet<String>,
    config: Option<JsonValue>,
    revision: u64,
}

impl Restore {
    pub fn with_projects<I>(projects: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            projects: projects.into_iter().collect(),
            config: None,
            revision: 1,
        }
    }

    /// Pinned projects in the snapshot
    pub fn projects(&self) -> impl Iterator<Item = &str> {
        self.projects.iter().map(|s| s.as_str())
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Record a cache mutation
    pub fn update_cache(&mut self, state: State) {
        match state {
            State::Pull(uri) => {
                self.projects.insert(uri);
            }
            State::Remove(uri) => {
                self.projects.remove(&uri);
            }
            State::Clear => {
                self.projects.clear();
            }
            State::Update => (),
        }
        self.revision += 1;
    }

    /// Record a configuration patch
    pub fn update_config(&mut self, patch: JsonValue) {
        match &mut self.config {
            Some(config) => json_merge(config, &patch),
            None => self.config = Some(patch),
        }
        self.revision += 1;
    }

    /// Resynchronize a worker with the snapshot.
    ///
    /// The worker cache is reset to exactly the pinned set: stale
    /// unpinned entries are per worker warm cache and do not
    /// survive a synchronization point.
    pub async fn restore(&self, worker: &mut Worker) -> Result<()> {
        if worker.last_update >= self.revision {
            return Ok(());
        }
        log::debug!(
            "Restoring worker [{}] to revision {}",
            worker.id(),
            self.revision,
        );
        if let Some(config) = &self.config {
            worker.put_config(config).await?;
        }
        worker.clear_cache().await?;
        for uri in &self.projects {
            let info = worker.checkout_project(uri, true).await?;
            log::debug!("Restored project '{}' (status: {})", uri, info.status);
        }
        worker.last_update = self.revision;
        Ok(())
    }
}

// =======================
// Tests
// =======================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_state_tracking() {
        let mut restore = Restore::with_projects(["/p1".to_string()]);
        assert_eq!(restore.revision(), 1);

        restore.update_cache(State::Pull("/p2".into()));
        restore.update_cache(State::Pull("/p1".into()));
        assert_eq!(restore.projects().count(), 2);

        restore.update_cache(State::Remove("/p1".into()));
        assert_eq!(restore.projects().collect::<Vec<_>>(), vec!["/p2"]);

        restore.update_cache(State::Clear);
        assert_eq!(restore.projects().count(), 0);
        assert_eq!(restore.revision(), 5);
    }

    #[test]
    fn test_restore_config_merge() {
        let mut restore = Restore::with_projects([]);
        restore.update_config(serde_json::json!({"worker": {"num_processes": 2}}));
        restore.update_config(serde_json::json!({"worker": {"qgis": {"max_projects": 10}}}));
        assert_eq!(
            restore.config.unwrap(),
            serde_json::json!({
                "worker": {
                    "num_processes": 2,
                    "qgis": { "max_projects": 10 }
                }
            })
        );
    }
}
