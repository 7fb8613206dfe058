//!
//! Worker configuration
//!
//! The supervisor passes the engine configuration as JSON in the
//! `CONF_WORKER__QGIS` environment variable; single values may be
//! overridden with `CONF_WORKER__QGIS__<FIELD>` variables.
//!
use qjazz_cache::ProjectsConfig;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

pub const CONF_QGIS: &str = "CONF_WORKER__QGIS";
pub const CONF_MAX_CHUNK_SIZE: &str = "CONF_WORKER__QGIS__MAX_CHUNK_SIZE";
pub const CONF_LOG_LEVEL: &str = "CONF_LOGGING__LEVEL";

/// Default project loaded at startup
pub const ENV_PROJECT_FILE: &str = "QGIS_PROJECT_FILE";

const DEFAULT_MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QgisConfig {
    /// Project cache configuration
    pub projects: ProjectsConfig,
    /// Maximum chunk size for streamed responses
    pub max_chunk_size: usize,
    /// Keep running on SIGINT; the parent controls the
    /// worker lifecycle.
    pub ignore_interrupt_signal: bool,
}

impl Default for QgisConfig {
    fn default() -> Self {
        Self {
            projects: ProjectsConfig::default(),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            ignore_interrupt_signal: true,
        }
    }
}

impl QgisConfig {
    /// Read the configuration from the environment
    pub fn from_env() -> Result<Self> {
        let mut conf: Self = match std::env::var(CONF_QGIS) {
            Ok(doc) => serde_json::from_str(&doc)
                .map_err(|err| Error::InvalidConfig(format!("{CONF_QGIS}: {err}")))?,
            Err(_) => Self::default(),
        };
        if let Ok(size) = std::env::var(CONF_MAX_CHUNK_SIZE) {
            conf.max_chunk_size = size
                .parse()
                .map_err(|err| Error::InvalidConfig(format!("{CONF_MAX_CHUNK_SIZE}: {err}")))?;
        }
        Ok(conf)
    }

    /// Apply a json merge patch and revalidate
    pub fn patch(&self, patch: &serde_json::Value) -> Result<Self> {
        let mut doc = serde_json::to_value(self)
            .map_err(|err| Error::InvalidConfig(err.to_string()))?;
        crate::utils::json_merge(&mut doc, patch);
        serde_json::from_value(doc).map_err(|err| Error::InvalidConfig(err.to_string()))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Install the logger from the `CONF_LOGGING__LEVEL` variable.
///
/// The worker logs to stderr only: stdout belongs to the framing
/// layer.
pub fn init_logging() {
    let level = std::env::var(CONF_LOG_LEVEL)
        .ok()
        .and_then(|level| match level.to_ascii_lowercase().as_str() {
            "critical" => Some(log::LevelFilter::Off),
            "error" => Some(log::LevelFilter::Error),
            "warning" => Some(log::LevelFilter::Warn),
            "info" => Some(log::LevelFilter::Info),
            "debug" => Some(log::LevelFilter::Debug),
            "trace" => Some(log::LevelFilter::Trace),
            _ => None,
        })
        .unwrap_or(log::LevelFilter::Info);

    env_logger::Builder::new()
        .filter_level(level)
        .target(env_logger::Target::Stderr)
        .init();
}

// =======================
// Tests
// =======================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_patch() {
        let conf = QgisConfig::default();
        let patched = conf
            .patch(&serde_json::json!({
                "max_chunk_size": 4096,
                "projects": { "max_projects": 2 }
            }))
            .unwrap();
        assert_eq!(patched.max_chunk_size, 4096);
        assert_eq!(patched.projects.max_projects, 2);
        // Untouched fields keep their values
        assert!(patched.ignore_interrupt_signal);
    }

    #[test]
    fn test_config_patch_rejects_invalid() {
        let conf = QgisConfig::default();
        assert!(conf
            .patch(&serde_json::json!({ "max_chunk_size": "not a number" }))
            .is_err());
    }
}
