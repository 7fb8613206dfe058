//!
//! Cache configuration
//!
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DEFAULT_MAX_PROJECTS: usize = 50;

/// Project cache configuration
///
/// `search_paths` maps public route prefixes to root urls:
///
/// ```toml
/// [worker.projects.search_paths]
/// "/france" = "file:/data/france/"
/// "/dyn/{loc}" = "file:/data/{loc}"
/// ```
///
/// Targets without an explicit scheme default to `file`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectsConfig {
    /// Route prefix to root url mapping
    pub search_paths: BTreeMap<String, String>,
    /// Allow absolute paths to bypass the search path table
    pub allow_direct_path_resolution: bool,
    /// Maximum number of projects kept in cache.
    /// New loads are rejected once the limit is reached;
    /// cached entries are left untouched.
    pub max_projects: usize,
    /// Refuse to serve projects that have invalid layers
    pub strict_check: bool,
    /// Tell the engine to trust layer metadata
    pub trust_layer_metadata: bool,
    /// Tell the engine to disable GetPrint requests
    pub disable_getprint: bool,
    /// Load layers in read-only mode
    pub force_readonly_layers: bool,
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            search_paths: BTreeMap::new(),
            allow_direct_path_resolution: false,
            max_projects: DEFAULT_MAX_PROJECTS,
            strict_check: true,
            trust_layer_metadata: false,
            disable_getprint: false,
            force_readonly_layers: false,
        }
    }
}
