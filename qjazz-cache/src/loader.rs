//!
//! Project loading interface
//!
//! The cache never loads a project itself: it delegates to a
//! loader owned by the embedding runtime. The loaded project is
//! opaque; the loader only reports the inspection data the cache
//! and its clients need.
//!
use std::collections::HashMap;

use crate::config::ProjectsConfig;
use crate::errors::Result;
use crate::metadata::ProjectMetadata;

/// Summary of a project layer
#[derive(Debug, Clone)]
pub struct LayerSummary {
    pub layer_id: String,
    pub name: String,
    pub source: String,
    pub crs: String,
    pub is_valid: bool,
    pub is_spatial: bool,
}

/// A loaded project with its inspection data
#[derive(Debug)]
pub struct ProjectDocument<P> {
    pub project: P,
    pub filename: String,
    pub crs: String,
    pub saved_version: Option<String>,
    pub layers: Vec<LayerSummary>,
    pub debug_metadata: HashMap<String, i64>,
}

impl<P> ProjectDocument<P> {
    pub fn has_bad_layers(&self) -> bool {
        self.layers.iter().any(|layer| !layer.is_valid)
    }
}

/// Project loading capability
pub trait ProjectLoader {
    type Project;

    fn load(
        &self,
        md: &ProjectMetadata,
        config: &ProjectsConfig,
    ) -> Result<ProjectDocument<Self::Project>>;
}
