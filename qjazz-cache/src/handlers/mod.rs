//!
//! Scheme protocol handlers
//!
//! Each url scheme accepted in search paths resolves to a handler
//! implementing the small capability interface below. The set of
//! schemes is closed: `file` is built in, other schemes
//! (`postgresql`, `geopackage`, `s3`) are backed by the engine's
//! project storage and registered at initialization.
//!
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use crate::errors::{Error, Result};
use crate::metadata::ProjectMetadata;

mod file;
mod storage;

pub use file::FileHandler;
pub use storage::{ProjectStore, StorageHandler, StorageMetadata};

/// Capability interface of a scheme handler
pub trait ProtocolHandler: Send + Sync {
    /// Validate a search path root url
    fn validate_rooturl(&self, url: &Url) -> Result<()>;

    /// Return the canonical uri for the given url.
    ///
    /// The canonical uri ensures unicity of the resource location
    /// and is used as the cache lookup key. Must be idempotent.
    fn resolve_uri(&self, url: &Url) -> Result<String>;

    /// Return the public path of a canonical uri relative to a
    /// search path location.
    ///
    /// Practically the reverse of a `resolve_path` + `resolve_uri`
    /// sequence.
    fn public_path(&self, uri: &str, location: &str, rooturl: &Url) -> String;

    /// Return project metadata for a canonical uri.
    ///
    /// Returns `Error::NotFound` if the storage reports absence.
    fn project_metadata(&self, uri: &str) -> Result<ProjectMetadata>;

    /// List all projects available under the given root url
    fn projects(&self, rooturl: &Url) -> Result<Vec<ProjectMetadata>>;
}

/// Scheme handler registry
#[derive(Clone, Default)]
pub struct Handlers {
    file: FileHandler,
    storage: HashMap<String, StorageHandler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a storage backed scheme
    pub fn register_store(&mut self, scheme: &str, store: Arc<dyn ProjectStore>) {
        self.storage
            .insert(scheme.to_string(), StorageHandler::new(store));
    }

    /// Return the handler for a scheme
    pub fn get(&self, scheme: &str) -> Result<&dyn ProtocolHandler> {
        match scheme {
            "file" => Ok(&self.file),
            other => self
                .storage
                .get(other)
                .map(|h| h as &dyn ProtocolHandler)
                .ok_or_else(|| Error::UnknownScheme(other.to_string())),
        }
    }
}
