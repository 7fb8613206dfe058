//!
//! Generic handler for engine project storages
//!
//! Covers every scheme whose projects live behind the engine's
//! project storage registry (`postgresql`, `geopackage`, `s3`).
//! The storage itself is opaque; the handler only needs metadata
//! and listing capabilities.
//!
use std::sync::Arc;
use url::Url;

use crate::errors::{Error, Result};
use crate::metadata::ProjectMetadata;

use super::ProtocolHandler;

/// Metadata as reported by a project storage
#[derive(Debug, Clone)]
pub struct StorageMetadata {
    pub name: String,
    pub last_modified: i64,
}

/// Opaque interface to an engine project storage
pub trait ProjectStore: Send + Sync {
    /// Storage backend tag (`postgresql`, `geopackage`, ...)
    fn storage_type(&self) -> &str;

    /// Check uri support; resolution failures on unsupported uris
    /// come from the search path configuration.
    fn is_supported_uri(&self, uri: &str) -> bool;

    /// Read storage metadata, `None` if the project is absent
    fn read_metadata(&self, uri: &str) -> Result<Option<StorageMetadata>>;

    /// List project uris under a root uri
    fn list_projects(&self, rooturi: &str) -> Result<Vec<String>>;
}

/// Storage backed scheme handler
#[derive(Clone)]
pub struct StorageHandler {
    store: Arc<dyn ProjectStore>,
}

impl StorageHandler {
    pub fn new(store: Arc<dyn ProjectStore>) -> Self {
        Self { store }
    }

    fn metadata_for(&self, uri: &str, scheme: &str) -> Result<ProjectMetadata> {
        match self.store.read_metadata(uri)? {
            Some(md) => Ok(ProjectMetadata {
                uri: uri.to_string(),
                name: md.name,
                scheme: scheme.to_string(),
                storage: self.store.storage_type().to_string(),
                last_modified: md.last_modified,
            }),
            None => Err(Error::NotFound(uri.to_string())),
        }
    }
}

impl ProtocolHandler for StorageHandler {
    fn validate_rooturl(&self, url: &Url) -> Result<()> {
        if self.store.is_supported_uri(url.as_str()) {
            Ok(())
        } else {
            Err(Error::InvalidRootUrl(
                url.to_string(),
                format!("unsupported uri for storage '{}'", self.store.storage_type()),
            ))
        }
    }

    fn resolve_uri(&self, url: &Url) -> Result<String> {
        let uri = url.as_str().to_string();
        if !self.store.is_supported_uri(&uri) {
            return Err(Error::InvalidUrl(uri));
        }
        Ok(uri)
    }

    fn public_path(&self, uri: &str, location: &str, rooturl: &Url) -> String {
        let root = rooturl.as_str().trim_end_matches('/');
        let relative = uri.strip_prefix(root).unwrap_or(uri);
        format!(
            "{}/{}",
            location.trim_end_matches('/'),
            relative.trim_start_matches('/')
        )
    }

    fn project_metadata(&self, uri: &str) -> Result<ProjectMetadata> {
        let scheme = uri.split(':').next().unwrap_or_default().to_string();
        self.metadata_for(uri, &scheme)
    }

    fn projects(&self, rooturl: &Url) -> Result<Vec<ProjectMetadata>> {
        self.store
            .list_projects(rooturl.as_str())?
            .iter()
            .map(|uri| self.metadata_for(uri, rooturl.scheme()))
            .collect()
    }
}
