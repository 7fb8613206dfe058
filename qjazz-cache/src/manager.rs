//!
//! Cache manager
//!
//! Single writer over the project entry table. Readers hold a
//! shared reference to the loaded document which stays valid
//! until the last reader releases it, even after eviction or
//! replacement.
//!
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

use crate::config::ProjectsConfig;
use crate::errors::{Error, Result};
use crate::handlers::{Handlers, ProtocolHandler};
use crate::loader::{ProjectDocument, ProjectLoader};
use crate::metadata::ProjectMetadata;
use crate::routes::{strip_route_prefix, Routes};
use crate::status::CheckoutStatus;

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A cached loaded project
pub struct CacheEntry<P> {
    metadata: ProjectMetadata,
    document: Arc<ProjectDocument<P>>,
    loaded_at: i64,
    last_hit: i64,
    hits: u64,
    pinned: bool,
}

impl<P> CacheEntry<P> {
    fn new(metadata: ProjectMetadata, document: ProjectDocument<P>) -> Self {
        let now = now_epoch();
        Self {
            metadata,
            document: Arc::new(document),
            loaded_at: now,
            last_hit: now,
            hits: 0,
            pinned: false,
        }
    }

    pub fn metadata(&self) -> &ProjectMetadata {
        &self.metadata
    }

    /// Shared handle on the loaded document.
    ///
    /// The handle stays valid until dropped, even if the entry is
    /// replaced or evicted meanwhile.
    pub fn document(&self) -> Arc<ProjectDocument<P>> {
        self.document.clone()
    }

    pub fn loaded_at(&self) -> i64 {
        self.loaded_at
    }
    pub fn last_hit(&self) -> i64 {
        self.last_hit
    }
    pub fn hits(&self) -> u64 {
        self.hits
    }
    pub fn pinned(&self) -> bool {
        self.pinned
    }

    fn hit(&mut self) {
        self.hits += 1;
        self.last_hit = now_epoch();
    }
}

/// Result of a read-only checkout
#[derive(Debug, Clone)]
pub enum CheckoutState {
    New(ProjectMetadata),
    Unchanged(String),
    NeedUpdate(ProjectMetadata),
    Removed(String),
    NotFound(String),
}

impl CheckoutState {
    pub fn status(&self) -> CheckoutStatus {
        match self {
            CheckoutState::New(_) => CheckoutStatus::New,
            CheckoutState::Unchanged(_) => CheckoutStatus::Unchanged,
            CheckoutState::NeedUpdate(_) => CheckoutStatus::NeedUpdate,
            CheckoutState::Removed(_) => CheckoutStatus::Removed,
            CheckoutState::NotFound(_) => CheckoutStatus::NotFound,
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            CheckoutState::New(md) | CheckoutState::NeedUpdate(md) => &md.uri,
            CheckoutState::Unchanged(uri)
            | CheckoutState::Removed(uri)
            | CheckoutState::NotFound(uri) => uri,
        }
    }
}

/// The project cache manager
pub struct CacheManager<L: ProjectLoader> {
    config: ProjectsConfig,
    routes: Routes,
    handlers: Handlers,
    loader: L,
    entries: HashMap<String, CacheEntry<L::Project>>,
}

impl<L: ProjectLoader> CacheManager<L> {
    pub fn new(config: ProjectsConfig, handlers: Handlers, loader: L) -> Result<Self> {
        let routes = Routes::from_paths(
            config
                .search_paths
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        )?;
        // Static roots must be valid for their scheme
        for (location, url) in routes.locations(None)? {
            handlers
                .get(url.scheme())?
                .validate_rooturl(&url)
                .map_err(|err| {
                    Error::InvalidRootUrl(location.clone(), err.to_string())
                })?;
        }
        Ok(Self {
            config,
            routes,
            handlers,
            loader,
            entries: HashMap::new(),
        })
    }

    pub fn config(&self) -> &ProjectsConfig {
        &self.config
    }

    pub fn handler(&self, scheme: &str) -> Result<&dyn ProtocolHandler> {
        self.handlers.get(scheme)
    }

    /// Map a public path to a storage url.
    ///
    /// `allow_direct` additionally permits absolute on-disk paths
    /// bypassing the search path table, subject to configuration.
    pub fn resolve_path(&self, path: &str, allow_direct: bool) -> Result<Url> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        if let Some((location, rooturl)) = self.routes.resolve_path(&path)? {
            let relative = strip_route_prefix(&path, &location).unwrap_or_default();
            return join_url(&rooturl, relative);
        }
        if allow_direct && self.config.allow_direct_path_resolution && Path::new(&path).is_absolute()
        {
            return Url::parse(&format!("file:{path}"))
                .map_err(|err| Error::InvalidUrl(err.to_string()));
        }
        Err(Error::ResourceNotAllowed(path))
    }

    /// Compute the checkout state of a project url.
    ///
    /// Read-only: the cache is left untouched.
    pub fn checkout(&self, url: &Url) -> Result<CheckoutState> {
        let handler = self.handlers.get(url.scheme())?;
        let uri = handler.resolve_uri(url)?;
        match handler.project_metadata(&uri) {
            Ok(md) => match self.entries.get(&uri) {
                None => Ok(CheckoutState::New(md)),
                Some(entry) => {
                    if md.is_newer_than(entry.metadata()) {
                        Ok(CheckoutState::NeedUpdate(md))
                    } else {
                        Ok(CheckoutState::Unchanged(uri))
                    }
                }
            },
            Err(Error::NotFound(_)) => {
                if self.entries.contains_key(&uri) {
                    Ok(CheckoutState::Removed(uri))
                } else {
                    Ok(CheckoutState::NotFound(uri))
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Apply the mutation implied by a checkout state.
    ///
    /// Loads new projects, reloads outdated ones and releases
    /// removed entries. Returns the post-mutation entry along with
    /// the status to report.
    pub fn update(
        &mut self,
        state: CheckoutState,
    ) -> Result<(Option<&CacheEntry<L::Project>>, CheckoutStatus)> {
        match state {
            CheckoutState::New(md) => {
                if self.entries.len() >= self.config.max_projects {
                    return Err(Error::MaxProjectsReached(self.config.max_projects));
                }
                let uri = md.uri.clone();
                let document = self.load_document(&md)?;
                self.entries.insert(uri.clone(), CacheEntry::new(md, document));
                Ok((self.entries.get(&uri), CheckoutStatus::New))
            }
            CheckoutState::NeedUpdate(md) => {
                let uri = md.uri.clone();
                let document = self.load_document(&md)?;
                match self.entries.get_mut(&uri) {
                    Some(entry) => {
                        // Swap the handle; outstanding readers keep
                        // observing the previous document.
                        entry.document = Arc::new(document);
                        entry.metadata = md;
                        entry.loaded_at = now_epoch();
                    }
                    None => {
                        self.entries.insert(uri.clone(), CacheEntry::new(md, document));
                    }
                }
                Ok((self.entries.get(&uri), CheckoutStatus::Updated))
            }
            CheckoutState::Unchanged(uri) => {
                Ok((self.entries.get(&uri), CheckoutStatus::Unchanged))
            }
            CheckoutState::Removed(uri) => {
                self.entries.remove(&uri);
                Ok((None, CheckoutStatus::Removed))
            }
            CheckoutState::NotFound(_) => Ok((None, CheckoutStatus::NotFound)),
        }
    }

    fn load_document(&self, md: &ProjectMetadata) -> Result<ProjectDocument<L::Project>> {
        let document = self.loader.load(md, &self.config)?;
        if self.config.strict_check && document.has_bad_layers() {
            return Err(Error::StrictCheckingFailure(md.uri.clone()));
        }
        Ok(document)
    }

    /// Mark an entry as pinned or unpinned.
    ///
    /// Pinned entries survive cache maintenance but not explicit
    /// `drop_project` or `clear`.
    pub fn pin(&mut self, uri: &str, pinned: bool) -> bool {
        match self.entries.get_mut(uri) {
            Some(entry) => {
                entry.pinned = pinned;
                true
            }
            None => false,
        }
    }

    /// Record a cache hit
    pub fn hit(&mut self, uri: &str) {
        if let Some(entry) = self.entries.get_mut(uri) {
            entry.hit();
        }
    }

    /// Evict a project, pinned or not
    pub fn drop_project(&mut self, uri: &str) -> Option<ProjectMetadata> {
        self.entries.remove(uri).map(|entry| entry.metadata)
    }

    /// Evict everything, pinned or not
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, uri: &str) -> Option<&CacheEntry<L::Project>> {
        self.entries.get(uri)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry<L::Project>> {
        self.entries.values()
    }

    /// Refresh every entry against its storage.
    ///
    /// Outdated entries are reloaded; entries whose storage
    /// disappeared are evicted unless pinned. Returns the status
    /// observed for each entry.
    pub fn update_cache(&mut self) -> Result<Vec<(String, CheckoutStatus)>> {
        let uris: Vec<String> = self.entries.keys().cloned().collect();
        let mut report = Vec::with_capacity(uris.len());
        for uri in uris {
            let scheme = self.entries[&uri].metadata.scheme.clone();
            let state = match self.handlers.get(&scheme)?.project_metadata(&uri) {
                Ok(md) => {
                    if md.is_newer_than(self.entries[&uri].metadata()) {
                        CheckoutState::NeedUpdate(md)
                    } else {
                        CheckoutState::Unchanged(uri.clone())
                    }
                }
                Err(Error::NotFound(_)) => {
                    if self.entries[&uri].pinned() {
                        // Maintenance never evicts pinned entries
                        report.push((uri, CheckoutStatus::Removed));
                        continue;
                    }
                    CheckoutState::Removed(uri.clone())
                }
                Err(err) => return Err(err),
            };
            let (_, status) = self.update(state)?;
            report.push((uri, status));
        }
        Ok(report)
    }

    /// List all projects known from the search paths.
    ///
    /// Returns project metadata along with the public path under
    /// which each project is reachable.
    pub fn collect_projects(
        &self,
        prefix: Option<&str>,
    ) -> Result<Vec<(ProjectMetadata, String)>> {
        let mut collected = Vec::new();
        for (location, rooturl) in self.routes.locations(prefix)? {
            let handler = self.handlers.get(rooturl.scheme())?;
            for md in handler.projects(&rooturl)? {
                let public_path = handler.public_path(&md.uri, &location, &rooturl);
                collected.push((md, public_path));
            }
        }
        Ok(collected)
    }
}

// Join a relative public path onto a root url, preserving any
// query part of the root.
fn join_url(rooturl: &Url, relative: &str) -> Result<Url> {
    let mut url = rooturl.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| Error::InvalidUrl(rooturl.to_string()))?;
        segments.pop_if_empty();
        for part in relative.split('/').filter(|s| !s.is_empty()) {
            segments.push(part);
        }
    }
    Ok(url)
}
