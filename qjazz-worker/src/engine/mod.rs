//!
//! Embedded server engine abstraction
//!
//! The actual map server (QGIS) is an opaque in-process library:
//! the runtime only needs it to load projects, process requests
//! against them and expose its plugin registry. A self contained
//! dummy implementation is provided for development and tests;
//! real bindings plug in behind the same trait.
//!
use std::rc::Rc;

use qjazz_cache::{loader::ProjectDocument, ProjectLoader, ProjectMetadata, ProjectsConfig};
use serde_json::Value as JsonValue;

use crate::errors::Result;
use crate::messages::{HttpMethod, PluginInfo};
use crate::signals::Feedback;

mod dummy;

pub use dummy::DummyEngine;

/// A request forwarded to the embedded server
#[derive(Debug)]
pub struct ServerRequest<'a> {
    pub url: String,
    pub method: HttpMethod,
    pub headers: &'a [(String, String)],
    pub body: Option<&'a [u8]>,
}

/// Sink the engine writes its response into
pub trait ResponseSink {
    fn set_status(&mut self, code: i64);
    fn set_header(&mut self, name: &str, value: &str);
    fn write(&mut self, data: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// The embedded server capability interface
pub trait QgisEngine {
    type Project;

    /// Load a project from its metadata
    fn load_project(
        &self,
        md: &ProjectMetadata,
        config: &ProjectsConfig,
    ) -> qjazz_cache::Result<ProjectDocument<Self::Project>>;

    /// Process a request, writing the response into the sink.
    ///
    /// The feedback flag is polled by the engine to abort the
    /// in-flight operation on cancellation.
    fn handle_request(
        &self,
        request: &ServerRequest<'_>,
        project: Option<&ProjectDocument<Self::Project>>,
        response: &mut dyn ResponseSink,
        feedback: &Feedback,
    ) -> Result<()>;

    /// Loaded plugins
    fn plugins(&self) -> Vec<PluginInfo>;

    /// Engine versions and environment report
    fn environment(&self) -> JsonValue;
}

/// Adapter exposing a shared engine as the cache project loader
pub struct EngineLoader<E: QgisEngine>(Rc<E>);

impl<E: QgisEngine> EngineLoader<E> {
    pub fn new(engine: Rc<E>) -> Self {
        Self(engine)
    }
}

impl<E: QgisEngine> ProjectLoader for EngineLoader<E> {
    type Project = E::Project;

    fn load(
        &self,
        md: &ProjectMetadata,
        config: &ProjectsConfig,
    ) -> qjazz_cache::Result<ProjectDocument<Self::Project>> {
        self.0.load_project(md, config)
    }
}

/// Export the engine environment expected by the embedded server.
///
/// The worker owns project caching, the engine internal cache is
/// disabled.
pub fn setup_environment(config: &ProjectsConfig) {
    if config.trust_layer_metadata {
        std::env::set_var("QGIS_SERVER_TRUST_LAYER_METADATA", "yes");
    }
    if config.disable_getprint {
        std::env::set_var("QGIS_SERVER_DISABLE_GETPRINT", "yes");
    }
    std::env::set_var("QGIS_SERVER_PROJECT_CACHE_STRATEGY", "off");
}
