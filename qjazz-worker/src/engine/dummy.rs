//!
//! Self contained engine implementation
//!
//! Serves deterministic payloads out of plain project files; used
//! for development and for driving the worker protocol in tests
//! without the native server library.
//!
use std::time::{Duration, Instant};

use qjazz_cache::loader::{LayerSummary, ProjectDocument};
use qjazz_cache::{Error as CacheError, ProjectMetadata, ProjectsConfig};
use serde_json::{json, Value as JsonValue};

use super::{QgisEngine, ResponseSink, ServerRequest};
use crate::errors::{Error, Result};
use crate::messages::PluginInfo;
use crate::signals::Feedback;

pub struct DummyProject {
    pub source: String,
}

#[derive(Default)]
pub struct DummyEngine;

impl DummyEngine {
    pub fn new() -> Self {
        Self
    }
}

// Query parameter lookup, case insensitive on the key
fn query_param<'a>(url: &'a str, key: &str) -> Option<&'a str> {
    let (_, query) = url.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        k.eq_ignore_ascii_case(key).then_some(v)
    })
}

impl QgisEngine for DummyEngine {
    type Project = DummyProject;

    fn load_project(
        &self,
        md: &ProjectMetadata,
        _config: &ProjectsConfig,
    ) -> qjazz_cache::Result<ProjectDocument<DummyProject>> {
        let source =
            std::fs::read_to_string(&md.uri).map_err(|_| CacheError::NotFound(md.uri.clone()))?;
        Ok(ProjectDocument {
            project: DummyProject {
                source: source.clone(),
            },
            filename: md.uri.clone(),
            crs: "EPSG:4326".into(),
            saved_version: Some("dummy-1.0".into()),
            layers: vec![LayerSummary {
                layer_id: format!("{}_0", md.name),
                name: "Layer".into(),
                source: md.uri.clone(),
                crs: "EPSG:4326".into(),
                is_valid: !md.name.ends_with("_invalid"),
                is_spatial: true,
            }],
            debug_metadata: Default::default(),
        })
    }

    fn handle_request(
        &self,
        request: &ServerRequest<'_>,
        project: Option<&ProjectDocument<DummyProject>>,
        response: &mut dyn ResponseSink,
        feedback: &Feedback,
    ) -> Result<()> {
        let service = query_param(&request.url, "SERVICE").unwrap_or("");
        let ows_request = query_param(&request.url, "REQUEST").unwrap_or("");

        // Test hooks driven by the request name
        match ows_request {
            "qjazz-hang" => {
                // Simulate a long rendering job polling the
                // engine feedback.
                let deadline = Instant::now() + Duration::from_secs(30);
                while Instant::now() < deadline {
                    if feedback.is_cancelled() {
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
            "qjazz-error" => {
                return Err(Error::Engine("requested failure".into()));
            }
            _ => (),
        }

        response.set_status(200);
        response.set_header("content-type", "text/xml;charset=utf-8");

        let filename = project.map(|doc| doc.filename.as_str()).unwrap_or("");
        response.write(
            format!("<{} request=\"{}\" project=\"{}\">", service, ows_request, filename)
                .as_bytes(),
        )?;
        if let Some(doc) = project {
            response.write(doc.project.source.as_bytes())?;
        }
        if let Some(body) = request.body {
            response.write(body)?;
        }
        response.write(format!("</{}>", service).as_bytes())?;
        response.flush()
    }

    fn plugins(&self) -> Vec<PluginInfo> {
        vec![PluginInfo {
            name: "dummy_plugin".into(),
            path: "/usr/share/qjazz/plugins/dummy".into(),
            plugin_type: "server".into(),
            metadata: json!({
                "general": {
                    "name": "dummy_plugin",
                    "version": "1.0",
                }
            }),
        }]
    }

    fn environment(&self) -> JsonValue {
        json!({
            "qgis_version": 0,
            "qgis_release": "dummy",
            "versions": [format!("qjazz-worker {}", env!("CARGO_PKG_VERSION"))],
            "environment": std::env::vars().collect::<std::collections::HashMap<_, _>>(),
        })
    }
}
