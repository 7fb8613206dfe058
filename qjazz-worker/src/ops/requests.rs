//!
//! Server request operations
//!
use std::sync::Arc;

use qjazz_cache::loader::ProjectDocument;
use qjazz_cache::{CacheManager, CheckoutState, CheckoutStatus, ProjectLoader};

use super::error_status;
use crate::config::QgisConfig;
use crate::connection::{Connection, Reply};
use crate::engine::{QgisEngine, ServerRequest};
use crate::errors::Result;
use crate::messages::{ApiRequestMsg, HttpMethod, OwsRequestMsg};
use crate::response::Response;
use crate::signals::Feedback;
use crate::utils::to_rfc822;

const MISSING_PROJECT_ERROR_MSG: &str = "No project defined";

// Root path under which delegated api requests are rebuilt
const DELEGATE_ROOT: &str = "/_delegate";

/// Handle an OWS request
#[allow(clippy::too_many_arguments)]
pub fn handle_ows_request<C, E, L>(
    conn: &mut C,
    msg: &OwsRequestMsg,
    engine: &E,
    cm: &mut CacheManager<L>,
    conf: &QgisConfig,
    cache_id: &str,
    feedback: &Feedback,
) -> Result<()>
where
    C: Connection,
    E: QgisEngine,
    L: ProjectLoader<Project = E::Project>,
{
    if msg.target.is_empty() {
        return conn.send_reply(400, MISSING_PROJECT_ERROR_MSG);
    }

    // Rebuild the url for the embedded server
    let mut url = format!(
        "{}?SERVICE={}&REQUEST={}",
        msg.url.as_deref().unwrap_or_default(),
        msg.service,
        msg.request,
    );
    if let Some(version) = &msg.version {
        url.push_str("&VERSION=");
        url.push_str(version);
    }
    if let Some(options) = &msg.options {
        if !options.is_empty() {
            url.push('&');
            url.push_str(options);
        }
    }

    let params = GenericRequest {
        url,
        target: Some(&msg.target),
        direct: msg.direct,
        body: msg.body.as_deref().map(|v| v.as_slice()),
        method: msg.method.unwrap_or(HttpMethod::GET),
        headers: &msg.headers,
        request_id: msg.request_id.as_deref(),
        header_prefix: msg.header_prefix.as_deref(),
    };
    handle_generic_request(conn, params, engine, cm, conf, cache_id, feedback)
}

/// Handle an OGC api request
#[allow(clippy::too_many_arguments)]
pub fn handle_api_request<C, E, L>(
    conn: &mut C,
    msg: &ApiRequestMsg,
    engine: &E,
    cm: &mut CacheManager<L>,
    conf: &QgisConfig,
    cache_id: &str,
    feedback: &Feedback,
) -> Result<()>
where
    C: Connection,
    E: QgisEngine,
    L: ProjectLoader<Project = E::Project>,
{
    let base = msg.url.as_deref().unwrap_or_default().trim_end_matches('/');
    let mut headers = msg.headers.clone();

    let mut url = if msg.delegate {
        // Delegated api: rebuild under the delegate root and pass
        // the api name as header.
        headers.push(("x-qgis-api".into(), msg.name.clone()));
        format!(
            "{}{}/{}",
            base,
            DELEGATE_ROOT,
            msg.path.trim_start_matches('/')
        )
    } else if msg.path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, msg.path.trim_start_matches('/'))
    };
    if let Some(options) = &msg.options {
        if !options.is_empty() {
            url.push('?');
            url.push_str(options);
        }
    }

    let params = GenericRequest {
        url,
        target: msg.target.as_deref(),
        direct: msg.direct,
        body: msg.data.as_deref().map(|v| v.as_slice()),
        method: msg.method,
        headers: &headers,
        request_id: msg.request_id.as_deref(),
        header_prefix: msg.header_prefix.as_deref(),
    };
    handle_generic_request(conn, params, engine, cm, conf, cache_id, feedback)
}

struct GenericRequest<'m> {
    url: String,
    target: Option<&'m str>,
    direct: bool,
    body: Option<&'m [u8]>,
    method: HttpMethod,
    headers: &'m [(String, String)],
    request_id: Option<&'m str>,
    header_prefix: Option<&'m str>,
}

fn handle_generic_request<C, E, L>(
    conn: &mut C,
    params: GenericRequest<'_>,
    engine: &E,
    cm: &mut CacheManager<L>,
    conf: &QgisConfig,
    cache_id: &str,
    feedback: &Feedback,
) -> Result<()>
where
    C: Connection,
    E: QgisEngine,
    L: ProjectLoader<Project = E::Project>,
{
    let mut response_headers: Vec<(String, String)> = Vec::new();
    let mut checkout_status = None;

    let project: Option<Arc<ProjectDocument<E::Project>>> = match params.target {
        Some(target) => match project_from_cache(cm, target, params.direct) {
            Ok((status, uri)) => {
                cm.hit(&uri);
                let entry = cm.get(&uri).expect("entry just checked out");
                response_headers.push((
                    "last-modified".into(),
                    to_rfc822(entry.metadata().last_modified),
                ));
                response_headers.push((
                    "x-qgis-cache".into(),
                    if matches!(status, CheckoutStatus::New | CheckoutStatus::Updated) {
                        "MISS".into()
                    } else {
                        "HIT".into()
                    },
                ));
                checkout_status = Some(status.into());
                Some(entry.document())
            }
            Err((status, message)) => {
                return conn.send_reply(status, message);
            }
        },
        None => None,
    };

    if let Some(request_id) = params.request_id {
        response_headers.push(("x-request-id".into(), request_id.into()));
    }

    let request = ServerRequest {
        url: params.url,
        method: params.method,
        headers: params.headers,
        body: params.body,
    };

    let mut response = Response::new(conn, conf.max_chunk_size, feedback.clone())
        .header_prefix(params.header_prefix)
        .target(params.target)
        .checkout_status(checkout_status)
        .cache_id(cache_id);

    use crate::engine::ResponseSink;
    for (name, value) in &response_headers {
        response.set_header(name, value);
    }

    match engine.handle_request(&request, project.as_deref(), &mut response, feedback) {
        Ok(()) => response.finish(),
        Err(err) if response.headers_sent() => {
            // Too late for an error reply: terminate the
            // truncated stream.
            log::error!("Engine error after response head: {err:?}");
            response.finish()
        }
        Err(err) => {
            log::error!("Engine error: {err:?}");
            response.send_error(500, &err.to_string())
        }
    }
}

// Checkout and load the target project, translating failures to
// reply status codes.
fn project_from_cache<L: ProjectLoader>(
    cm: &mut CacheManager<L>,
    target: &str,
    allow_direct: bool,
) -> std::result::Result<(CheckoutStatus, String), (i64, String)> {
    let url = cm
        .resolve_path(target, allow_direct)
        .map_err(|err| (error_status(&err), err.to_string()))?;
    let state = cm
        .checkout(&url)
        .map_err(|err| (error_status(&err), err.to_string()))?;
    let uri = state.uri().to_string();
    match state {
        CheckoutState::New(_) | CheckoutState::NeedUpdate(_) | CheckoutState::Unchanged(_) => {
            let (_, status) = cm
                .update(state)
                .map_err(|err| (error_status(&err), err.to_string()))?;
            Ok((status, uri))
        }
        CheckoutState::Removed(_) => {
            // Release the stale entry
            let _ = cm.update(state);
            Err((410, format!("project '{target}' was removed")))
        }
        CheckoutState::NotFound(_) => Err((404, format!("project '{target}' not found"))),
    }
}
