use crate::channel::{ApiEndPoint, Channel};
use crate::router;
use actix_web::{http, web, HttpRequest, HttpResponse, Responder};

pub mod admin;
pub mod catalog;
pub mod landing_page;
pub mod response;
pub mod utils;

use crate::channel::qjazz_service::{ApiRequest, OwsRequest};
use response::{bad_request, execute_api_request, execute_ows_request};
use utils::request;

type Args = Vec<(String, String)>;

// Query arguments as an ordered list; OWS argument names are
// matched case insensitively.
fn parse_args(query: &str) -> Result<Args, String> {
    serde_urlencoded::from_str(query).map_err(|err| format!("Invalid arguments: {err}"))
}

// Options forwarded to the backend: everything but the
// parameters carried by the message itself.
fn encode_options(args: &Args) -> Option<String> {
    let rest: Args = args
        .iter()
        .filter(|(k, _)| {
            !["SERVICE", "REQUEST", "VERSION", "MAP"]
                .iter()
                .any(|excl| k.eq_ignore_ascii_case(excl))
        })
        .cloned()
        .collect();
    if rest.is_empty() {
        None
    } else {
        serde_urlencoded::to_string(rest).ok()
    }
}

//
// Ows handlers
//

pub mod ows {

    use super::*;

    async fn ows_response(
        req: HttpRequest,
        channel: web::Data<Channel>,
        mut args: Args,
        path_tail: Option<&str>,
        data: web::Bytes,
    ) -> HttpResponse {
        let Some(service) = router::ows_param("SERVICE", &args).map(str::to_string) else {
            return HttpResponse::NotFound()
                .content_type("text/plain")
                .body("Missing SERVICE parameter");
        };

        router::clamp_getfeature(channel.getfeature_limit(), &mut args);

        let request_id = request::request_id(&req).map(String::from);
        let content_type =
            request::header_as_str(&req, http::header::CONTENT_TYPE).map(String::from);

        let target = router::resolve_project(&req, &args, path_tail).unwrap_or_default();
        let data = data.to_vec();

        let message = OwsRequest {
            request: router::ows_param("REQUEST", &args)
                .unwrap_or_default()
                .to_string(),
            version: router::ows_param("VERSION", &args).map(str::to_string),
            options: encode_options(&args),
            service,
            target,
            url: Some(request::location(&req)),
            direct: channel.allow_direct_resolution(),
            method: Some(req.method().as_str().to_string()),
            body: (!data.is_empty()).then_some(data),
            request_id: request_id.clone(),
            content_type,
        };

        execute_ows_request(req, &channel, request_id, message)
            .await
            .into_response(channel)
    }

    // Handle a request with query arguments
    pub async fn query_handler(
        req: HttpRequest,
        channel: web::Data<Channel>,
        bytes: web::Bytes,
    ) -> impl Responder {
        match parse_args(req.query_string()) {
            Err(message) => bad_request(message),
            Ok(args) => ows_response(req, channel, args, None, bytes).await,
        }
    }

    // Handle a www-form-urlencoded request
    pub async fn form_handler(
        req: HttpRequest,
        channel: web::Data<Channel>,
        bytes: web::Bytes,
    ) -> impl Responder {
        // NOTE: we cannot have both Bytes and Form at the same
        // time since Form would consume the payload.
        match serde_urlencoded::from_bytes::<Args>(&bytes) {
            Err(err) => bad_request(format!("Invalid OWS www-form-data body: {err}")),
            Ok(args) => ows_response(req, channel, args, None, bytes).await,
        }
    }

    // Handle an OWS request carrying the project as path tail
    // after the route prefix.
    pub async fn path_handler(
        req: HttpRequest,
        channel: web::Data<Channel>,
        tail: web::Path<String>,
        bytes: web::Bytes,
    ) -> impl Responder {
        let tail = format!("/{}", tail.into_inner());
        match parse_args(req.query_string()) {
            Err(message) => bad_request(message),
            Ok(args) => ows_response(req, channel, args, Some(&tail), bytes).await,
        }
    }
}

//
// Api handlers
//

pub mod api {

    use super::*;

    async fn api_response(
        req: HttpRequest,
        channel: web::Data<Channel>,
        path: String,
        data: web::Bytes,
        endpoint: web::Data<ApiEndPoint>,
    ) -> HttpResponse {
        let args = match parse_args(req.query_string()) {
            Err(message) => return bad_request(message),
            Ok(args) => args,
        };

        let request_id = request::request_id(&req).map(String::from);
        let content_type =
            request::header_as_str(&req, http::header::CONTENT_TYPE).map(String::from);

        let message = ApiRequest {
            name: endpoint.name.clone(),
            path,
            target: router::resolve_project(&req, &args, None),
            url: Some(request::location(&req)),
            direct: channel.allow_direct_resolution(),
            options: encode_options(&args),
            method: req.method().as_str().to_string(),
            data: (!data.is_empty()).then(|| data.to_vec()),
            delegate: endpoint.delegate,
            request_id: request_id.clone(),
            content_type,
        };

        execute_api_request(req, &channel, request_id, message)
            .await
            .into_response(channel)
    }

    // Handlers
    pub async fn handler(
        req: HttpRequest,
        channel: web::Data<Channel>,
        path: web::Path<String>,
        data: web::Bytes,
        endpoint: web::Data<ApiEndPoint>,
    ) -> impl Responder {
        let path = format!("/{}", path.into_inner());
        api_response(req, channel, path, data, endpoint).await
    }

    pub async fn default_handler(
        req: HttpRequest,
        channel: web::Data<Channel>,
        data: web::Bytes,
        endpoint: web::Data<ApiEndPoint>,
    ) -> impl Responder {
        api_response(req, channel, String::default(), data, endpoint).await
    }
}
