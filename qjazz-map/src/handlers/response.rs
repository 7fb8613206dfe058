//
// Handle RPC responses
//
use actix_web::{
    http::{self, StatusCode},
    web, HttpRequest, HttpResponse, HttpResponseBuilder,
};
use futures::stream::StreamExt;
use std::str::FromStr;
use tonic::{
    self,
    metadata::{KeyAndValueRef, MetadataKey, MetadataMap, MetadataValue},
};

use crate::channel::{
    qjazz_service::{ApiRequest, OwsRequest, ResponseChunk},
    Channel,
};

struct AnyError;

impl<T> From<T> for AnyError
where
    T: std::error::Error,
{
    fn from(_: T) -> Self {
        Self
    }
}

// Hop-by-hop headers are owned by the gateway stream, never
// forwarded verbatim from the upstream response.
fn is_hop_by_hop(name: &str) -> bool {
    name.eq_ignore_ascii_case("content-length")
        || name.eq_ignore_ascii_case("transfer-encoding")
        || name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("keep-alive")
}

pub mod metadata {
    use super::*;

    // Convert request headers to metadata (infallible)
    pub fn insert_from_headers<F: FnMut(&str) -> bool>(
        md: &mut MetadataMap,
        headers: &http::header::HeaderMap,
        mut pred: F,
    ) {
        headers
            .iter()
            .filter(|(k, _)| pred(k.as_str()))
            .for_each(|(k, v)| {
                if let Ok(k) = MetadataKey::from_str(k.as_str()) {
                    if v.to_str()
                        .map_err(AnyError::from)
                        .and_then(|v| MetadataValue::from_str(v).map_err(AnyError::from))
                        .map(|v| md.insert(k, v))
                        .is_err()
                    {
                        log::error!("Invalid metadata value {:?}", v);
                    }
                } else {
                    log::error!("Failed to convert header key {:?}", k)
                }
            });
    }
}

//
// Wrap a response builder
//

pub struct RpcHttpResponseBuilder {
    builder: HttpResponseBuilder,
    status_code: StatusCode,
}

pub type ResponseStream = tonic::Response<tonic::codec::Streaming<ResponseChunk>>;

impl RpcHttpResponseBuilder {
    pub fn status_code(&self) -> &StatusCode {
        &self.status_code
    }

    pub fn stream_bytes(
        mut self,
        resp: ResponseStream,
        channel: web::Data<Channel>,
    ) -> HttpResponse {
        self.builder
            .streaming(resp.into_inner().map(move |res| match res {
                Ok(item) => Ok(web::Bytes::from(item.chunk)),
                Err(status) => {
                    log::error!("Backend streaming error:\t{}\t{}", channel.name(), status);
                    Err(status)
                }
            }))
    }

    pub fn from_metadata(metadata: &MetadataMap, request_id: Option<String>) -> Self {
        Self::builder_from_metadata(StatusCode::OK, metadata, request_id)
    }

    //
    // Handle response status and headers
    //
    pub fn builder_from_metadata(
        code: StatusCode,
        metadata: &MetadataMap,
        request_id: Option<String>,
    ) -> Self {
        let mut status_code = code;
        let mut builder = HttpResponseBuilder::new(code);

        if let Some(id) = request_id {
            builder.insert_header(("x-request-id", id));
        }

        for (k, v) in metadata.iter().filter_map(|kv| match kv {
            KeyAndValueRef::Ascii(k, v) => k
                .as_str()
                .strip_prefix("x-reply-")
                .and_then(|k| v.to_str().map(|v| (k, v)).ok()),
            _ => None,
        }) {
            match k {
                "status-code" => {
                    status_code = StatusCode::from_u16(
                        v.parse()
                            .inspect_err(|e| {
                                log::error!("OWS: Invalid status code {:?}", e);
                            })
                            .unwrap_or(500u16),
                    )
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                    builder.status(status_code);
                }
                _ => {
                    if let Some(h) = k.strip_prefix("header-") {
                        if !is_hop_by_hop(h) {
                            builder.insert_header((h, v));
                        }
                    }
                }
            }
        }

        Self {
            builder,
            status_code,
        }
    }

    // Create a http response from a gRPC status
    //
    // See https://grpc.io/docs/guides/status-codes/
    // for details about gRPC error codes.
    pub fn from_rpc_status(status: &tonic::Status, request_id: Option<String>) -> HttpResponse {
        let code = match status.code() {
            tonic::Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            tonic::Code::PermissionDenied => StatusCode::FORBIDDEN,
            // XXX Cancelled is usually a response to an action
            // from the caller; getting it here means that some
            // external cause occured on service side.
            tonic::Code::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            // Worker queue full: do not degrade to a server error
            tonic::Code::ResourceExhausted => StatusCode::SERVICE_UNAVAILABLE,
            tonic::Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            tonic::Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            tonic::Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            tonic::Code::Unauthenticated => StatusCode::UNAUTHORIZED,

            // User code generated errors,
            // see https://grpc.io/docs/guides/status-codes
            //
            // Usually occurs when a non engine error is raised
            // before reaching the embedded server.
            code => {
                let code = match code {
                    tonic::Code::InvalidArgument => StatusCode::BAD_REQUEST,
                    tonic::Code::NotFound => StatusCode::NOT_FOUND,
                    tonic::Code::AlreadyExists => StatusCode::CONFLICT,
                    tonic::Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
                    tonic::Code::Aborted => StatusCode::SERVICE_UNAVAILABLE,
                    // Consider other codes as legitimate replies
                    // or errors out of the gRPC namespace; the
                    // status code may be found in the metadata.
                    _ => StatusCode::OK,
                };

                return Self::builder_from_metadata(code, status.metadata(), request_id)
                    .builder
                    .content_type("text/plain")
                    .body(status.message().to_string());
            }
        };

        // Send an informative message
        HttpResponseBuilder::new(code)
            .content_type("text/plain")
            .body(if code.is_server_error() {
                // Do not leak internal error messages
                code.canonical_reason()
                    .unwrap_or("Server error")
                    .to_string()
            } else {
                status.message().to_string()
            })
    }
}

// Handle a response from an RPC stream
pub enum StreamedResponse {
    Fail(HttpResponse),
    Succ(RpcHttpResponseBuilder, ResponseStream),
}

impl StreamedResponse {
    pub fn into_response(self, channel: web::Data<Channel>) -> HttpResponse {
        match self {
            Self::Fail(resp) => resp,
            Self::Succ(builder, resp) => builder.stream_bytes(resp, channel),
        }
    }

    // Stream response chunks
    pub fn new(
        response: std::result::Result<ResponseStream, tonic::Status>,
        name: &str,
        request_id: Option<String>,
    ) -> StreamedResponse {
        match response {
            Err(status) => {
                log::error!("Backend error:\t{}\t{}", name, status);
                StreamedResponse::Fail(RpcHttpResponseBuilder::from_rpc_status(&status, request_id))
            }
            Ok(resp) => StreamedResponse::Succ(
                RpcHttpResponseBuilder::from_metadata(resp.metadata(), request_id),
                resp,
            ),
        }
    }
}

//
// RPC request execution
//

fn forward_metadata(req: &HttpRequest, channel: &Channel, metadata: &mut MetadataMap) {
    metadata::insert_from_headers(metadata, req.headers(), |k| channel.allow_header(k));
}

/// Execute an OWS request against the backend
pub async fn execute_ows_request(
    req: HttpRequest,
    channel: &web::Data<Channel>,
    request_id: Option<String>,
    message: OwsRequest,
) -> StreamedResponse {
    let mut request = tonic::Request::new(message);
    request.set_timeout(channel.timeout());
    forward_metadata(&req, channel, request.metadata_mut());

    StreamedResponse::new(
        channel.client().execute_ows_request(request).await,
        channel.name(),
        request_id,
    )
}

/// Execute an api request against the backend
pub async fn execute_api_request(
    req: HttpRequest,
    channel: &web::Data<Channel>,
    request_id: Option<String>,
    message: ApiRequest,
) -> StreamedResponse {
    let mut request = tonic::Request::new(message);
    request.set_timeout(channel.timeout());
    forward_metadata(&req, channel, request.metadata_mut());

    StreamedResponse::new(
        channel.client().execute_api_request(request).await,
        channel.name(),
        request_id,
    )
}

// Bad request helper with logging
pub fn bad_request(message: String) -> HttpResponse {
    log::error!("{}", message);
    HttpResponse::BadRequest()
        .content_type("text/plain")
        .body(message)
}
