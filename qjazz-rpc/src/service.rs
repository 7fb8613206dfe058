//
// QGIS server servicer
//
use std::pin::Pin;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, Stream};
use tonic::{Request, Response, Status};

use crate::utils::{headers_to_metadata, metadata_to_headers};

// QJazz gRPC services
pub mod qjazz_service {
    tonic::include_proto!("qjazz"); // proto package
}

use qjazz_service::{
    collections_page::CollectionsItem, ApiRequest, CollectionsPage, CollectionsRequest,
    OwsRequest, PingReply, PingRequest, ResponseChunk,
};

pub mod admin;

/// Convert worker reply errors to a gRPC status whenever a
/// canonical code exists; other status codes travel in the
/// metadata so that the gateway can synthesize the proper HTTP
/// response.
fn reply_error(err: qjazz_pool::Error) -> Status {
    match err {
        qjazz_pool::Error::ResponseError(code, msg) => match code {
            404 | 410 => Status::not_found(msg.to_string()),
            403 => Status::permission_denied(msg.to_string()),
            401 => Status::unauthenticated(msg.to_string()),
            500 => Status::internal(msg.to_string()),
            _ => {
                let mut status = Status::unknown(msg.to_string());
                status
                    .metadata_mut()
                    .insert("x-reply-status-code", code.into());
                status
            }
        },
        qjazz_pool::Error::WorkerProcessDead | qjazz_pool::Error::WorkerStalled => {
            Status::unavailable(err)
        }
        _ => Status::unknown(err),
    }
}

/// Reply header names forwarded by the workers are built with
/// this prefix so that they map directly to response metadata.
const HEADER_PREFIX: &str = "x-reply-header-";

//
// Wrapper around the worker queue
//
pub struct Inner(qjazz_pool::Receiver);

impl Inner {
    // Wait for an available worker
    pub async fn get_worker(&self) -> Result<qjazz_pool::ScopedWorker, Status> {
        self.0.get().await.map_err(|err| match err {
            qjazz_pool::Error::MaxRequestsExceeded => Status::resource_exhausted(err),
            qjazz_pool::Error::QueueIsClosed => Status::unavailable(err),
            _ => Status::unknown(err),
        })
    }

    pub fn get_ref(&self) -> &qjazz_pool::Receiver {
        &self.0
    }

    async fn ping(&self, echo: &str) -> Result<String, Status> {
        let mut w = self.get_worker().await?;
        let echo = w.ping(echo).await.map_err(reply_error)?;
        w.done();
        Ok(echo)
    }
}

type ResponseChunkStream = Pin<Box<dyn Stream<Item = Result<ResponseChunk, Status>> + Send>>;

// Relay the response body to the rpc stream and build the
// response carrying the reply head as metadata.
//
// Chunks go through a capacity-1 channel, one at a time: a slow
// client slows the worker down without buffering memory.
fn stream_response(
    mut w: qjazz_pool::ScopedWorker,
    reply: qjazz_pool::messages::RequestReply,
) -> Response<ResponseChunkStream> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        {
            let mut stream = match w.byte_stream() {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = tx.send(Err(Status::unknown(err))).await;
                    return;
                }
            };
            loop {
                let item = match stream.next().await {
                    Ok(Some(chunk)) => Ok(ResponseChunk {
                        chunk: chunk.into(),
                    }),
                    Ok(None) => break,
                    Err(err) => Err(Status::unknown(err)),
                };
                if tx.send(item).await.is_err() {
                    log::error!("Connection cancelled by client");
                    return;
                }
            }
        }
        w.done();
    });

    let mut response =
        Response::new(Box::pin(ReceiverStream::new(rx)) as ResponseChunkStream);
    headers_to_metadata(response.metadata_mut(), reply.status_code, &reply.headers);
    response
}

//
// The QGIS server service
//
use qjazz_service::qgis_server_server::QgisServer;
// Reexport
pub(crate) use qjazz_service::qgis_server_server::QgisServerServer;

pub(crate) struct QgisServerServicer {
    inner: Inner,
}

impl QgisServerServicer {
    pub(crate) fn new(queue: qjazz_pool::Receiver) -> Self {
        Self {
            inner: Inner(queue),
        }
    }
}

#[tonic::async_trait]
impl QgisServer for QgisServerServicer {
    //
    // Ping
    //
    async fn ping(&self, request: Request<PingRequest>) -> Result<Response<PingReply>, Status> {
        self.inner
            .ping(&request.into_inner().echo)
            .await
            .map(|echo| Response::new(PingReply { echo }))
    }

    //
    // Ows request
    //
    type ExecuteOwsRequestStream = ResponseChunkStream;

    async fn execute_ows_request(
        &self,
        request: Request<OwsRequest>,
    ) -> Result<Response<Self::ExecuteOwsRequestStream>, Status> {
        let mut w = self.inner.get_worker().await?;

        // Remember the pid for resource watchdogs
        w.remember().await;

        let headers = metadata_to_headers(request.metadata());
        let req = request.get_ref();
        let reply = w
            .request(&qjazz_pool::messages::OwsRequestMsg {
                service: &req.service,
                request: &req.request,
                target: &req.target,
                url: req.url.as_deref(),
                version: req.version.as_deref(),
                direct: req.direct,
                options: req.options.as_deref(),
                request_id: req.request_id.as_deref(),
                header_prefix: Some(HEADER_PREFIX),
                headers,
                content_type: req.content_type.as_deref(),
                method: req
                    .method
                    .as_deref()
                    .map(|me| me.try_into().map_err(Status::invalid_argument))
                    .transpose()?,
                body: req.body.as_deref(),
            })
            .await
            .map_err(reply_error)?;

        Ok(stream_response(w, reply))
    }

    //
    // Api request
    //
    type ExecuteApiRequestStream = ResponseChunkStream;

    async fn execute_api_request(
        &self,
        request: Request<ApiRequest>,
    ) -> Result<Response<Self::ExecuteApiRequestStream>, Status> {
        let mut w = self.inner.get_worker().await?;

        w.remember().await;

        let headers = metadata_to_headers(request.metadata());
        let req = request.get_ref();
        let reply = w
            .request(&qjazz_pool::messages::ApiRequestMsg {
                name: &req.name,
                path: &req.path,
                method: req
                    .method
                    .as_str()
                    .try_into()
                    .map_err(Status::invalid_argument)?,
                url: req.url.as_deref(),
                data: req.data.as_deref(),
                delegate: req.delegate,
                target: req.target.as_deref(),
                direct: req.direct,
                options: req.options.as_deref(),
                request_id: req.request_id.as_deref(),
                header_prefix: Some(HEADER_PREFIX),
                headers,
                content_type: req.content_type.as_deref(),
            })
            .await
            .map_err(reply_error)?;

        Ok(stream_response(w, reply))
    }

    //
    // Collections
    //
    async fn collections(
        &self,
        request: Request<CollectionsRequest>,
    ) -> Result<Response<CollectionsPage>, Status> {
        let mut w = self.inner.get_worker().await?;

        let msg = request.into_inner();
        let page = w
            .collections(
                msg.location.as_deref(),
                msg.resource.as_deref(),
                msg.start..msg.end,
            )
            .await
            .map_err(reply_error)?;
        w.done();

        Ok(Response::new(CollectionsPage {
            schema: page.schema,
            next: page.next,
            items: page
                .items
                .into_iter()
                .map(|item| CollectionsItem {
                    name: item.name,
                    json: item.json,
                    endpoints: item.endpoints.bits(),
                })
                .collect(),
        }))
    }
}
