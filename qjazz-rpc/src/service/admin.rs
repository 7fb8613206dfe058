//
// QGIS admin servicer
//
use std::sync::Arc;
use tokio::sync::RwLock;
use tonic_health::server::HealthReporter;

use super::*;

use qjazz_pool::messages::CheckoutStatus;
use qjazz_pool::restore;

use qjazz_service::{
    project_info, CacheInfo, CatalogItem, CatalogRequest, CheckoutRequest, DropRequest,
    DumpCacheItem, Empty, JsonConfig, ProjectInfo, ProjectRequest, ServerStatus, ServingStatus,
    SleepRequest, StatsReply,
};

use qjazz_service::qgis_admin_server::QgisAdmin;

// Reexport
pub use qjazz_service::qgis_admin_server::QgisAdminServer;

pub struct QgisAdminServicer {
    inner: Inner,
    pool: Arc<RwLock<qjazz_pool::Pool>>,
    health_reporter: HealthReporter,
    uptime: Instant,
}

impl QgisAdminServicer {
    pub(crate) fn new(
        queue: qjazz_pool::Receiver,
        pool: Arc<RwLock<qjazz_pool::Pool>>,
        health_reporter: HealthReporter,
    ) -> Self {
        Self {
            inner: Inner(queue),
            pool,
            health_reporter,
            uptime: Instant::now(),
        }
    }
}

type CacheInfoStream = Pin<Box<dyn Stream<Item = Result<CacheInfo, Status>> + Send>>;
type PluginInfoStream = Pin<Box<dyn Stream<Item = Result<qjazz_service::PluginInfo, Status>> + Send>>;
type CatalogItemStream = Pin<Box<dyn Stream<Item = Result<CatalogItem, Status>> + Send>>;
type DumpCacheItemStream = Pin<Box<dyn Stream<Item = Result<DumpCacheItem, Status>> + Send>>;


// Relay a worker item stream as an rpc stream.
//
// `$open` opens the stream on the (rebound) worker, `$map`
// converts each item, returning `None` to skip it. The worker is
// recycled once the stream is exhausted.
macro_rules! relay_stream {
    ($w:ident, $open:expr, $map:expr) => {{
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut $w = $w;
            {
                let mut stream = match $open.await {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = tx.send(Err(Status::unknown(err))).await;
                        return;
                    }
                };
                loop {
                    let item = match stream.next().await {
                        Ok(Some(item)) => match $map(item) {
                            Some(item) => Ok(item),
                            None => continue,
                        },
                        Ok(None) => break,
                        Err(err) => Err(Status::unknown(err)),
                    };
                    if tx.send(item).await.is_err() {
                        log::error!("Connection cancelled by client");
                        return;
                    }
                }
            }
            $w.done();
        });
        ReceiverStream::new(rx)
    }};
}

#[tonic::async_trait]
impl QgisAdmin for QgisAdminServicer {
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
    // Cache management
    //
    async fn checkout_project(
        &self,
        request: Request<CheckoutRequest>,
    ) -> Result<Response<CacheInfo>, Status> {
        let mut w = self.inner.get_worker().await?;

        let req = request.into_inner();
        let pull = req.pull.unwrap_or(false);

        let reply = w
            .checkout_project(&req.uri, pull)
            .await
            .map_err(reply_error)?;

        w.done();

        if pull {
            // Propagate to the whole pool through the restore set
            self.inner
                .get_ref()
                .update_cache(
                    if matches!(
                        reply.status,
                        CheckoutStatus::REMOVED | CheckoutStatus::NOTFOUND
                    ) {
                        restore::State::Remove(req.uri)
                    } else {
                        restore::State::Pull(req.uri)
                    },
                )
                .await;
        }

        Ok(Response::new(reply.into()))
    }

    async fn drop_project(
        &self,
        request: Request<DropRequest>,
    ) -> Result<Response<CacheInfo>, Status> {
        // Report the state of the dropped project
        let mut w = self.inner.get_worker().await?;

        let uri = request.into_inner().uri;
        let response = Response::new(
            w.checkout_project(&uri, false)
                .await
                .map(CacheInfo::from)
                .map_err(reply_error)?,
        );

        w.done();

        // Evict pool wide
        self.inner
            .get_ref()
            .update_cache(restore::State::Remove(uri))
            .await;

        Ok(response)
    }

    // List cache
    type ListCacheStream = CacheInfoStream;

    async fn list_cache(
        &self,
        _: Request<Empty>,
    ) -> Result<Response<Self::ListCacheStream>, Status> {
        let w = self.inner.get_worker().await?;

        // Only the pinned set is consistent across workers
        let stream = relay_stream!(w, w.list_cache(), |item: qjazz_pool::messages::CacheInfo| {
            if item.pinned {
                Some(CacheInfo::from(item))
            } else {
                None
            }
        });
        Ok(Response::new(Box::pin(stream) as Self::ListCacheStream))
    }

    // Clear cache
    async fn clear_cache(&self, _: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.inner
            .get_ref()
            .update_cache(restore::State::Clear)
            .await;

        Ok(Response::new(Empty {}))
    }

    // Update cache
    async fn update_cache(&self, _: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.inner
            .get_ref()
            .update_cache(restore::State::Update)
            .await;

        Ok(Response::new(Empty {}))
    }

    // Dump cache(s)
    type DumpCacheStream = DumpCacheItemStream;

    async fn dump_cache(
        &self,
        _: Request<Empty>,
    ) -> Result<Response<Self::DumpCacheStream>, Status> {
        let num_workers = self.pool.read().await.options().num_processes();

        // Drain all workers: this is a stop the world method that
        // waits for every worker to be available; debugging aid
        // only.
        let mut workers = self.inner.get_ref().drain();
        while workers.len() < num_workers {
            workers.push(self.inner.get_worker().await?)
        }

        async fn list_cache(w: &mut qjazz_pool::Worker) -> Result<Vec<CacheInfo>, Status> {
            let mut stream = w.list_cache().await.map_err(reply_error)?;
            let mut items = vec![];
            loop {
                match stream.next().await {
                    Ok(Some(item)) => items.push(CacheInfo::from(item)),
                    Ok(None) => break,
                    Err(err) => return Err(Status::unknown(err)),
                }
            }
            Ok(items)
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for mut w in workers.drain(..) {
                let cache_id = format!("{}_{}", w.name(), w.id().value.unwrap_or(0));
                let cache = match list_cache(&mut w).await {
                    Ok(cache) => cache,
                    Err(status) => {
                        let _ = tx.send(Err(status)).await;
                        return;
                    }
                };
                let config = match w.get_config().await {
                    Ok(config) => config.to_string(),
                    Err(err) => {
                        let _ = tx.send(Err(reply_error(err))).await;
                        return;
                    }
                };
                w.done();
                if tx
                    .send(Ok(DumpCacheItem {
                        cache_id,
                        config,
                        cache,
                    }))
                    .await
                    .is_err()
                {
                    log::error!("Connection cancelled by client");
                    return;
                }
            }
        });

        let output_stream = ReceiverStream::new(rx);
        Ok(Response::new(
            Box::pin(output_stream) as Self::DumpCacheStream
        ))
    }

    //
    // Plugins
    //
    type ListPluginsStream = PluginInfoStream;

    async fn list_plugins(
        &self,
        _: Request<Empty>,
    ) -> Result<Response<Self::ListPluginsStream>, Status> {
        let w = self.inner.get_worker().await?;

        let stream = relay_stream!(w, w.list_plugins(), |item| {
            Some(qjazz_service::PluginInfo::from(item))
        });
        Ok(Response::new(Box::pin(stream) as Self::ListPluginsStream))
    }
    //
    // Config management
    //
    async fn set_config(&self, request: Request<JsonConfig>) -> Result<Response<Empty>, Status> {
        let patch = serde_json::from_str::<serde_json::Value>(&request.into_inner().json)
            .map_err(|err| Status::invalid_argument(format!("{err:?}")))?;

        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Updating configuration: {patch}");
        } else {
            log::info!("Updating configuration");
        }

        // Patch the pool configuration and rescale
        self.pool
            .write()
            .await
            .patch_config(&patch)
            .await
            .map_err(Status::invalid_argument)?;

        // Replay on workers
        self.inner.get_ref().update_config(patch).await;
        Ok(Response::new(Empty {}))
    }

    async fn get_config(&self, _: Request<Empty>) -> Result<Response<JsonConfig>, Status> {
        Ok(Response::new(JsonConfig {
            json: serde_json::to_string(self.pool.read().await.options())
                .map_err(|err| Status::internal(format!("{err}")))?,
        }))
    }

    //
    // Project inspection
    //
    async fn get_project_info(
        &self,
        request: Request<ProjectRequest>,
    ) -> Result<Response<ProjectInfo>, Status> {
        let mut w = self.inner.get_worker().await?;
        let mut reply = w
            .project_info(&request.into_inner().uri)
            .await
            .map_err(reply_error)?;

        w.done();

        Ok(Response::new(ProjectInfo {
            status: reply.status,
            uri: reply.uri,
            filename: reply.filename,
            crs: reply.crs,
            last_modified: reply.last_modified,
            storage: reply.storage,
            has_bad_layers: reply.has_bad_layers,
            layers: reply
                .layers
                .drain(..)
                .map(|l| project_info::Layer {
                    layer_id: l.layer_id,
                    name: l.name,
                    source: l.source,
                    crs: l.crs,
                    is_valid: l.is_valid,
                    is_spatial: l.is_spatial,
                })
                .collect(),
            cache_id: reply.cache_id,
        }))
    }

    // Catalog
    type CatalogStream = CatalogItemStream;

    async fn catalog(
        &self,
        request: Request<CatalogRequest>,
    ) -> Result<Response<Self::CatalogStream>, Status> {
        let w = self.inner.get_worker().await?;
        let location = request.into_inner().location;

        let stream = relay_stream!(w, w.catalog(location.as_deref()), |item| {
            Some(CatalogItem::from(item))
        });
        Ok(Response::new(Box::pin(stream) as Self::CatalogStream))
    }
    //
    // Service management and inspection
    //
    async fn get_env(&self, _: Request<Empty>) -> Result<Response<JsonConfig>, Status> {
        let mut w = self.inner.get_worker().await?;
        let env = w.get_env().await.map_err(reply_error)?;
        w.done();
        Ok(Response::new(JsonConfig {
            json: env.to_string(),
        }))
    }

    // Change the QGIS server serving status
    async fn set_server_serving_status(
        &self,
        request: Request<ServerStatus>,
    ) -> Result<Response<Empty>, Status> {
        match request.into_inner().status {
            st if st == ServingStatus::Serving as i32 => {
                log::info!("Setting server serving status to SERVING");
                self.health_reporter
                    .clone()
                    .set_serving::<QgisServerServer<QgisServerServicer>>()
                    .await
            }
            st if st == ServingStatus::NotServing as i32 => {
                log::info!("Setting server serving status to NOT SERVING");
                self.health_reporter
                    .clone()
                    .set_not_serving::<QgisServerServer<QgisServerServicer>>()
                    .await
            }
            st => {
                return Err(Status::invalid_argument(format!("{st}")));
            }
        }
        Ok(Response::new(Empty {}))
    }

    // Stats
    async fn stats(&self, _: Request<Empty>) -> Result<Response<StatsReply>, Status> {
        let st = qjazz_pool::stats::Stats::new(self.pool.read().await);
        Ok(Response::new(StatsReply {
            active_workers: st.active_workers as u64,
            idle_workers: st.idle_workers as u64,
            activity: st.activity().unwrap_or(0.),
            failure_pressure: st.failure_pressure,
            request_pressure: st.request_pressure,
            uptime: self.uptime.elapsed().as_secs(),
        }))
    }

    // Sleep
    async fn sleep(&self, request: Request<SleepRequest>) -> Result<Response<Empty>, Status> {
        let mut w = self.inner.get_worker().await?;

        // Remember the pid (for testing)
        w.remember().await;
        w.sleep(request.into_inner().delay)
            .await
            .map_err(reply_error)?;
        w.done();
        Ok(Response::new(Empty {}))
    }

    // Reload
    async fn reload(&self, _: Request<Empty>) -> Result<Response<Empty>, Status> {
        self.inner.get_ref().reload();
        Ok(Response::new(Empty {}))
    }
}

// Converters

impl From<qjazz_pool::messages::CacheInfo> for CacheInfo {
    fn from(info: qjazz_pool::messages::CacheInfo) -> Self {
        CacheInfo {
            uri: info.uri,
            status: info.status,
            in_cache: info.in_cache,
            timestamp: info.timestamp,
            name: info.name,
            storage: info.storage,
            last_modified: info.last_modified,
            saved_version: info.saved_version,
            debug_metadata: info.debug_metadata,
            cache_id: info.cache_id,
            last_hit: info.last_hit,
            hits: info.hits,
            pinned: info.pinned,
        }
    }
}

impl From<qjazz_pool::messages::PluginInfo> for qjazz_service::PluginInfo {
    fn from(info: qjazz_pool::messages::PluginInfo) -> Self {
        qjazz_service::PluginInfo {
            name: info.name,
            path: info.path,
            plugin_type: info.plugin_type,
            metadata: info.metadata.to_string(),
        }
    }
}

impl From<qjazz_pool::messages::CatalogItem> for CatalogItem {
    fn from(item: qjazz_pool::messages::CatalogItem) -> Self {
        CatalogItem {
            uri: item.uri,
            name: item.name,
            storage: item.storage,
            last_modified: item.last_modified,
            public_uri: item.public_uri,
        }
    }
}
