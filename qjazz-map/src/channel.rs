//!
//! Backend gRPC channel
//!
//! One channel per configured backend. A watcher task follows
//! the backend health service and flips the `serving` flag; new
//! calls are allowed only while serving. The underlying channel
//! is load balanced over the resolved backend addresses.
//!
use actix_web::web;
use ginepro::{LoadBalancedChannel, ServiceDefinition};
use tonic::{Code, Status};
use tonic_health::pb::{
    health_check_response::ServingStatus, health_client::HealthClient, HealthCheckRequest,
};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// Reexport
pub use crate::resolver::{ApiEndPoint, ChannelConfig};

// QJazz gRPC services
pub mod qjazz_service {
    tonic::include_proto!("qjazz");
}

use qjazz_service::qgis_admin_client::QgisAdminClient;
use qjazz_service::qgis_server_client::QgisServerClient;

pub type Error = Status;

pub struct Builder {
    name: String,
    config: ChannelConfig,
}

pub struct Channel {
    name: String,
    config: ChannelConfig,
    // Endpoints directly usable as app shared data
    endpoints: Vec<web::Data<ApiEndPoint>>,
    serving: Arc<AtomicBool>,
    channel: LoadBalancedChannel,
}

impl Builder {
    pub fn new(name: String, config: ChannelConfig) -> Self {
        Self { name, config }
    }

    pub async fn connect(mut self) -> Result<Channel, Error> {
        log::debug!(
            "Configuring backend '{}' at {:?}",
            self.name,
            self.config.service()
        );

        Channel::connect(&self.config).await.map(|channel| Channel {
            name: self.name,
            endpoints: self.config.api.drain(..).map(web::Data::new).collect(),
            config: self.config,
            serving: Arc::new(AtomicBool::new(false)),
            channel,
        })
    }
}

fn service_definition(cfg: &ChannelConfig) -> Result<ServiceDefinition, Error> {
    ServiceDefinition::try_from(cfg.service())
        .map_err(|e| Status::internal(format!("Cannot build service definition {:?}", e)))
}

impl Channel {
    pub fn builder(name: String, conf: ChannelConfig) -> Builder {
        Builder::new(name, conf)
    }

    async fn connect(conf: &ChannelConfig) -> Result<LoadBalancedChannel, Error> {
        let builder = LoadBalancedChannel::builder(service_definition(conf)?);

        if conf.enable_tls() {
            builder.with_tls(
                conf.tls_config()
                    .map_err(|e| Status::internal(format!("Client certificate error {:?}", e)))?,
            )
        } else {
            builder
        }
        .dns_probe_interval(conf.probe_interval())
        .channel()
        .await
        .map_err(|e| Status::internal(format!("Failed to create load balanced channel {}", e)))
    }

    pub fn serving(&self) -> bool {
        self.serving.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.config.title
    }

    pub fn description(&self) -> &str {
        &self.config.description
    }

    pub fn route(&self) -> &str {
        &self.config.route
    }

    /// Logical admin pool the backend belongs to
    pub fn label(&self) -> &str {
        self.config.label.as_deref().unwrap_or(&self.name)
    }

    pub fn allow_direct_resolution(&self) -> bool {
        self.config.allow_direct_resolution
    }

    pub fn getfeature_limit(&self) -> Option<i64> {
        self.config.getfeature_limit
    }

    pub fn disable_root_catalog(&self) -> bool {
        self.config.disable_root_catalog
    }

    /// Client stub for the map service
    pub fn client(&self) -> QgisServerClient<LoadBalancedChannel> {
        QgisServerClient::new(self.channel.clone())
    }

    /// Client stub for the admin service
    pub fn admin_client(&self) -> QgisAdminClient<LoadBalancedChannel> {
        QgisAdminClient::new(self.channel.clone())
    }

    pub fn api_endpoints(&self) -> &[web::Data<ApiEndPoint>] {
        self.endpoints.as_slice()
    }

    /// Header filter predicate
    pub fn allow_header(&self, key: &str) -> bool {
        self.config.forward_headers.matches(key)
    }

    /// Request timeout
    /// See https://docs.rs/tonic/latest/tonic/struct.Request.html#method.set_timeout
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Health check for the backend
    ///
    /// Runs in background, watching the health status of the
    /// service and flipping the `serving` flag.
    pub fn watch(&self, token: CancellationToken) {
        let watch = HealthWatch {
            serving: self.serving.clone(),
            channel: self.channel.clone(),
            name: self.name.clone(),
            retry_interval: self.config.probe_interval(),
        };
        actix_web::rt::spawn(async move { token.run_until_cancelled(watch.run()).await });
    }
}

// Health watch state machine: Disconnected -> Watching ->
// Disconnected. New calls are allowed only while the watched
// status is SERVING.
struct HealthWatch {
    serving: Arc<AtomicBool>,
    channel: LoadBalancedChannel,
    name: String,
    retry_interval: Duration,
}

impl HealthWatch {
    async fn run(self) {
        let request = HealthCheckRequest {
            service: "qjazz.QgisServer".into(),
        };
        // Track availability so that connection losses are
        // reported once, not on every retry.
        let mut was_available = true;
        loop {
            let mut stub = HealthClient::new(self.channel.clone());
            let outcome = match stub.watch(request.clone()).await {
                Ok(mut resp) => {
                    was_available = true;
                    self.watch_messages(resp.get_mut()).await
                }
                Err(status) => Some(status),
            };

            self.serving.store(false, Ordering::Relaxed);
            match outcome {
                Some(status) if status.code() == Code::Unavailable => {
                    if was_available {
                        was_available = false;
                        log::error!("Backend {}: UNAVAILABLE", self.name);
                    }
                }
                Some(status) => log::error!("Backend error:\t{}\t{}", self.name, status),
                None => (),
            }

            // Wait before the reconnection attempt
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    // Consume health events until the watch stream breaks
    async fn watch_messages(
        &self,
        stream: &mut tonic::Streaming<tonic_health::pb::HealthCheckResponse>,
    ) -> Option<Status> {
        loop {
            match stream.message().await {
                Ok(Some(event)) => {
                    let serving = event.status == ServingStatus::Serving as i32;
                    log::info!(
                        "Backend: {}: status changed to {}",
                        self.name,
                        if serving { "SERVING" } else { "NOT SERVING" },
                    );
                    self.serving.store(serving, Ordering::Relaxed);
                }
                Ok(None) => {
                    log::info!("Backend: {}: No status", self.name);
                    return None;
                }
                Err(status) => return Some(status),
            }
        }
    }
}
