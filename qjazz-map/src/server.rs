use actix_web::{
    body,
    body::EitherBody,
    dev::{ServiceRequest, ServiceResponse},
    middleware, web, App, HttpResponse, HttpServer, Result,
};

use futures::future::try_join_all;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::channel::{self, Channel};
use crate::config::Settings;
use crate::handlers::admin::AdminState;
use crate::handlers::utils::request;
use crate::pools::AdminPools;
use crate::resolver::Channels;
use crate::services::{
    admin_scope, api_scope, catalog, landing_page, ows_fallback, ows_resource,
};

// Log requests as '[REQ:<request id>] ...'
const LOGGER_FORMAT: &str =
    r#"[REQ:%{x-request-id}i] %a "%r" %s %b "%{Referer}i" "%{User-Agent}i" %D"#;

pub async fn serve(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let token = CancellationToken::new();

    // Keep a configuration snapshot for the admin surface
    let config_snapshot = serde_json::to_value(&settings)?;

    // Handle channel connections
    let backends = Backends::connect(settings.backends).await?;

    let admin_state = web::Data::new(AdminState {
        pools: AdminPools::new(backends.channels.iter()),
        config: RwLock::new(config_snapshot),
    });

    let server_conf = settings.server;

    let tls_config = server_conf.tls_config()?;
    let bind_address = server_conf.bind_address();
    let proxy_headers = request::ProxyHeaders {
        allow: server_conf.check_forwarded_headers(),
    };

    let shutdown_timeout = server_conf.shutdown_timeout();
    let num_workers = server_conf.num_workers();

    let cors = server_conf.cors;

    backends.watch(token);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(cors.configure())
            .wrap(middleware::NormalizePath::trim())
            .wrap(middleware::from_fn(server_mw))
            .app_data(web::ThinData(proxy_headers))
            .configure(admin_scope(admin_state.clone()))
            .configure(backends.clone().configure())
            .wrap(middleware::Logger::new(LOGGER_FORMAT))
    })
    .shutdown_timeout(shutdown_timeout);

    if let Some(tls_config) = tls_config {
        server.bind_rustls_0_23(&bind_address, tls_config)
    } else {
        server.bind(&bind_address)
    }?
    .workers(num_workers)
    .run()
    .await?;

    Ok(())
}

/// The set of connected backend channels
#[derive(Clone)]
struct Backends {
    channels: Vec<web::Data<Channel>>,
    // A lone backend routed at "/" takes over the whole url space
    single_root: bool,
}

impl Backends {
    async fn connect(cfgs: Channels) -> Result<Self, channel::Error> {
        let single_root = cfgs.is_single_root_channel();
        // Connect channels sorted by inverse route order
        // (longest first) so that nested routes resolve to the
        // most specific backend.
        let channels = try_join_all(
            cfgs.into_iter()
                .rev()
                .map(|(name, cfg)| Channel::builder(name, cfg).connect()),
        )
        .await?
        .into_iter()
        .map(web::Data::new)
        .collect();

        Ok(Self {
            channels,
            single_root,
        })
    }

    fn watch(&self, token: CancellationToken) {
        self.channels
            .iter()
            .for_each(|channel| channel.watch(token.clone()));
    }

    fn configure(self) -> impl FnOnce(&mut web::ServiceConfig) {
        move |cfg| {
            if self.single_root {
                root_channel_scope(cfg, self.channels[0].clone());
            } else {
                for channel in &self.channels {
                    channel_scope(cfg, channel.clone());
                }
                cfg.configure(landing_page(self.channels));
            }
        }
    }
}

// A single backend owning the url root
fn root_channel_scope(cfg: &mut web::ServiceConfig, channel: web::Data<Channel>) {
    let cfg = cfg
        .service(web::scope("/").configure(ows_resource))
        .configure(catalog);
    channel
        .api_endpoints()
        .iter()
        .fold(cfg, |cfg, api| cfg.configure(api_scope(api.clone())))
        .configure(ows_fallback)
        .app_data(channel);
}

// One scope per backend route
fn channel_scope(cfg: &mut web::ServiceConfig, channel: web::Data<Channel>) {
    let scope = web::scope(channel.route())
        .wrap(middleware::from_fn(verify_channel_mw))
        .configure(catalog)
        .configure(ows_resource);

    // Add the api endpoints, then the OWS path fallback
    let scope = channel
        .api_endpoints()
        .iter()
        .fold(scope, |s, api| s.configure(api_scope(api.clone())))
        .configure(ows_fallback)
        .app_data(channel);

    cfg.service(scope);
}

//
// Middlewares
//
async fn server_mw(
    req: ServiceRequest,
    next: middleware::Next<impl body::MessageBody>,
) -> Result<ServiceResponse<impl body::MessageBody>> {
    let mut resp = next.call(req).await?;

    // Normalize headers to camel case for buggy clients
    resp.response_mut().head_mut().set_camel_case_headers(true);
    Ok(resp)
}

// Early check that the channel is serving
async fn verify_channel_mw(
    req: ServiceRequest,
    next: middleware::Next<impl body::MessageBody>,
) -> Result<ServiceResponse<EitherBody<impl body::MessageBody>>> {
    if let Some(channel) = req.app_data::<web::Data<Channel>>() {
        if !channel.serving() {
            let name = channel.name().to_string();
            return Ok(req.into_response(
                HttpResponse::ServiceUnavailable()
                    .content_type("text/plain")
                    .body(format!(
                        "Service '{}' not available, please retry later",
                        name
                    ))
                    .map_into_right_body(),
            ));
        }
    }
    Ok(next.call(req).await?.map_into_left_body())
}
