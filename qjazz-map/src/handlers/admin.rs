//
// Admin surface
//
// Mounted under the reserved `/_/` scope: gateway configuration
// and fleet wide cache management over the logical pools.
//
use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use crate::pools::{self, AdminPools};
use crate::utils::json_merge;

/// Shared admin state
pub struct AdminState {
    pub pools: AdminPools,
    pub config: RwLock<serde_json::Value>,
}

fn bad_gateway(status: tonic::Status) -> HttpResponse {
    HttpResponse::BadGateway()
        .content_type("text/plain")
        .body(status.message().to_string())
}

fn pool_not_found(label: &str) -> HttpResponse {
    HttpResponse::NotFound()
        .content_type("text/plain")
        .body(format!("No pool '{label}'"))
}

//
// Configuration
//

pub async fn get_config(state: web::Data<AdminState>) -> impl Responder {
    HttpResponse::Ok().json(&*state.config.read().await)
}

pub async fn patch_config(
    state: web::Data<AdminState>,
    patch: web::Json<serde_json::Value>,
) -> impl Responder {
    let patch = patch.into_inner();
    {
        let mut config = state.config.write().await;
        json_merge(&mut config, &patch);
    }
    // Forward to every backend
    for (_, backends) in state.pools.iter() {
        if let Err(status) = pools::set_config(backends, &patch).await {
            return bad_gateway(status);
        }
    }
    HttpResponse::Ok().json(&*state.config.read().await)
}

pub async fn put_config(
    state: web::Data<AdminState>,
    config: web::Json<serde_json::Value>,
) -> impl Responder {
    let config = config.into_inner();
    *state.config.write().await = config.clone();
    for (_, backends) in state.pools.iter() {
        if let Err(status) = pools::set_config(backends, &config).await {
            return bad_gateway(status);
        }
    }
    HttpResponse::Ok().json(config)
}

//
// Backend pools
//

pub async fn list_backends(state: web::Data<AdminState>) -> impl Responder {
    HttpResponse::Ok().json(
        state
            .pools
            .iter()
            .map(|(label, backends)| {
                json!({
                    "label": label,
                    "backends": backends
                        .iter()
                        .map(|channel| json!({
                            "name": channel.name(),
                            "route": channel.route(),
                            "serving": channel.serving(),
                        }))
                        .collect::<Vec<_>>(),
                })
            })
            .collect::<Vec<_>>(),
    )
}

pub async fn backend_stats(
    state: web::Data<AdminState>,
    label: web::Path<String>,
) -> impl Responder {
    let label = label.into_inner();
    match state.pools.get(&label) {
        None => pool_not_found(&label),
        Some(backends) => HttpResponse::Ok().json(json!({
            "label": label,
            "backends": pools::pool_stats(backends).await,
        })),
    }
}

//
// Pool cache management
//

pub async fn cache_content(
    state: web::Data<AdminState>,
    label: web::Path<String>,
) -> impl Responder {
    let label = label.into_inner();
    match state.pools.get(&label) {
        None => pool_not_found(&label),
        Some(backends) => match pools::cache_content(backends).await {
            Ok(content) => HttpResponse::Ok().json(content),
            Err(status) => bad_gateway(status),
        },
    }
}

#[derive(Deserialize)]
pub struct PullParams {
    uri: String,
}

pub async fn pull_projects(
    state: web::Data<AdminState>,
    label: web::Path<String>,
    params: web::Query<PullParams>,
) -> impl Responder {
    let label = label.into_inner();
    match state.pools.get(&label) {
        None => pool_not_found(&label),
        Some(backends) => match pools::pull_projects(backends, &params.uri).await {
            Ok(content) => HttpResponse::Ok().json(content),
            Err(status) => bad_gateway(status),
        },
    }
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct CatalogParams {
    location: Option<String>,
}

pub async fn catalog(
    state: web::Data<AdminState>,
    label: web::Path<String>,
    params: web::Query<CatalogParams>,
) -> impl Responder {
    let label = label.into_inner();
    match state.pools.get(&label) {
        None => pool_not_found(&label),
        Some(backends) => {
            match pools::catalog(backends, params.into_inner().location).await {
                Ok(catalog) => HttpResponse::Ok().json(catalog),
                Err(status) => bad_gateway(status),
            }
        }
    }
}

pub async fn synchronize_cache(
    state: web::Data<AdminState>,
    label: web::Path<String>,
) -> impl Responder {
    let label = label.into_inner();
    match state.pools.get(&label) {
        None => pool_not_found(&label),
        Some(backends) => match pools::synchronize_cache(backends).await {
            Ok(content) => HttpResponse::Ok().json(content),
            Err(status) => bad_gateway(status),
        },
    }
}

pub async fn clear_cache(
    state: web::Data<AdminState>,
    label: web::Path<String>,
) -> impl Responder {
    let label = label.into_inner();
    match state.pools.get(&label) {
        None => pool_not_found(&label),
        Some(backends) => match pools::clear_cache(backends).await {
            Ok(()) => HttpResponse::NoContent().finish(),
            Err(status) => bad_gateway(status),
        },
    }
}
