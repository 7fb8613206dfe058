//!
//! Admin pool aggregation
//!
//! Backends sharing the same label form a logical pool; admin
//! operations fan out concurrently to every backend of the pool
//! and reduce their results by project uri. Replies are not
//! ordered across backends, the merge is commutative.
//!
use actix_web::web;
use futures::future::join_all;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use tonic::Status;

use crate::channel::qjazz_service::{CacheInfo, CatalogRequest, CheckoutRequest, Empty};
use crate::channel::Channel;

/// Logical pools of backend channels
#[derive(Default)]
pub struct AdminPools {
    pools: BTreeMap<String, Vec<web::Data<Channel>>>,
}

/// Cache entries reduced by uri
pub type CacheContent = BTreeMap<String, Vec<JsonValue>>;

fn cache_info_json(backend: &str, info: &CacheInfo) -> JsonValue {
    json!({
        "uri": info.uri,
        "status": info.status,
        "inCache": info.in_cache,
        "name": info.name,
        "storage": info.storage,
        "lastModified": info.last_modified,
        "pinned": info.pinned,
        "serverAddress": backend,
    })
}

impl AdminPools {
    pub fn new<'a, I>(channels: I) -> Self
    where
        I: IntoIterator<Item = &'a web::Data<Channel>>,
    {
        let mut pools: BTreeMap<String, Vec<web::Data<Channel>>> = BTreeMap::new();
        for channel in channels {
            pools
                .entry(channel.label().to_string())
                .or_default()
                .push(channel.clone());
        }
        Self { pools }
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(|s| s.as_str())
    }

    pub fn get(&self, label: &str) -> Option<&[web::Data<Channel>]> {
        self.pools.get(label).map(|backends| backends.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[web::Data<Channel>])> {
        self.pools
            .iter()
            .map(|(label, backends)| (label.as_str(), backends.as_slice()))
    }
}

// Collect the pinned cache content of a single backend
async fn backend_cache(channel: &Channel) -> Result<Vec<CacheInfo>, Status> {
    let mut stream = channel
        .admin_client()
        .list_cache(Empty {})
        .await?
        .into_inner();
    let mut items = Vec::new();
    while let Some(item) = stream.message().await? {
        items.push(item);
    }
    Ok(items)
}

/// Consolidated cache content of a pool, reduced by uri
pub async fn cache_content(backends: &[web::Data<Channel>]) -> Result<CacheContent, Status> {
    let results = join_all(backends.iter().map(|channel| async move {
        backend_cache(channel)
            .await
            .map(|items| (channel.name().to_string(), items))
    }))
    .await;

    let mut content = CacheContent::new();
    for result in results {
        let (backend, items) = result?;
        for info in items {
            content
                .entry(info.uri.clone())
                .or_default()
                .push(cache_info_json(&backend, &info));
        }
    }
    Ok(content)
}

/// Pull a project on every backend of the pool
pub async fn pull_projects(
    backends: &[web::Data<Channel>],
    uri: &str,
) -> Result<CacheContent, Status> {
    let results = join_all(backends.iter().map(|channel| {
        let uri = uri.to_string();
        async move {
            channel
                .admin_client()
                .checkout_project(CheckoutRequest {
                    uri,
                    pull: Some(true),
                })
                .await
                .map(|resp| (channel.name().to_string(), resp.into_inner()))
        }
    }))
    .await;

    let mut content = CacheContent::new();
    for result in results {
        let (backend, info) = result?;
        content
            .entry(info.uri.clone())
            .or_default()
            .push(cache_info_json(&backend, &info));
    }
    Ok(content)
}

/// Synchronize the caches across a pool.
///
/// For each uri the entry with the latest modification time wins;
/// backends holding an older revision, or none, are asked to pull
/// the project again. Entries within the same second are
/// considered unchanged.
pub async fn synchronize_cache(backends: &[web::Data<Channel>]) -> Result<CacheContent, Status> {
    let mut per_backend: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
    let mut latest: BTreeMap<String, i64> = BTreeMap::new();

    for channel in backends {
        let items = backend_cache(channel).await?;
        let entries: BTreeMap<String, i64> = items
            .iter()
            .map(|info| (info.uri.clone(), info.last_modified.unwrap_or(0)))
            .collect();
        for (uri, last_modified) in &entries {
            let entry = latest.entry(uri.clone()).or_insert(*last_modified);
            if *last_modified > *entry {
                *entry = *last_modified;
            }
        }
        per_backend.insert(channel.name().to_string(), entries);
    }

    let mut content = CacheContent::new();
    for channel in backends {
        let entries = &per_backend[channel.name()];
        for (uri, reference) in &latest {
            // Strictly older revisions only: same second
            // conflicts resolve as unchanged.
            let outdated = entries.get(uri).map(|lm| lm < reference).unwrap_or(true);
            if outdated {
                let info = channel
                    .admin_client()
                    .checkout_project(CheckoutRequest {
                        uri: uri.clone(),
                        pull: Some(true),
                    })
                    .await?
                    .into_inner();
                content
                    .entry(uri.clone())
                    .or_default()
                    .push(cache_info_json(channel.name(), &info));
            }
        }
    }
    Ok(content)
}

/// Consolidated catalog of a pool, reduced by uri.
///
/// Every backend of a pool serves the same search paths; the
/// union keeps one item per uri.
pub async fn catalog(
    backends: &[web::Data<Channel>],
    location: Option<String>,
) -> Result<BTreeMap<String, JsonValue>, Status> {
    let results = join_all(backends.iter().map(|channel| {
        let location = location.clone();
        async move {
            let mut stream = channel
                .admin_client()
                .catalog(CatalogRequest { location })
                .await?
                .into_inner();
            let mut items = Vec::new();
            while let Some(item) = stream.message().await? {
                items.push(item);
            }
            Ok::<_, Status>(items)
        }
    }))
    .await;

    let mut catalog = BTreeMap::new();
    for result in results {
        for item in result? {
            catalog.entry(item.uri.clone()).or_insert_with(|| {
                json!({
                    "uri": item.uri,
                    "name": item.name,
                    "storage": item.storage,
                    "lastModified": item.last_modified,
                    "publicUri": item.public_uri,
                })
            });
        }
    }
    Ok(catalog)
}

/// Clear the caches pool wide
pub async fn clear_cache(backends: &[web::Data<Channel>]) -> Result<(), Status> {
    let results = join_all(
        backends
            .iter()
            .map(|channel| async move { channel.admin_client().clear_cache(Empty {}).await }),
    )
    .await;
    for result in results {
        result?;
    }
    Ok(())
}

/// Per backend statistics of a pool
pub async fn pool_stats(backends: &[web::Data<Channel>]) -> Vec<JsonValue> {
    join_all(backends.iter().map(|channel| async move {
        match channel.admin_client().stats(Empty {}).await {
            Ok(resp) => {
                let stats = resp.into_inner();
                json!({
                    "name": channel.name(),
                    "serving": channel.serving(),
                    "activeWorkers": stats.active_workers,
                    "idleWorkers": stats.idle_workers,
                    "activity": stats.activity,
                    "failurePressure": stats.failure_pressure,
                    "requestPressure": stats.request_pressure,
                    "uptime": stats.uptime,
                })
            }
            Err(status) => json!({
                "name": channel.name(),
                "serving": channel.serving(),
                "error": status.message(),
            }),
        }
    }))
    .await
}

/// Forward a configuration patch to every backend
pub async fn set_config(backends: &[web::Data<Channel>], patch: &JsonValue) -> Result<(), Status> {
    let json = patch.to_string();
    let results = join_all(backends.iter().map(|channel| {
        let json = json.clone();
        async move {
            channel
                .admin_client()
                .set_config(crate::channel::qjazz_service::JsonConfig { json })
                .await
        }
    }))
    .await;
    for result in results {
        result?;
    }
    Ok(())
}
