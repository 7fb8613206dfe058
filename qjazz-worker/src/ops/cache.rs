//!
//! Cache management operations
//!
use qjazz_cache::{CacheEntry, CacheManager, CheckoutStatus, ProjectLoader};

use super::send_cache_error;
use crate::connection::{Connection, Reply};
use crate::errors::Result;
use crate::messages::{CacheInfo, CatalogItem, CollectionsItem, CollectionsMsg, CollectionsPage,
    LayerInfo, ProjectInfo};

fn entry_info<P>(entry: &CacheEntry<P>, status: CheckoutStatus, cache_id: &str) -> CacheInfo {
    let md = entry.metadata();
    let doc = entry.document();
    CacheInfo {
        uri: md.uri.clone(),
        status: status.into(),
        in_cache: true,
        timestamp: Some(entry.loaded_at()),
        name: Some(md.name.clone()),
        storage: Some(md.storage.clone()),
        last_modified: Some(md.last_modified),
        saved_version: doc.saved_version.clone(),
        debug_metadata: doc.debug_metadata.clone(),
        cache_id: cache_id.to_string(),
        last_hit: entry.last_hit(),
        hits: entry.hits() as i64,
        pinned: entry.pinned(),
    }
}

fn missing_info(uri: &str, status: CheckoutStatus, cache_id: &str) -> CacheInfo {
    CacheInfo {
        uri: uri.to_string(),
        status: status.into(),
        in_cache: false,
        timestamp: None,
        name: None,
        storage: None,
        last_modified: None,
        saved_version: None,
        debug_metadata: Default::default(),
        cache_id: cache_id.to_string(),
        last_hit: 0,
        hits: 0,
        pinned: false,
    }
}

/// Checkout a project, optionally pulling it in cache.
///
/// A pulled project is marked pinned and survives cache
/// maintenance until dropped.
pub fn checkout_project<C: Connection, L: ProjectLoader>(
    conn: &mut C,
    cm: &mut CacheManager<L>,
    uri: &str,
    pull: bool,
    cache_id: &str,
) -> Result<()> {
    let url = match cm.resolve_path(uri, true) {
        Ok(url) => url,
        Err(err) => return send_cache_error(conn, &err),
    };
    let state = match cm.checkout(&url) {
        Ok(state) => state,
        Err(err) => return send_cache_error(conn, &err),
    };
    let canonical = state.uri().to_string();
    let status = state.status();

    let info = if pull {
        match cm.update(state) {
            Ok((Some(_), status)) => {
                cm.pin(&canonical, true);
                // The entry borrow ended on `pin`; fetch it back
                entry_info(cm.get(&canonical).unwrap(), status, cache_id)
            }
            Ok((None, status)) => missing_info(&canonical, status, cache_id),
            Err(err) => return send_cache_error(conn, &err),
        }
    } else {
        match cm.get(&canonical) {
            Some(entry) => entry_info(entry, status, cache_id),
            None => missing_info(&canonical, status, cache_id),
        }
    };

    conn.send_reply(200, info)
}

/// Drop a project from the cache, pinned or not
pub fn drop_project<C: Connection, L: ProjectLoader>(
    conn: &mut C,
    cm: &mut CacheManager<L>,
    uri: &str,
    cache_id: &str,
) -> Result<()> {
    let url = match cm.resolve_path(uri, true) {
        Ok(url) => url,
        Err(err) => return send_cache_error(conn, &err),
    };
    let state = match cm.checkout(&url) {
        Ok(state) => state,
        Err(err) => return send_cache_error(conn, &err),
    };
    let canonical = state.uri().to_string();

    let info = match cm.drop_project(&canonical) {
        Some(md) => CacheInfo {
            name: Some(md.name),
            storage: Some(md.storage),
            last_modified: Some(md.last_modified),
            ..missing_info(&canonical, CheckoutStatus::Removed, cache_id)
        },
        None => missing_info(&canonical, CheckoutStatus::NotFound, cache_id),
    };

    conn.send_reply(200, info)
}

/// Stream the cache content
pub fn send_cache_list<C: Connection, L: ProjectLoader>(
    conn: &mut C,
    cm: &CacheManager<L>,
    cache_id: &str,
) -> Result<()> {
    for entry in cm.iter() {
        conn.send_item(entry_info(entry, CheckoutStatus::Unchanged, cache_id))?;
    }
    conn.send_nodata()
}

/// Refresh every cached project against its storage
pub fn update_cache<C: Connection, L: ProjectLoader>(
    conn: &mut C,
    cm: &mut CacheManager<L>,
) -> Result<()> {
    match cm.update_cache() {
        Ok(report) => {
            for (uri, status) in &report {
                log::debug!("Cache update: {} -> {}", uri, status);
            }
            conn.send_nodata()
        }
        Err(err) => send_cache_error(conn, &err),
    }
}

/// Project information for a cached project.
/// Does NOT load the project.
pub fn send_project_info<C: Connection, L: ProjectLoader>(
    conn: &mut C,
    cm: &CacheManager<L>,
    uri: &str,
    cache_id: &str,
) -> Result<()> {
    let url = match cm.resolve_path(uri, true) {
        Ok(url) => url,
        Err(err) => return send_cache_error(conn, &err),
    };
    let state = match cm.checkout(&url) {
        Ok(state) => state,
        Err(err) => return send_cache_error(conn, &err),
    };
    match cm.get(state.uri()) {
        Some(entry) => {
            let md = entry.metadata();
            let doc = entry.document();
            conn.send_reply(
                200,
                ProjectInfo {
                    status: state.status().into(),
                    uri: md.uri.clone(),
                    filename: doc.filename.clone(),
                    crs: doc.crs.clone(),
                    last_modified: md.last_modified,
                    storage: md.storage.clone(),
                    has_bad_layers: doc.has_bad_layers(),
                    layers: doc
                        .layers
                        .iter()
                        .map(|layer| LayerInfo {
                            layer_id: layer.layer_id.clone(),
                            name: layer.name.clone(),
                            source: layer.source.clone(),
                            crs: layer.crs.clone(),
                            is_valid: layer.is_valid,
                            is_spatial: layer.is_spatial,
                        })
                        .collect(),
                    cache_id: cache_id.to_string(),
                },
            )
        }
        None => conn.send_reply(404, format!("project '{uri}' is not in cache")),
    }
}

/// Stream all projects available from the search paths
pub fn send_catalog<C: Connection, L: ProjectLoader>(
    conn: &mut C,
    cm: &CacheManager<L>,
    location: Option<&str>,
) -> Result<()> {
    let collected = match cm.collect_projects(location) {
        Ok(collected) => collected,
        Err(err) => return send_cache_error(conn, &err),
    };
    for (md, public_uri) in collected {
        conn.send_item(CatalogItem {
            uri: md.uri,
            name: md.name,
            storage: md.storage,
            last_modified: md.last_modified,
            public_uri,
        })?;
    }
    conn.send_nodata()
}

/// OGC collections page over the known projects
pub fn send_collections<C: Connection, L: ProjectLoader>(
    conn: &mut C,
    cm: &CacheManager<L>,
    msg: &CollectionsMsg,
) -> Result<()> {
    let collected = match cm.collect_projects(msg.location.as_deref()) {
        Ok(collected) => collected,
        Err(err) => return send_cache_error(conn, &err),
    };
    let start = msg.start.max(0) as usize;
    let end = (msg.end.max(0) as usize).min(collected.len());
    let items = collected[start.min(end)..end]
        .iter()
        .map(|(md, public_uri)| CollectionsItem {
            name: public_uri.clone(),
            json: serde_json::json!({
                "id": public_uri,
                "title": md.name,
            })
            .to_string(),
            // Every project serves maps and features
            endpoints: 0x01 | 0x02,
        })
        .collect();
    conn.send_reply(
        200,
        CollectionsPage {
            schema: String::new(),
            next: end < collected.len(),
            items,
        },
    )
}
