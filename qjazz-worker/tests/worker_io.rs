//!
//! Worker protocol tests over a real child process
//!
mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::Fixture;
use qjazz_pool::messages as msg;
use qjazz_pool::{Error, Worker};

async fn start_worker(fixture: &Fixture) -> Worker {
    fixture.builder().start().await.expect("worker start")
}

#[tokio::test]
async fn test_ping() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    assert_eq!(w.ping("hello").await.unwrap(), "hello");
    let _ = w.quit().await;
}

#[tokio::test]
async fn test_get_env() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    let env = w.get_env().await.unwrap();
    assert!(env.as_object().unwrap().contains_key("environment"));
    let _ = w.quit().await;
}

#[tokio::test]
async fn test_ows_request_stream() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    let mut reply = w
        .request(&msg::OwsRequestMsg {
            service: "WFS",
            request: "GetCapabilities",
            target: "/france/france_parts",
            url: Some("http://localhost:8080/test"),
            version: None,
            direct: false,
            options: None,
            headers: vec![("content-type", "application/test")],
            request_id: Some("req-1"),
            header_prefix: Some("x-test-"),
            content_type: Some("application/test"),
            method: None,
            body: None,
        })
        .await
        .unwrap();

    assert_eq!(reply.status_code, 200);
    assert_eq!(reply.checkout_status, Some(msg::CheckoutStatus::NEW));

    let headers = HashMap::<String, String>::from_iter(reply.headers.drain(..));
    assert_eq!(headers.get("x-test-x-qgis-cache").unwrap(), "MISS");
    assert_eq!(headers.get("x-test-x-request-id").unwrap(), "req-1");
    assert!(headers.contains_key("x-test-last-modified"));

    // Body chunks end with the stream terminator
    let mut stream = w.byte_stream().unwrap();
    let mut body = Vec::new();
    while let Some(chunk) = stream.next().await.unwrap() {
        body.extend_from_slice(chunk);
    }
    let body = String::from_utf8(body).unwrap();
    assert!(body.starts_with("<WFS request=\"GetCapabilities\""));

    // Second request hits the cache
    let reply = w
        .request(&msg::OwsRequestMsg {
            service: "WFS",
            request: "GetCapabilities",
            target: "/france/france_parts",
            url: Some("http://localhost:8080/test"),
            version: None,
            direct: false,
            options: None,
            headers: vec![],
            request_id: None,
            header_prefix: Some("x-test-"),
            content_type: None,
            method: None,
            body: None,
        })
        .await
        .unwrap();
    assert_eq!(reply.checkout_status, Some(msg::CheckoutStatus::UNCHANGED));
    let headers = HashMap::<String, String>::from_iter(reply.headers.iter().cloned());
    assert_eq!(headers.get("x-test-x-qgis-cache").unwrap(), "HIT");

    let mut stream = w.byte_stream().unwrap();
    while stream.next().await.unwrap().is_some() {}

    let _ = w.quit().await;
}

#[tokio::test]
async fn test_ows_request_invalid_target() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    // No search path matches: resource not allowed, no body stream
    let err = w
        .request(&msg::OwsRequestMsg {
            service: "WFS",
            request: "GetCapabilities",
            target: "/i_do_not_exists",
            url: None,
            version: None,
            direct: false,
            options: None,
            headers: vec![],
            request_id: None,
            header_prefix: None,
            content_type: None,
            method: None,
            body: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ResponseError(403, _)));

    // Missing project under a valid location: not found
    let err = w
        .request(&msg::OwsRequestMsg {
            service: "WFS",
            request: "GetCapabilities",
            target: "/france/i_do_not_exists",
            url: None,
            version: None,
            direct: false,
            options: None,
            headers: vec![],
            request_id: None,
            header_prefix: None,
            content_type: None,
            method: None,
            body: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ResponseError(404, _)));

    // The worker stays serviceable
    assert_eq!(w.ping("still alive").await.unwrap(), "still alive");
    let _ = w.quit().await;
}

#[tokio::test]
async fn test_api_request_stream() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    let reply = w
        .request(&msg::ApiRequestMsg {
            name: "FEATURES",
            path: "/collections",
            method: msg::HTTPMethod::GET,
            url: Some("http://localhost:8080/features"),
            data: None,
            delegate: false,
            target: Some("/france/france_parts"),
            direct: false,
            options: None,
            headers: vec![],
            request_id: None,
            header_prefix: Some("x-test-"),
            content_type: None,
        })
        .await
        .unwrap();
    assert_eq!(reply.status_code, 200);

    let mut stream = w.byte_stream().unwrap();
    let mut len = 0;
    while let Some(chunk) = stream.next().await.unwrap() {
        len += chunk.len();
    }
    assert!(len > 0);

    let _ = w.quit().await;
}

#[tokio::test]
async fn test_checkout_drop_cycle() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    // Pull in cache
    let info = w
        .checkout_project("/france/france_parts", true)
        .await
        .unwrap();
    assert_eq!(info.status, msg::CheckoutStatus::NEW);
    assert!(info.in_cache);
    assert!(info.pinned);
    assert_eq!(info.storage.as_deref(), Some("file"));

    // Checkout again without pulling
    let info = w
        .checkout_project("/france/france_parts", false)
        .await
        .unwrap();
    assert_eq!(info.status, msg::CheckoutStatus::UNCHANGED);

    // Drop it
    let info = w.drop_project("/france/france_parts").await.unwrap();
    assert_eq!(info.status, msg::CheckoutStatus::REMOVED);
    assert!(!info.in_cache);

    // The cache is now empty
    let mut list = w.list_cache().await.unwrap();
    assert!(list.next().await.unwrap().is_none());

    let _ = w.quit().await;
}

#[tokio::test]
async fn test_checkout_not_found() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    let info = w
        .checkout_project("/france/i_do_not_exists", false)
        .await
        .unwrap();
    assert_eq!(info.status, msg::CheckoutStatus::NOTFOUND);
    assert!(!info.in_cache);

    let _ = w.quit().await;
}

#[tokio::test]
async fn test_list_cache() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    w.checkout_project("/france/france_parts", true)
        .await
        .unwrap();

    let mut list = w.list_cache().await.unwrap();
    let mut count = 0;
    while let Some(info) = list.next().await.unwrap() {
        assert_eq!(info.cache_id, "test");
        count += 1;
    }
    assert_eq!(count, 1);

    let _ = w.quit().await;
}

#[tokio::test]
async fn test_update_cache() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    w.checkout_project("/france/france_parts", true)
        .await
        .unwrap();
    w.update_cache().await.unwrap();

    let mut list = w.list_cache().await.unwrap();
    assert!(list.next().await.unwrap().is_some());

    let _ = w.quit().await;
}

#[tokio::test]
async fn test_catalog() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    let mut catalog = w.catalog(Some("/france")).await.unwrap();
    let mut count = 0;
    while let Some(item) = catalog.next().await.unwrap() {
        assert_eq!(item.storage, "file");
        assert!(item.public_uri.starts_with("/france/"), "{}", item.public_uri);
        count += 1;
    }
    assert_eq!(count, 3);

    let _ = w.quit().await;
}

#[tokio::test]
async fn test_collections() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    let page = w.collections(None, None, 0..100).await.unwrap();
    assert!(!page.next);
    assert_eq!(page.items.len(), 3);
    assert!(page.items[0].endpoints.contains(msg::OgcEndpoints::MAP));
    assert!(page.items[0].endpoints.contains(msg::OgcEndpoints::FEATURES));
    assert!(!page.items[0].endpoints.contains(msg::OgcEndpoints::COVERAGE));

    // Paging
    let page = w.collections(None, None, 0..2).await.unwrap();
    assert!(page.next);
    assert_eq!(page.items.len(), 2);

    let _ = w.quit().await;
}

#[tokio::test]
async fn test_project_info() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    w.checkout_project("/france/france_parts", true)
        .await
        .unwrap();

    let info = w.project_info("/france/france_parts").await.unwrap();
    assert_eq!(info.crs, "EPSG:4326");
    assert_eq!(info.storage, "file");
    assert!(!info.has_bad_layers);
    assert_eq!(info.layers.len(), 1);
    assert_eq!(info.layers[0].name, "Layer");

    // Not loaded: the method does not load projects
    let err = w.project_info("/france/montpellier").await.unwrap_err();
    assert!(matches!(err, Error::ResponseError(404, _)));

    let _ = w.quit().await;
}

#[tokio::test]
async fn test_plugins() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    let mut plugins = w.list_plugins().await.unwrap();
    let mut names = Vec::new();
    while let Some(item) = plugins.next().await.unwrap() {
        names.push(item.name);
    }
    assert_eq!(names, vec!["dummy_plugin"]);

    let _ = w.quit().await;
}

#[tokio::test]
async fn test_config_roundtrip() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    let config = w.get_config().await.unwrap();
    assert!(config.get("max_chunk_size").is_some());

    w.put_config(&serde_json::json!({ "max_chunk_size": 2048 }))
        .await
        .unwrap();

    let config = w.get_config().await.unwrap();
    assert_eq!(config["max_chunk_size"], 2048);

    let _ = w.quit().await;
}

#[tokio::test]
async fn test_sleep_cancellation() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    // Hold the worker busy, then cancel from the outside
    tokio::select! {
        _ = w.sleep(10) => panic!("sleep should outlive the timeout"),
        _ = tokio::time::sleep(Duration::from_millis(500)) => (),
    }
    w.cancel().await.unwrap();
    w.wait_ready().await.unwrap();

    // The worker is serviceable right away
    let echo = tokio::time::timeout(Duration::from_secs(1), w.ping("awake"))
        .await
        .expect("ping timed out")
        .unwrap();
    assert_eq!(echo, "awake");

    let _ = w.quit().await;
}

#[tokio::test]
async fn test_quit() {
    let fixture = Fixture::new();
    let mut w = start_worker(&fixture).await;

    w.quit().await.unwrap();
    assert!(!w.is_alive());
}
