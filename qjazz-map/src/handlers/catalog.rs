//
// Catalog handlers
//
// Expose the backend collections as a browsable catalog.
//
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use std::cmp;

use crate::channel::{
    qjazz_service::{CollectionsPage, CollectionsRequest},
    Channel,
};
use crate::handlers::response::RpcHttpResponseBuilder;
use crate::handlers::utils::request;
use crate::models::{rel, Link};

const MAX_PAGE_LIMIT: i64 = 50;

//
// Page parameters
//
#[derive(Deserialize)]
#[serde(default)]
pub struct Params {
    page: i64,
    limit: i64,
    prefix: Option<String>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            page: 0,
            limit: MAX_PAGE_LIMIT,
            prefix: None,
        }
    }
}

impl Params {
    fn start(&self) -> i64 {
        self.page.max(0) * cmp::min(self.limit, MAX_PAGE_LIMIT)
    }
    fn end(&self) -> i64 {
        self.start() + cmp::min(self.limit, MAX_PAGE_LIMIT)
    }

    // Navigation links
    fn links(&self, links: &mut Vec<Link>, public_url: &str, next: bool) {
        links.push(Link::application_json(
            format!("{public_url}?page={}&limit={}", self.page, self.limit).into(),
            rel::SELF,
        ));
        if next {
            links.push(Link::application_json(
                format!("{public_url}?page={}&limit={}", self.page + 1, self.limit).into(),
                rel::NEXT,
            ));
        }
        if self.page > 0 {
            links.push(Link::application_json(
                format!("{public_url}?page={}&limit={}", self.page - 1, self.limit).into(),
                rel::PREV,
            ));
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Catalog<'a> {
    collections: Vec<serde_json::Value>,
    links: Vec<Link<'a>>,
}

async fn collections_page(
    channel: &web::Data<Channel>,
    location: Option<String>,
    resource: Option<String>,
    start: i64,
    end: i64,
) -> Result<CollectionsPage, tonic::Status> {
    let mut request = tonic::Request::new(CollectionsRequest {
        location,
        resource,
        start,
        end,
    });
    request.set_timeout(channel.timeout());
    channel
        .client()
        .collections(request)
        .await
        .map(|resp| resp.into_inner())
}

// Catalog listing
pub async fn catalog_handler(
    req: HttpRequest,
    channel: web::Data<Channel>,
    mut params: web::Query<Params>,
) -> impl Responder {
    // A location prefix always names a directory
    let prefix = params.prefix.take().map(|mut s| {
        if !s.ends_with('/') {
            s.push('/');
        }
        s
    });

    if prefix.is_none() && channel.disable_root_catalog() {
        return HttpResponse::Forbidden()
            .content_type("text/plain")
            .body("The root catalog is disabled for this channel");
    }

    match collections_page(&channel, prefix, None, params.start(), params.end()).await {
        Err(status) => RpcHttpResponseBuilder::from_rpc_status(&status, None),
        Ok(page) => {
            let public_url = request::location(&req);
            let mut links = Vec::with_capacity(3);
            params.links(&mut links, &public_url, page.next);

            let collections = page
                .items
                .iter()
                .map(|item| {
                    let mut js: serde_json::Value =
                        serde_json::from_str(&item.json).unwrap_or_default();
                    if let Some(obj) = js.as_object_mut() {
                        obj.insert(
                            "links".into(),
                            serde_json::json!([{
                                "href": format!("{public_url}{}", item.name),
                                "rel": rel::ITEM,
                                "type": mime::APPLICATION_JSON.as_ref(),
                            }]),
                        );
                    }
                    js
                })
                .collect();

            HttpResponse::Ok().json(Catalog { collections, links })
        }
    }
}

// Single catalog item
pub async fn item_handler(
    req: HttpRequest,
    channel: web::Data<Channel>,
    resource: web::Path<String>,
) -> impl Responder {
    let resource = format!("/{}", resource.into_inner());
    match collections_page(&channel, None, Some(resource.clone()), 0, 1).await {
        Err(status) => RpcHttpResponseBuilder::from_rpc_status(&status, None),
        Ok(page) => match page.items.first() {
            None => HttpResponse::NotFound()
                .content_type("text/plain")
                .body(format!("No dataset '{resource}'")),
            Some(item) => {
                let mut js: serde_json::Value =
                    serde_json::from_str(&item.json).unwrap_or_default();
                if let Some(obj) = js.as_object_mut() {
                    obj.insert(
                        "links".into(),
                        serde_json::json!([{
                            "href": request::location(&req),
                            "rel": rel::SELF,
                            "type": mime::APPLICATION_JSON.as_ref(),
                        }]),
                    );
                }
                HttpResponse::Ok().json(js)
            }
        },
    }
}
