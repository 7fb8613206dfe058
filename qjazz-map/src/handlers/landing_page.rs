//
// Landing page: one entry per configured backend with its
// availability and the link to its catalog.
//
use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde_json::json;

use crate::channel::Channel;
use crate::handlers::utils::request;
use crate::models::rel;

type Channels = Vec<web::Data<Channel>>;

pub async fn handler(req: HttpRequest, channels: web::Data<Channels>) -> impl Responder {
    let public_url = request::public_url(&req, "");

    let endpoints: Vec<_> = channels
        .iter()
        .map(|channel| {
            json!({
                "name": channel.name(),
                "title": channel.title(),
                "description": channel.description(),
                "available": channel.serving(),
                "links": [{
                    "href": format!("{public_url}{}/catalog", channel.route()),
                    "rel": rel::RELATED,
                    "type": mime::APPLICATION_JSON.as_ref(),
                    "title": "Catalog",
                    "description": "Catalog of datasets from this endpoint",
                }],
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "endpoints": endpoints,
        "links": [{
            "href": format!("{public_url}{}", req.path()),
            "rel": rel::SELF,
            "type": mime::APPLICATION_JSON.as_ref(),
        }],
    }))
}
