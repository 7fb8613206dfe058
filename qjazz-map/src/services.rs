//
// Service routing tables
//
use crate::channel::Channel;
use crate::handlers::{admin, api, catalog, landing_page, ows};
use crate::resolver::ApiEndPoint;
use actix_web::{guard, web};

// Configuration for an api endpoint
pub fn api_scope(api: web::Data<ApiEndPoint>) -> impl FnOnce(&mut web::ServiceConfig) {
    let path = format!("/{}", api.endpoint);

    let scope = web::scope(path.as_str())
        .app_data(api.clone())
        .route("{path:.*}", web::to(api::handler))
        .default_service(web::to(api::default_handler));

    move |cfg| {
        cfg.service(scope)
            .service(
                web::resource(format!("{path}.json").as_str())
                    .app_data(api.clone())
                    .to(api::default_handler),
            )
            .service(
                web::resource(format!("{path}.html").as_str())
                    .app_data(api.clone())
                    .to(api::default_handler),
            );
    }
}

// Configuration for OWS handling at the scope root
pub fn ows_resource(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("")
            .route(
                web::post()
                    .guard(guard::Header(
                        "content-type",
                        "application/x-www-form-urlencoded",
                    ))
                    .to(ows::form_handler),
            )
            .route(web::to(ows::query_handler)),
    );
}

// OWS requests with the project path after the route prefix;
// registered last so that api and catalog routes win.
pub fn ows_fallback(cfg: &mut web::ServiceConfig) {
    cfg.route("/{target:.*}", web::to(ows::path_handler));
}

// Landing page
pub fn landing_page(channels: Vec<web::Data<Channel>>) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.service(
            web::resource("/")
                .app_data(web::Data::new(channels))
                .get(landing_page::handler),
        );
    }
}

//
// Catalog
//
pub fn catalog(cfg: &mut web::ServiceConfig) {
    cfg.route("/catalog", web::get().to(catalog::catalog_handler))
        .route(
            "/catalog/{resource:.*}",
            web::get().to(catalog::item_handler),
        );
}

//
// Admin surface
//
pub fn admin_scope(state: web::Data<admin::AdminState>) -> impl FnOnce(&mut web::ServiceConfig) {
    let scope = web::scope("/_")
        .app_data(state)
        .route("/config", web::get().to(admin::get_config))
        .route("/config", web::patch().to(admin::patch_config))
        .route("/config", web::put().to(admin::put_config))
        .route("/backends", web::get().to(admin::list_backends))
        .route("/backends/{label}", web::get().to(admin::backend_stats))
        .route("/backends/{label}/catalog", web::get().to(admin::catalog))
        .route(
            "/backends/{label}/cache",
            web::get().to(admin::cache_content),
        )
        .route(
            "/backends/{label}/cache",
            web::post().to(admin::pull_projects),
        )
        .route(
            "/backends/{label}/cache",
            web::put().to(admin::synchronize_cache),
        )
        .route(
            "/backends/{label}/cache",
            web::delete().to(admin::clear_cache),
        );

    move |cfg| {
        cfg.service(scope);
    }
}
