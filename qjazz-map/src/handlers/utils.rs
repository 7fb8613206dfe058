// Web request helpers

use actix_web::{
    http::header::{AsHeaderName, HeaderMap},
    web, HttpRequest,
};

pub mod request {

    use super::*;

    /// Marker allowing the use of Forwarded informations
    #[derive(Default, Copy, Clone)]
    pub struct ProxyHeaders {
        pub allow: bool,
    }

    /// Public url of a resource.
    ///
    /// When proxy headers are allowed, the url is rebuilt from
    /// the `Forwarded`/`X-Forwarded-*` informations (RFC 7239),
    /// including the optional `x-forwarded-prefix`; see
    /// https://docs.rs/actix-web/latest/actix_web/dev/struct.ConnectionInfo.html
    pub fn public_url(req: &HttpRequest, path: &str) -> String {
        let allow_forwarded = req
            .app_data::<web::ThinData<ProxyHeaders>>()
            .map(|data| data.0.allow)
            .unwrap_or(false);

        if !allow_forwarded {
            return req.uri().to_string();
        }

        let info = req.connection_info();
        let prefix = header::get_as_str(req.headers(), "x-forwarded-prefix")
            .unwrap_or_default()
            .trim_end_matches('/');

        format!(
            "{}://{}{}{}",
            info.scheme(),
            info.host(),
            prefix,
            path.trim_end_matches('/'),
        )
    }

    /// Public url of the request itself
    #[inline]
    pub fn location(req: &HttpRequest) -> String {
        public_url(req, req.path())
    }

    #[inline]
    pub fn header_as_str(req: &HttpRequest, key: impl AsHeaderName) -> Option<&str> {
        header::get_as_str(req.headers(), key)
    }

    #[inline]
    pub fn request_id(req: &HttpRequest) -> Option<&str> {
        header::request_id(req.headers())
    }
}

pub mod header {
    use super::*;

    /// Infallible header lookup as str
    pub fn get_as_str(headers: &HeaderMap, key: impl AsHeaderName) -> Option<&str> {
        headers.get(key).and_then(|value| value.to_str().ok())
    }

    #[inline]
    pub fn request_id(headers: &HeaderMap) -> Option<&str> {
        get_as_str(headers, "x-request-id")
    }
}
