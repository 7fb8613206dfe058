//!
//! Request routing rules
//!
//! A request entering a backend scope resolves to a project and
//! a dispatch kind:
//!
//! - The project comes from the `X-Qgis-Project` header first,
//!   then from the `MAP` query (or form) argument, then, for OWS
//!   requests only, from the path tail after the route prefix.
//! - Requests carrying a `SERVICE` argument dispatch as OWS,
//!   everything else as `{api}[/{api_path}]`.
//!
use actix_web::HttpRequest;
use percent_encoding::percent_decode_str;

use crate::handlers::utils::header;

pub const QGIS_PROJECT_HEADER: &str = "x-qgis-project";

/// Case insensitive lookup of an OWS style argument
pub fn ows_param<'a>(key: &str, args: &'a [(String, String)]) -> Option<&'a str> {
    args.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Resolve the target project of a request.
///
/// When both the header and the `MAP` argument are supplied the
/// header wins. The returned path always starts with a `/`.
pub fn resolve_project(
    req: &HttpRequest,
    args: &[(String, String)],
    path_tail: Option<&str>,
) -> Option<String> {
    let project = header::get_as_str(req.headers(), QGIS_PROJECT_HEADER)
        .map(str::to_string)
        .or_else(|| {
            ows_param("MAP", args)
                .map(|map| percent_decode_str(map).decode_utf8_lossy().into_owned())
        })
        .or_else(|| {
            path_tail
                .filter(|tail| !tail.is_empty())
                .map(str::to_string)
        })?;

    if project.starts_with('/') {
        Some(project)
    } else {
        Some(format!("/{project}"))
    }
}

/// Clamp the WFS/GetFeature count arguments.
///
/// The argument clamped is `COUNT` for WFS 2 requests and
/// `MAXFEATURES` otherwise; the effective value is
/// `min(client value, limit)`.
pub fn clamp_getfeature(limit: Option<i64>, args: &mut Vec<(String, String)>) {
    let Some(limit) = limit else {
        return;
    };
    if !ows_param("SERVICE", args)
        .map(|s| s.eq_ignore_ascii_case("WFS"))
        .unwrap_or(false)
        || !ows_param("REQUEST", args)
            .map(|s| s.eq_ignore_ascii_case("GetFeature"))
            .unwrap_or(false)
    {
        return;
    }

    let key = if ows_param("VERSION", args)
        .map(|v| v.starts_with("2."))
        .unwrap_or(false)
    {
        "COUNT"
    } else {
        "MAXFEATURES"
    };

    let mut limit = limit;
    if let Some(actual) = ows_param(key, args).and_then(|v| v.parse::<i64>().ok()) {
        if actual > 0 {
            limit = limit.min(actual);
        }
    }

    match args.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
        Some((_, value)) => *value = limit.to_string(),
        None => args.push((key.to_string(), limit.to_string())),
    }
}

/// Split an api request tail in `(api, api_path)`, stripping
/// presentation suffixes from the api name.
pub fn split_api_path(tail: &str) -> (&str, String) {
    let tail = tail.trim_start_matches('/');
    let (api, path) = match tail.split_once('/') {
        Some((api, path)) => (api, format!("/{path}")),
        None => (tail, String::new()),
    };
    let api = api
        .strip_suffix(".json")
        .or_else(|| api.strip_suffix(".html"))
        .unwrap_or(api);
    (api, path)
}

// =======================
// Tests
// =======================

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn args(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_project_from_map_argument() {
        let req = TestRequest::default().to_http_request();
        let project = resolve_project(&req, &args(&[("MAP", "france/france_parts")]), None);
        assert_eq!(project.as_deref(), Some("/france/france_parts"));
    }

    #[test]
    fn test_project_header_wins() {
        let req = TestRequest::default()
            .insert_header((QGIS_PROJECT_HEADER, "/from/header"))
            .to_http_request();
        let project = resolve_project(&req, &args(&[("MAP", "/from/query")]), None);
        assert_eq!(project.as_deref(), Some("/from/header"));
    }

    #[test]
    fn test_project_from_path_tail() {
        let req = TestRequest::default().to_http_request();
        let project = resolve_project(&req, &[], Some("/france/france_parts"));
        assert_eq!(project.as_deref(), Some("/france/france_parts"));

        assert!(resolve_project(&req, &[], Some("")).is_none());
        assert!(resolve_project(&req, &[], None).is_none());
    }

    #[test]
    fn test_clamp_getfeature_maxfeatures() {
        let mut q = args(&[
            ("SERVICE", "WFS"),
            ("REQUEST", "GetFeature"),
            ("MAXFEATURES", "5000"),
        ]);
        clamp_getfeature(Some(1000), &mut q);
        assert_eq!(ows_param("MAXFEATURES", &q), Some("1000"));

        // The client value wins when below the limit
        let mut q = args(&[
            ("SERVICE", "WFS"),
            ("REQUEST", "GetFeature"),
            ("MAXFEATURES", "10"),
        ]);
        clamp_getfeature(Some(1000), &mut q);
        assert_eq!(ows_param("MAXFEATURES", &q), Some("10"));
    }

    #[test]
    fn test_clamp_getfeature_wfs2() {
        let mut q = args(&[
            ("SERVICE", "WFS"),
            ("REQUEST", "GetFeature"),
            ("VERSION", "2.0.0"),
        ]);
        clamp_getfeature(Some(1000), &mut q);
        assert_eq!(ows_param("COUNT", &q), Some("1000"));
    }

    #[test]
    fn test_clamp_getfeature_not_applicable() {
        let mut q = args(&[("SERVICE", "WMS"), ("REQUEST", "GetMap")]);
        clamp_getfeature(Some(1000), &mut q);
        assert!(ows_param("MAXFEATURES", &q).is_none());

        let mut q = args(&[("SERVICE", "WFS"), ("REQUEST", "GetFeature")]);
        clamp_getfeature(None, &mut q);
        assert!(ows_param("MAXFEATURES", &q).is_none());
    }

    #[test]
    fn test_split_api_path() {
        assert_eq!(split_api_path("/wfs3/collections"), ("wfs3", "/collections".into()));
        assert_eq!(split_api_path("wfs3"), ("wfs3", "".into()));
        assert_eq!(split_api_path("wfs3.json"), ("wfs3", "".into()));
        assert_eq!(split_api_path("wfs3.html"), ("wfs3", "".into()));
    }
}
