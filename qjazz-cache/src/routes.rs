//!
//! Search path routing
//!
//! An ordered table of routes mapping public path prefixes to
//! root urls. Routes are either static or dynamic; dynamic routes
//! hold `{name}` placeholders bound left-to-right from the request
//! path, each placeholder covering exactly one path segment.
//!
use url::Url;

use crate::errors::{Error, Result};

/// A pattern segment of a dynamic route location
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

fn parse_segments(location: &str) -> Vec<Segment> {
    location
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.starts_with('{') && s.ends_with('}') {
                Segment::Placeholder(s[1..s.len() - 1].to_string())
            } else {
                Segment::Literal(s.to_string())
            }
        })
        .collect()
}

// Add a default `file` scheme to scheme-less targets
fn parse_rooturl(target: &str) -> Result<Url> {
    let spec = if target.contains(':') {
        target.to_string()
    } else {
        format!("file:{target}")
    };
    Url::parse(&spec).map_err(|err| Error::InvalidRootUrl(target.to_string(), err.to_string()))
}

/// Static route: plain prefix to root url
#[derive(Debug, Clone)]
pub struct StaticRoute {
    location: String,
    url: Url,
}

/// Dynamic route: prefix pattern with placeholders
#[derive(Debug, Clone)]
pub struct DynamicRoute {
    pattern: Vec<Segment>,
    target: String,
}

#[derive(Debug, Clone)]
pub enum Route {
    Static(StaticRoute),
    Dynamic(DynamicRoute),
}

impl Route {
    pub fn new(location: &str, target: &str) -> Result<Self> {
        if !location.starts_with('/') {
            return Err(Error::InvalidRootUrl(
                target.to_string(),
                format!("location '{location}' must start with '/'"),
            ));
        }
        if location.contains('{') {
            let pattern = parse_segments(location);
            // Check that every target placeholder is bound by the location
            for seg in &pattern {
                if let Segment::Placeholder(name) = seg {
                    if !target.contains(&format!("{{{name}}}")) {
                        log::warn!("Unused placeholder '{name}' in route '{location}'");
                    }
                }
            }
            Ok(Route::Dynamic(DynamicRoute {
                pattern,
                target: target.to_string(),
            }))
        } else {
            Ok(Route::Static(StaticRoute {
                location: location.trim_end_matches('/').to_string(),
                url: parse_rooturl(target)?,
            }))
        }
    }

    /// Resolve a public path against this route.
    ///
    /// Returns the matched location prefix and the substituted
    /// root url; the caller joins the path remainder.
    pub fn resolve_path(&self, path: &str) -> Result<Option<(String, Url)>> {
        match self {
            Route::Static(route) => {
                if strip_route_prefix(path, &route.location).is_some() {
                    Ok(Some((route.location.clone(), route.url.clone())))
                } else {
                    Ok(None)
                }
            }
            Route::Dynamic(route) => route.resolve(path),
        }
    }

    // Number of location segments, used for most-specific-first ordering
    fn weight(&self) -> usize {
        match self {
            Route::Static(route) => route.location.split('/').count(),
            Route::Dynamic(route) => route.pattern.len(),
        }
    }
}

impl DynamicRoute {
    fn resolve(&self, path: &str) -> Result<Option<(String, Url)>> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < self.pattern.len() {
            return Ok(None);
        }
        let mut target = self.target.clone();
        let mut location = String::new();
        for (seg, part) in self.pattern.iter().zip(&segments) {
            match seg {
                Segment::Literal(lit) => {
                    if lit != part {
                        return Ok(None);
                    }
                }
                Segment::Placeholder(name) => {
                    target = target.replace(&format!("{{{name}}}"), part);
                }
            }
            location.push('/');
            location.push_str(part);
        }
        Ok(Some((location, parse_rooturl(&target)?)))
    }
}

/// Ordered route table
#[derive(Debug, Clone, Default)]
pub struct Routes {
    routes: Vec<Route>,
}

impl Routes {
    /// Build the table from `(location, target)` pairs.
    ///
    /// Routes are ordered most-specific first so that every accepted
    /// public path resolves to exactly one route.
    pub fn from_paths<'a, I>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut routes = paths
            .into_iter()
            .map(|(location, target)| Route::new(location, target))
            .collect::<Result<Vec<_>>>()?;
        routes.sort_by_key(|r| std::cmp::Reverse(r.weight()));
        Ok(Self { routes })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// Resolve a public path to `(location, root url)`
    pub fn resolve_path(&self, path: &str) -> Result<Option<(String, Url)>> {
        for route in &self.routes {
            if let Some(found) = route.resolve_path(path)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Known locations and their root urls.
    ///
    /// Without a prefix only static routes are returned since dynamic
    /// routes have no enumerable location. With a prefix, the prefix
    /// itself is resolved so that dynamic routes bound by it show up.
    pub fn locations(&self, prefix: Option<&str>) -> Result<Vec<(String, Url)>> {
        match prefix {
            None => Ok(self
                .routes
                .iter()
                .filter_map(|route| match route {
                    Route::Static(r) => Some((r.location.clone(), r.url.clone())),
                    Route::Dynamic(_) => None,
                })
                .collect()),
            Some(prefix) => {
                let mut locations = Vec::new();
                let prefix = prefix.trim_end_matches('/');
                for route in &self.routes {
                    match route {
                        Route::Static(r) => {
                            if strip_route_prefix(&r.location, prefix).is_some() {
                                locations.push((r.location.clone(), r.url.clone()));
                            }
                        }
                        Route::Dynamic(_) => {
                            if let Some(found) = route.resolve_path(prefix)? {
                                locations.push(found);
                            }
                        }
                    }
                }
                Ok(locations)
            }
        }
    }
}

/// Strip a route location from a public path, checking the
/// segment boundary.
pub(crate) fn strip_route_prefix<'a>(path: &'a str, location: &str) -> Option<&'a str> {
    path.strip_prefix(location)
        .filter(|rest| rest.is_empty() || rest.starts_with('/'))
}

// =======================
// Tests
// =======================

#[cfg(test)]
mod tests {
    use super::*;

    fn routes() -> Routes {
        Routes::from_paths([
            ("/foo/bar", "/myfoo/mybar"),
            ("/baz/{loc1}/{loc2}", "/mybaz/{loc1}/myloc/{loc2}"),
        ])
        .unwrap()
    }

    #[test]
    fn test_static_locations() {
        let locs = routes().locations(None).unwrap();
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].0, "/foo/bar");
        assert_eq!(locs[0].1, Url::parse("file:/myfoo/mybar").unwrap());
    }

    #[test]
    fn test_locations_with_prefix() {
        let locs = routes().locations(Some("/foo")).unwrap();
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].0, "/foo/bar");

        let locs = routes().locations(Some("/baz/loc1/loc2")).unwrap();
        assert_eq!(locs.len(), 1);
        assert_eq!(locs[0].0, "/baz/loc1/loc2");
        assert_eq!(
            locs[0].1,
            Url::parse("file:/mybaz/loc1/myloc/loc2").unwrap()
        );
    }

    #[test]
    fn test_dynamic_resolution() {
        let routes = routes();
        let (location, url) = routes
            .resolve_path("/baz/path1/path2/myproject.qgs")
            .unwrap()
            .expect("expecting dynamic route match");
        assert_eq!(location, "/baz/path1/path2");
        assert_eq!(url, Url::parse("file:/mybaz/path1/myloc/path2").unwrap());
    }

    #[test]
    fn test_no_match() {
        let routes = routes();
        assert!(routes.resolve_path("/unknown/path").unwrap().is_none());
        // Prefix boundary is enforced
        assert!(routes.resolve_path("/foo/barbar").unwrap().is_none());
    }
}
