//
// CORS configuration
//
// See https://docs.rs/actix-cors/latest/actix_cors/index.html
//
use actix_cors::Cors;
use actix_web::http::{header, Method};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// Http verb with serde support
#[derive(Debug, Clone)]
struct Verb(Method);

impl Serialize for Verb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_str().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Verb {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = Verb;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("Expecting http method verb: GET, ...")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Method::from_str(v)
                    .map(Verb)
                    .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum Origins {
    #[default]
    Any,
    // Activated by default, see 'block_on_origin_mismatch'
    // at https://docs.rs/actix-cors/latest/actix_cors
    SameOrigin,
    Hosts(Vec<String>),
}

/// CORS configuration
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    allowed_methods: Vec<Verb>,
    allowed_headers: Vec<String>,
    allowed_origins: Origins,
    max_age: Option<usize>,
}

impl CorsConfig {
    pub fn configure(&self) -> Cors {
        let mut cors = Cors::default();

        cors = if self.allowed_methods.is_empty() {
            cors.allow_any_method()
        } else {
            cors.allowed_methods(self.allowed_methods.iter().map(|m| m.0.as_str()))
        };

        cors = if self.allowed_headers.is_empty() {
            cors.allow_any_header()
        } else {
            // Always allow the CORS safelisted headers, see
            // https://developer.mozilla.org/en-US/docs/Glossary/CORS-safelisted_request_header
            // AUTHORIZATION is required for authentication
            // schemes implemented on top of the backends.
            cors.allowed_header(header::ACCEPT)
                .allowed_header(header::ACCEPT_LANGUAGE)
                .allowed_header(header::CONTENT_LANGUAGE)
                .allowed_header(header::CONTENT_TYPE)
                .allowed_header(header::RANGE)
                .allowed_header(header::AUTHORIZATION)
                .allowed_headers(&self.allowed_headers)
        };

        cors = match &self.allowed_origins {
            Origins::Any => cors.allow_any_origin(),
            Origins::SameOrigin => cors,
            Origins::Hosts(hosts) => hosts.iter().fold(cors, |cors, o| cors.allowed_origin(o)),
        };

        cors.max_age(self.max_age).send_wildcard()
    }
}
