//!
//! Backend channel configuration
//!
use config::ConfigError;
use regex::{Regex, RegexBuilder};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{btree_map, BTreeMap};
use std::path::PathBuf;
use std::time::Duration;
use std::{fmt, fs, io};
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

use crate::utils::Validator;

/// Channel host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelService {
    /// Hostname
    host: String,
    /// Port
    port: u16,
    /// Enable TLS
    enable_tls: bool,
    /// CA certificate
    cafile: Option<PathBuf>,
    /// Client authentication key
    client_key_file: Option<PathBuf>,
    /// Client authentication certificate
    client_cert_file: Option<PathBuf>,
}

impl Validator for ChannelService {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enable_tls {
            for file in [&self.cafile, &self.client_key_file, &self.client_cert_file] {
                if let Some(path) = file.as_deref() {
                    Self::validate_filepath(path)?;
                }
            }
        }
        Ok(())
    }
}

const DEFAULT_CHANNEL_PORT: u16 = 23456;

impl Default for ChannelService {
    fn default() -> Self {
        Self {
            // NOTE: localhost resolves to ipv4 as first ip
            host: "localhost".into(),
            port: DEFAULT_CHANNEL_PORT,
            enable_tls: false,
            cafile: None,
            client_key_file: None,
            client_cert_file: None,
        }
    }
}

/// Header name predicate
#[derive(Debug, Clone)]
pub enum HeaderFilter {
    Plain(String),
    Prefix(String),
    Suffix(String),
    Regex(Regex),
}

impl Serialize for HeaderFilter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Plain(s) => s.serialize(serializer),
            Self::Prefix(s) => format!("{s}*").serialize(serializer),
            Self::Suffix(s) => format!("*{s}").serialize(serializer),
            Self::Regex(r) => format!("re:{r}").serialize(serializer),
        }
    }
}

impl std::str::FromStr for HeaderFilter {
    type Err = regex::Error;

    fn from_str(pattern: &str) -> Result<Self, Self::Err> {
        if let Some(expr) = pattern.strip_prefix("re:") {
            RegexBuilder::new(expr)
                .case_insensitive(true)
                .build()
                .map(HeaderFilter::Regex)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            Ok(HeaderFilter::Suffix(suffix.to_lowercase()))
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            Ok(HeaderFilter::Prefix(prefix.to_lowercase()))
        } else {
            Ok(HeaderFilter::Plain(pattern.to_lowercase()))
        }
    }
}

impl<'de> Deserialize<'de> for HeaderFilter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = HeaderFilter;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("Expecting string pattern expression")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                v.parse().map_err(|err| {
                    log::error!("Invalid regular expression: {err:?}");
                    de::Error::invalid_value(de::Unexpected::Str(v), &self)
                })
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

impl HeaderFilter {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Plain(s) => name.eq_ignore_ascii_case(s),
            Self::Prefix(s) => name.starts_with(s),
            Self::Suffix(s) => name.ends_with(s),
            Self::Regex(r) => r.is_match(name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderFilters(Vec<HeaderFilter>);

impl Default for HeaderFilters {
    fn default() -> Self {
        Self(vec![
            HeaderFilter::Prefix("x-qgis-".into()),
            HeaderFilter::Prefix("x-lizmap-".into()),
        ])
    }
}

impl HeaderFilters {
    pub fn matches(&self, name: &str) -> bool {
        self.0.iter().any(|filter| filter.matches(name))
    }
}

/// Backend channel configuration
#[derive(Default, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// Connection to service parameters
    #[serde(flatten)]
    service: ChannelService,
    /// A descriptive title
    pub title: String,
    /// Description of the service
    pub description: String,
    /// Route to service
    pub route: String,
    /// Logical pool the backend belongs to for fleet wide
    /// admin operations; defaults to the backend name.
    pub label: Option<String>,
    /// Headers forwarded to the backend service.
    ///
    /// Header names are compared with the following rules:
    /// - Plain name comparison
    /// - Suffix match if starting with '*'
    /// - Prefix match if ending with '*'
    /// - Regex match if prefixed with 're:'
    pub forward_headers: HeaderFilters,
    /// Allow sending direct project paths to the backend.
    /// Requires that the backend allows direct resolution.
    pub allow_direct_resolution: bool,
    /// Clamp the WFS/GetFeature returned features.
    ///
    /// The engine does not set a default limit and unlimited
    /// requests may cause issues.
    pub getfeature_limit: Option<i64>,
    /// Api endpoints
    pub api: Vec<ApiEndPoint>,
    /// Disable the root catalog api: requesting the catalog
    /// returns a 403 response with an informative message.
    pub disable_root_catalog: bool,
    /// Channel request timeout
    timeout: Option<u64>,
}

impl Validator for ChannelConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.service.validate()?;

        if !self.route.starts_with('/') {
            return Err(ConfigError::Message(format!(
                "Path {} must starts with a '/'",
                self.route,
            )));
        }

        self.api.iter().try_for_each(|api| api.validate())
    }
}

const PROBE_INTERVAL: u64 = 5;

// NOTE: backends usually have a response timeout set,
// see the rpc server for details.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

impl ChannelConfig {
    pub fn default_timeout() -> u64 {
        DEFAULT_REQUEST_TIMEOUT_SECS
    }

    pub fn service(&self) -> (&str, u16) {
        (self.hostname(), self.service.port)
    }
    pub fn hostname(&self) -> &str {
        self.service.host.as_str()
    }
    pub fn enable_tls(&self) -> bool {
        self.service.enable_tls
    }
    pub fn tls_config(&self) -> io::Result<ClientTlsConfig> {
        if !self.service.enable_tls {
            return Err(io::Error::other("TLS not enabled"));
        }

        let mut tls = ClientTlsConfig::new().domain_name(self.hostname());

        if let Some(cafile) = self.service.cafile.as_deref() {
            tls = tls.ca_certificate(Certificate::from_pem(fs::read_to_string(cafile)?));
        }

        if let (Some(cert_file), Some(key_file)) = (
            self.service.client_cert_file.as_deref(),
            self.service.client_key_file.as_deref(),
        ) {
            tls = tls.identity(Identity::from_pem(
                fs::read_to_string(cert_file)?,
                fs::read_to_string(key_file)?,
            ));
        }

        Ok(tls)
    }
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(PROBE_INTERVAL)
    }
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS))
    }
}

/// Api endpoint
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiEndPoint {
    /// Api endpoint
    pub endpoint: String,
    /// Delegate the api request
    ///
    /// Api delegation allows using a base url different from
    /// the expected root path of the engine api: wfs3 requests
    /// may be mapped to a completely different root path.
    pub delegate: bool,
    /// Descriptive name
    pub name: String,
    /// Api description
    pub description: String,
}

impl Validator for ApiEndPoint {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.contains('/') {
            Err(ConfigError::Message(
                "Api endpoint must not contains separator '/'".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

// Channels as a B-tree map: paths sharing a prefix are sorted
// shortest to longest.
#[derive(Default, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Channels(BTreeMap<String, ChannelConfig>);

impl Validator for Channels {
    fn validate(&self) -> Result<(), ConfigError> {
        self.0.iter().try_for_each(|(_, c)| c.validate())?;
        if self.0.len() > 1 {
            return self.0.iter().try_for_each(|(_, c)| {
                if c.route == "/" {
                    Err(ConfigError::Message(
                        "Route '/' is not allowed with multiple backends".to_string(),
                    ))
                } else {
                    Ok(())
                }
            });
        }
        Ok(())
    }
}

impl Channels {
    // Check for a single backend routed at "/"
    pub fn is_single_root_channel(&self) -> bool {
        self.0.len() == 1 && self.0.first_key_value().unwrap().1.route == "/"
    }

    // Set the timeout where not set on a per config basis
    pub fn timeout(&mut self, timeout: u64) {
        self.0.iter_mut().for_each(|(_, cfg)| {
            if cfg.timeout.is_none() {
                cfg.timeout = Some(timeout);
            }
        });
    }
}

impl IntoIterator for Channels {
    type Item = (String, ChannelConfig);
    type IntoIter = btree_map::IntoIter<String, ChannelConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// =======================
// Tests
// =======================

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(pattern: &str) -> HeaderFilter {
        pattern.parse().unwrap()
    }

    #[test]
    fn test_header_filter_patterns() {
        assert!(filter("x-qgis-*").matches("x-qgis-project"));
        assert!(!filter("x-qgis-*").matches("x-lizmap-user"));
        assert!(filter("*-id").matches("x-request-id"));
        assert!(filter("authorization").matches("Authorization"));
        assert!(filter("re:^x-(qgis|lizmap)-").matches("X-Lizmap-User"));
        assert!(filter("re:^x-(qgis|lizmap)-").matches("x-qgis-project"));
        assert!(!filter("re:^x-(qgis|lizmap)-").matches("x-other"));
    }

    #[test]
    fn test_header_filter_defaults() {
        let filters = HeaderFilters::default();
        assert!(filters.matches("x-qgis-project"));
        assert!(filters.matches("x-lizmap-user"));
        assert!(!filters.matches("cookie"));
    }

    #[test]
    fn test_channel_config_validation() {
        let config = ChannelConfig {
            route: "no-slash".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ChannelConfig {
            route: "/france".into(),
            api: vec![ApiEndPoint {
                endpoint: "bad/endpoint".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
