//
// Gateway server configuration
//
use core::net::SocketAddr;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fmt::Display, fs};

use config::{
    builder::{ConfigBuilder, DefaultState},
    Config, ConfigError, Environment, FileFormat,
};
use rustls::server::{ServerConfig as TlsServerConfig, WebPkiClientVerifier};
use rustls_pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};

use crate::cors::CorsConfig;
use crate::logger::Logging;
use crate::resolver::{ChannelConfig, Channels};
use crate::utils::Validator;

fn config_error(msg: impl Display) -> ConfigError {
    ConfigError::Message(msg.to_string())
}

/// Socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenConfig {
    listen: SocketAddr,
    enable_tls: bool,
    tls_key_file: Option<PathBuf>,
    tls_cert_file: Option<PathBuf>,
    tls_client_ca_file: Option<PathBuf>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9080),
            enable_tls: false,
            tls_key_file: None,
            tls_cert_file: None,
            tls_client_ca_file: None,
        }
    }
}

impl Validator for ListenConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enable_tls {
            for (file, what) in [
                (&self.tls_cert_file, "tls_cert_file"),
                (&self.tls_key_file, "tls_key_file"),
            ] {
                match file {
                    None => return Err(config_error(format!("File required for '{what}'"))),
                    Some(path) => Self::validate_filepath(path)?,
                }
            }
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Server {
    /// The interface to listen to
    #[serde(flatten)]
    listen: ListenConfig,
    /// Number of http workers
    num_workers: Option<usize>,
    /// Backend request timeout
    backend_request_timeout: u64,
    /// Shutdown grace period
    shutdown_timeout: u64,
    /// Honor X-Forwarded and RFC 7239 Forwarded headers
    check_forwarded_headers: bool,
    /// CORS configuration
    pub cors: CorsConfig,
}

// For other server limits
// see https://docs.rs/actix-web/latest/actix_web/struct.HttpServer.html

const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

impl Default for Server {
    fn default() -> Self {
        Self {
            listen: ListenConfig::default(),
            num_workers: None,
            backend_request_timeout: ChannelConfig::default_timeout(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            check_forwarded_headers: true,
            cors: CorsConfig::default(),
        }
    }
}

impl Server {
    pub fn num_workers(&self) -> usize {
        self.num_workers.unwrap_or_else(num_cpus::get_physical)
    }
    pub fn bind_address(&self) -> SocketAddr {
        self.listen.listen
    }
    pub fn request_timeout(&self) -> u64 {
        self.backend_request_timeout
    }
    pub fn shutdown_timeout(&self) -> u64 {
        self.shutdown_timeout
    }
    pub fn check_forwarded_headers(&self) -> bool {
        self.check_forwarded_headers
    }

    /// Build the rustls server configuration, with client
    /// certificate verification when a client CA is set.
    pub fn tls_config(&self) -> Result<Option<TlsServerConfig>, ConfigError> {
        if !self.listen.enable_tls {
            return Ok(None);
        }
        // Existence is ensured by validation
        let cert_path = self.listen.tls_cert_file.as_deref().unwrap();
        let key_path = self.listen.tls_key_file.as_deref().unwrap();

        let cert_chain = CertificateDer::pem_file_iter(cert_path)
            .map_err(config_error)?
            .collect::<Result<Vec<CertificateDer>, _>>()
            .map_err(config_error)?;

        let key = PrivateKeyDer::from_pem_file(key_path).map_err(config_error)?;

        let builder = match self.listen.tls_client_ca_file.as_deref() {
            Some(ca_path) => {
                let mut store = rustls::RootCertStore::empty();
                for cert in CertificateDer::pem_file_iter(ca_path).map_err(config_error)? {
                    store
                        .add(cert.map_err(config_error)?)
                        .map_err(config_error)?;
                }
                let verifier = WebPkiClientVerifier::builder(Arc::new(store))
                    .build()
                    .map_err(config_error)?;
                TlsServerConfig::builder().with_client_cert_verifier(verifier)
            }
            None => TlsServerConfig::builder().with_no_client_auth(),
        };

        builder
            .with_single_cert(cert_chain, key)
            .map(Some)
            .map_err(config_error)
    }
}

/// Global settings
#[derive(Default, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: Logging,
    pub server: Server,
    pub backends: Channels,
}

/// Environment variable holding the whole configuration as json
pub const CONF_ENV: &str = "QJAZZ_CONFIG_JSON";

impl Settings {
    pub fn init_logger(&self) {
        self.logging.init()
    }

    /// Load the settings.
    ///
    /// From the given TOML file when one is supplied (with
    /// `${location}` substituted to the file directory),
    /// otherwise from the `QJAZZ_CONFIG_JSON` variable, the
    /// `CONF_*` environment and the defaults.
    pub fn load(conf: Option<&Path>) -> Result<Self, ConfigError> {
        // Environment: CONF_SECTION__KEY=VALUE
        let mut builder = Config::builder().add_source(
            Environment::with_prefix("conf")
                .prefix_separator("_")
                .separator("__")
                .ignore_empty(true),
        );

        builder = match conf {
            Some(path) => {
                builder.add_source(config::File::from_str(&substitute(path)?, FileFormat::Toml))
            }
            None => match std::env::var(CONF_ENV) {
                Ok(doc) => builder.add_source(config::File::from_str(&doc, FileFormat::Json)),
                Err(std::env::VarError::NotPresent) => builder,
                Err(err) => return Err(config_error(err)),
            },
        };

        Self::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let mut this: Self = builder.build()?.try_deserialize()?;
        this.server.listen.validate()?;
        this.backends.validate()?;
        // Propagate the global request timeout
        this.backends.timeout(this.server.request_timeout());
        Ok(this)
    }
}

// Read a configuration file, substituting `${location}` with the
// canonical directory of the file.
fn substitute(path: &Path) -> Result<String, ConfigError> {
    let content = fs::read_to_string(path).map_err(config_error)?;
    match path.parent() {
        Some(dir) => {
            let location = dir.canonicalize().map_err(config_error)?;
            let vars =
                std::collections::BTreeMap::from([("location", location.to_string_lossy())]);
            subst::substitute(&content, &vars).map_err(config_error)
        }
        None => Ok(content),
    }
}
