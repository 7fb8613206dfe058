//
// RPC server configuration
//
use core::net::SocketAddr;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

use config::{
    builder::{ConfigBuilder, DefaultState},
    Config, ConfigError, Environment, FileFormat,
};

use crate::logger::Logging;

fn config_error(msg: impl std::fmt::Display) -> ConfigError {
    ConfigError::Message(msg.to_string())
}

fn require_file(path: Option<&Path>, what: &str) -> Result<(), ConfigError> {
    match path {
        None => Err(config_error(format!("Path required for '{what}'"))),
        Some(p) if !p.exists() => Err(config_error(format!(
            "File {} does not exists !",
            p.display()
        ))),
        Some(_) => Ok(()),
    }
}

/// Socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    address: SocketAddr,
    enable_tls: bool,
    tls_key_file: Option<PathBuf>,
    tls_cert_file: Option<PathBuf>,
    tls_client_cafile: Option<PathBuf>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 23456),
            enable_tls: false,
            tls_key_file: None,
            tls_cert_file: None,
            tls_client_cafile: None,
        }
    }
}

impl ListenConfig {
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.enable_tls {
            require_file(self.tls_cert_file.as_deref(), "TLS cert file")?;
            require_file(self.tls_key_file.as_deref(), "TLS key file")?;
        }
        Ok(())
    }
}

/// RPC server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Rpc {
    /// The interface to listen to
    listen: ListenConfig,
    /// Use admin services
    enable_admin_services: bool,
    /// Timeout for requests in seconds
    timeout: u64,
    /// The maximum amount of time to wait in seconds before
    /// closing connections. During this period,
    /// no new connections are allowed.
    shutdown_grace_period: u64,
    /// The maximum allowed failure pressure.
    /// If the failure pressure exceeds this value then
    /// the service exits with a critical error condition.
    max_failure_pressure: f64,
    /// Interval in seconds between two pool maintenance passes
    rescale_period: u64,
    /// Memory high water mark as a fraction of total memory.
    /// Workers are killed if their total memory usage exceeds
    /// that value.
    high_water_mark: f64,
    /// Interval in seconds between two checks of the
    /// out-of-memory watchdog.
    oom_period: u64,
}

impl Default for Rpc {
    fn default() -> Self {
        Self {
            listen: Default::default(),
            timeout: 20,
            shutdown_grace_period: 10,
            enable_admin_services: true,
            max_failure_pressure: 0.9,
            rescale_period: 30,
            high_water_mark: 0.9,
            oom_period: 5,
        }
    }
}

impl Rpc {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.high_water_mark) || self.high_water_mark == 0. {
            return Err(config_error(
                "'high_water_mark' value must be between 0 and 1",
            ));
        }
        if self.oom_period < 3 {
            return Err(config_error("'oom_period' must be higher than 3s"));
        }
        self.listen.validate()
    }

    pub fn listen(&self) -> &ListenConfig {
        &self.listen
    }
    pub fn enable_admin_services(&self) -> bool {
        self.enable_admin_services
    }
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period)
    }
    pub fn max_failure_pressure(&self) -> f64 {
        self.max_failure_pressure
    }
    pub fn rescale_period(&self) -> Duration {
        Duration::from_secs(self.rescale_period)
    }
    pub fn enable_tls(&self) -> bool {
        self.listen.enable_tls
    }
    pub fn tls_key(&self) -> io::Result<String> {
        fs::read_to_string(self.listen.tls_key_file.as_ref().unwrap())
    }
    pub fn tls_cert(&self) -> io::Result<String> {
        fs::read_to_string(self.listen.tls_cert_file.as_ref().unwrap())
    }
    pub fn tls_client_ca(&self) -> Option<io::Result<String>> {
        self.listen
            .tls_client_cafile
            .as_deref()
            .map(fs::read_to_string)
    }
    pub fn high_water_mark(&self) -> f64 {
        self.high_water_mark
    }
    pub fn oom_period(&self) -> Duration {
        Duration::from_secs(self.oom_period)
    }
}

/// Global settings
#[derive(Default, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: Logging,
    pub rpc: Rpc,
    pub worker: qjazz_pool::WorkerOptions,
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
                .ignore_empty(true)
                .try_parsing(true) // Treat env as string list
                .list_separator(",")
                .with_list_parse_key("worker.restore_projects"),
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
        let this: Self = builder.build()?.try_deserialize()?;
        this.rpc.validate()?;
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
