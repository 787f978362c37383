use super::{ConfigError, LogLevel, ProtocolMode};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Forwarder configuration. Every knob is a CLI flag with an environment
/// variable fallback; a TOML file named by `--config-file` overrides any key
/// it sets.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Historian server base URL, e.g. https://pi.example.com
    #[arg(long, env = "HISTORIAN_SERVER_URL")]
    pub server_url: String,

    /// Pre-encoded base64 "user:password" for Basic authentication
    #[arg(long, env = "HISTORIAN_CREDENTIALS")]
    pub credentials: Option<String>,

    /// WebId of the target dataserver (legacy protocol only)
    #[arg(long, env = "HISTORIAN_DATASERVER_WEB_ID")]
    pub dataserver_web_id: Option<String>,

    /// Wire protocol for shipping batches
    #[arg(long, env = "HISTORIAN_PROTOCOL", default_value = "omf")]
    pub protocol: ProtocolMode,

    /// Full OMF endpoint URL for the cloud protocol (overrides server-url)
    #[arg(long, env = "HISTORIAN_CLOUD_OMF_URL")]
    pub cloud_omf_url: Option<String>,

    /// Device name, used in OMF type identifiers
    #[arg(long, env = "DEVICE_NAME")]
    pub device_name: String,

    /// Device serial number, available to the container naming scheme
    #[arg(long, env = "DEVICE_SERIAL", default_value = "")]
    pub device_serial: String,

    /// Container naming scheme: "default" or dash-separated tokens
    /// out of tn (tag name), sn (serial), tt (tag type)
    #[arg(long, env = "CONTAINER_NAMING_SCHEME", default_value = "default")]
    pub naming_scheme: String,

    /// Path to the bearer token file (cloud protocol only)
    #[arg(long, env = "TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// Path to the tag catalog JSON file
    #[arg(long, env = "TAG_CATALOG_FILE", default_value = "tags.json")]
    pub catalog_file: PathBuf,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value = "30")]
    pub http_timeout_secs: u64,

    /// Sample source poll interval in milliseconds
    #[arg(long, env = "DATA_POLL_RATE_MS", default_value = "1000")]
    pub data_poll_rate_ms: u64,

    /// Delivery loop interval in milliseconds
    #[arg(long, env = "DATA_POST_RATE_MS", default_value = "500")]
    pub data_post_rate_ms: u64,

    /// Delay between provisioning passes in milliseconds
    #[arg(long, env = "PROVISION_RETRY_MS", default_value = "1000")]
    pub provision_retry_ms: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// Optional TOML configuration file
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,
}

/// Subset of keys a TOML config file may override.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileOverrides {
    server_url: Option<String>,
    credentials: Option<String>,
    dataserver_web_id: Option<String>,
    protocol: Option<ProtocolMode>,
    cloud_omf_url: Option<String>,
    device_name: Option<String>,
    device_serial: Option<String>,
    naming_scheme: Option<String>,
    token_file: Option<PathBuf>,
    catalog_file: Option<PathBuf>,
    http_timeout_secs: Option<u64>,
    data_poll_rate_ms: Option<u64>,
    data_post_rate_ms: Option<u64>,
    provision_retry_ms: Option<u64>,
    log_level: Option<LogLevel>,
    log_json: Option<bool>,
}

impl Config {
    /// Parse CLI/env arguments, merge the optional config file, validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::parse();
        config.merge_file()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from an explicit argument list (used by tests).
    pub fn load_from<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config =
            Self::try_parse_from(args).map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        config.merge_file()?;
        config.validate()?;
        Ok(config)
    }

    fn merge_file(&mut self) -> Result<(), ConfigError> {
        let Some(path) = self.config_file.clone() else {
            return Ok(());
        };
        let raw = std::fs::read_to_string(&path)?;
        let overrides: FileOverrides = toml::from_str(&raw)?;
        self.apply(overrides);
        Ok(())
    }

    fn apply(&mut self, o: FileOverrides) {
        macro_rules! set {
            ($field:ident) => {
                if let Some(value) = o.$field {
                    self.$field = value;
                }
            };
        }
        set!(server_url);
        set!(protocol);
        set!(device_name);
        set!(device_serial);
        set!(naming_scheme);
        set!(catalog_file);
        set!(http_timeout_secs);
        set!(data_poll_rate_ms);
        set!(data_post_rate_ms);
        set!(provision_retry_ms);
        set!(log_level);
        if let Some(v) = o.credentials {
            self.credentials = Some(v);
        }
        if let Some(v) = o.dataserver_web_id {
            self.dataserver_web_id = Some(v);
        }
        if let Some(v) = o.cloud_omf_url {
            self.cloud_omf_url = Some(v);
        }
        if let Some(v) = o.token_file {
            self.token_file = Some(v);
        }
        if let Some(v) = o.log_json {
            self.log_json = v;
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.data_poll_rate_ms)
    }

    pub fn post_interval(&self) -> Duration {
        Duration::from_millis(self.data_post_rate_ms)
    }

    pub fn provision_retry_delay(&self) -> Duration {
        Duration::from_millis(self.provision_retry_ms)
    }
}
