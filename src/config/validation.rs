use super::cli::Config;
use super::naming::NamingScheme;
use super::{ConfigError, ProtocolMode};
use tracing::warn;
use url::Url;

/// Factory-default device name. Data from an unnamed device would collide
/// with every other unnamed device on the server.
const DEFAULT_DEVICE_NAME: &str = "eWON";

impl Config {
    pub(super) fn validate(&mut self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.server_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {e}", self.server_url)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "server URL must be http(s), got {}",
                self.server_url
            )));
        }

        if self.device_name.is_empty() || self.device_name == DEFAULT_DEVICE_NAME {
            return Err(ConfigError::InvalidConfig(format!(
                "device name must be changed from the default \"{DEFAULT_DEVICE_NAME}\""
            )));
        }

        match self.protocol {
            ProtocolMode::LegacyBatch => {
                if self.credentials.is_none() {
                    return Err(ConfigError::InvalidConfig(
                        "legacy-batch protocol requires credentials".to_string(),
                    ));
                }
                if self.dataserver_web_id.is_none() {
                    return Err(ConfigError::InvalidConfig(
                        "legacy-batch protocol requires dataserver-web-id".to_string(),
                    ));
                }
            }
            ProtocolMode::Omf => {
                if self.credentials.is_none() {
                    return Err(ConfigError::InvalidConfig(
                        "omf protocol requires credentials".to_string(),
                    ));
                }
            }
            ProtocolMode::OmfCloud => {
                if self.token_file.is_none() {
                    return Err(ConfigError::InvalidConfig(
                        "omf-cloud protocol requires token-file".to_string(),
                    ));
                }
            }
        }

        // An unusable naming scheme falls back to the default rather than
        // aborting, matching the device-side connector behavior.
        if NamingScheme::parse(&self.naming_scheme).is_err() {
            warn!(
                scheme = %self.naming_scheme,
                "Invalid container naming scheme, falling back to default"
            );
            self.naming_scheme = "default".to_string();
        }

        if self.http_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "http-timeout-secs must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}
