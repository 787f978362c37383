//! Everything that talks to the historian: the HTTP transport, response
//! classification, resource provisioning, token refresh and the delivery
//! loop itself.

pub mod delivery;
pub mod provision;
pub mod response;
pub mod token;
pub mod transport;

pub use delivery::DeliveryLoop;
pub use provision::{ProvisionError, Provisioner};
pub use response::{ResponseError, classify};
pub use token::{FileTokenSource, TokenError, TokenSource};
pub use transport::{HttpMethod, LinkState, Transport, TransportError};

use crate::config::ProtocolMode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("Credential material is not a valid header value")]
    InvalidCredentials,
}

/// Which OMF message type a request carries. Drives the `messagetype`
/// header the endpoint dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Type,
    Container,
    Data,
}

impl MessageKind {
    fn header_value(self) -> HeaderValue {
        match self {
            MessageKind::Type => HeaderValue::from_static("type"),
            MessageKind::Container => HeaderValue::from_static("container"),
            MessageKind::Data => HeaderValue::from_static("data"),
        }
    }
}

/// URL construction for every endpoint the forwarder touches. Trailing
/// slashes on the configured base are normalized away once, here.
#[derive(Debug, Clone)]
pub struct ServerRoutes {
    base: String,
    cloud_omf: Option<String>,
}

impl ServerRoutes {
    pub fn new(server_url: &str, cloud_omf_url: Option<String>) -> Self {
        let mut base = server_url.to_string();
        while base.ends_with('/') {
            base.pop();
        }
        Self {
            base,
            cloud_omf: cloud_omf_url,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Point collection under the configured data server, with an exact
    /// name filter.
    pub fn points_query_url(&self, dataserver_web_id: &str, tag_name: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(tag_name.as_bytes()).collect();
        format!(
            "{}/piwebapi/dataservers/{}/points?nameFilter={}",
            self.base, dataserver_web_id, encoded
        )
    }

    pub fn points_url(&self, dataserver_web_id: &str) -> String {
        format!("{}/piwebapi/dataservers/{}/points", self.base, dataserver_web_id)
    }

    pub fn point_attribute_url(&self, point_web_id: &str, attribute: &str) -> String {
        format!(
            "{}/piwebapi/points/{}/attributes/{}",
            self.base, point_web_id, attribute
        )
    }

    pub fn batch_url(&self) -> String {
        format!("{}/piwebapi/batch/", self.base)
    }

    /// The OMF ingress endpoint. The cloud variant posts to its own URL
    /// instead of a path under the server base.
    pub fn omf_url(&self) -> String {
        match &self.cloud_omf {
            Some(url) => url.clone(),
            None => format!("{}/piwebapi/omf", self.base),
        }
    }

    pub fn data_url(&self, mode: ProtocolMode) -> String {
        match mode {
            ProtocolMode::LegacyBatch => self.batch_url(),
            ProtocolMode::Omf | ProtocolMode::OmfCloud => self.omf_url(),
        }
    }
}

/// Builds the header set for each request kind. Basic credentials are
/// fixed at construction; bearer tokens are passed per request because the
/// cloud token rotates.
#[derive(Debug, Clone)]
pub struct HeaderFactory {
    mode: ProtocolMode,
    credentials: Option<String>,
}

impl HeaderFactory {
    pub fn new(mode: ProtocolMode, credentials: Option<String>) -> Self {
        Self { mode, credentials }
    }

    /// Headers common to every request: JSON content type, the CSRF
    /// opt-out the PI Web API expects, and the auth scheme for the mode.
    pub fn base(&self, bearer: Option<&str>) -> Result<HeaderMap, HeaderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-requested-with"),
            HeaderValue::from_static("JSONHttpRequest"),
        );

        let auth = match (self.mode, bearer) {
            (ProtocolMode::OmfCloud, Some(token)) => format!("Bearer {token}"),
            (ProtocolMode::OmfCloud, None) => {
                return Err(HeaderError::InvalidCredentials);
            }
            (_, _) => {
                let creds = self
                    .credentials
                    .as_deref()
                    .ok_or(HeaderError::InvalidCredentials)?;
                format!("Basic {creds}")
            }
        };
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|_| HeaderError::InvalidCredentials)?,
        );
        Ok(headers)
    }

    /// Base headers plus the OMF envelope headers for one message kind.
    pub fn omf(&self, kind: MessageKind, bearer: Option<&str>) -> Result<HeaderMap, HeaderError> {
        let mut headers = self.base(bearer)?;
        headers.insert(
            HeaderName::from_static("messageformat"),
            HeaderValue::from_static("json"),
        );
        headers.insert(
            HeaderName::from_static("omfversion"),
            HeaderValue::from_static("1.1"),
        );
        headers.insert(
            HeaderName::from_static("action"),
            HeaderValue::from_static("create"),
        );
        headers.insert(HeaderName::from_static("messagetype"), kind.header_value());
        Ok(headers)
    }

    /// Headers for a data transmission in the configured mode.
    pub fn data(&self, bearer: Option<&str>) -> Result<HeaderMap, HeaderError> {
        match self.mode {
            ProtocolMode::LegacyBatch => self.base(bearer),
            ProtocolMode::Omf | ProtocolMode::OmfCloud => self.omf(MessageKind::Data, bearer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_normalize_trailing_slashes() {
        let routes = ServerRoutes::new("https://pi.example.com///", None);
        assert_eq!(routes.batch_url(), "https://pi.example.com/piwebapi/batch/");
        assert_eq!(routes.omf_url(), "https://pi.example.com/piwebapi/omf");
    }

    #[test]
    fn cloud_omf_url_overrides_the_base() {
        let routes = ServerRoutes::new(
            "https://unused.example.com",
            Some("https://ingress.cloud.example.com/omf".into()),
        );
        assert_eq!(routes.omf_url(), "https://ingress.cloud.example.com/omf");
    }

    #[test]
    fn name_filter_is_url_encoded() {
        let routes = ServerRoutes::new("http://pi", None);
        let url = routes.points_query_url("ws-1", "Flow Rate#2");
        assert_eq!(
            url,
            "http://pi/piwebapi/dataservers/ws-1/points?nameFilter=Flow+Rate%232"
        );
    }

    #[test]
    fn basic_auth_headers_for_legacy() {
        let factory = HeaderFactory::new(ProtocolMode::LegacyBatch, Some("dXNlcjpwdw==".into()));
        let headers = factory.data(None).unwrap();
        assert_eq!(headers[AUTHORIZATION], "Basic dXNlcjpwdw==");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert!(!headers.contains_key("messagetype"));
    }

    #[test]
    fn omf_data_headers_carry_the_envelope() {
        let factory = HeaderFactory::new(ProtocolMode::Omf, Some("dXNlcjpwdw==".into()));
        let headers = factory.data(None).unwrap();
        assert_eq!(headers["messagetype"], "data");
        assert_eq!(headers["omfversion"], "1.1");
        assert_eq!(headers["action"], "create");
        assert_eq!(headers["messageformat"], "json");
    }

    #[test]
    fn cloud_mode_requires_a_token() {
        let factory = HeaderFactory::new(ProtocolMode::OmfCloud, None);
        assert!(factory.data(None).is_err());
        let headers = factory.data(Some("tok-123")).unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer tok-123");
    }
}
