use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request never produced an HTTP status: DNS, connect, TLS or
    /// timeout failures.
    #[error("Network error: {0}")]
    Network(String),

    /// The server rejected the credentials.
    #[error("Authentication rejected (HTTP {status})")]
    Auth { status: StatusCode },

    /// The server answered with a non-success status other than an auth
    /// rejection.
    #[error("Endpoint error (HTTP {status}): {body}")]
    Endpoint { status: StatusCode, body: String },

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("Transport failure: {0}")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

/// Tracks whether the historian is currently reachable. Transitions are
/// logged exactly once per edge so a flapping link does not flood the log.
#[derive(Debug)]
pub struct LinkState {
    connected: AtomicBool,
    disconnects: AtomicU64,
    reconnects: AtomicU64,
}

impl Default for LinkState {
    fn default() -> Self {
        // Assume connected at startup so the first failure is reported as a
        // disconnect rather than silently setting the initial state.
        Self {
            connected: AtomicBool::new(true),
            disconnects: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }
}

impl LinkState {
    pub fn record_failure(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.disconnects.fetch_add(1, Ordering::Relaxed);
            warn!(%reason, "Connection to the historian lost");
        }
    }

    pub fn record_success(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
            info!("Connection to the historian restored");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> u64 {
        self.disconnects.load(Ordering::Relaxed)
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

/// Thin HTTP layer shared by provisioning and delivery. Owns the pooled
/// client and the link-state tracker; callers supply method, URL, headers
/// and body per request.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    link: Arc<LinkState>,
}

impl Transport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .gzip(true)
            .build()
            .map_err(|e| TransportError::Unknown(e.to_string()))?;
        Ok(Self {
            client,
            link: Arc::new(LinkState::default()),
        })
    }

    pub fn link(&self) -> Arc<LinkState> {
        Arc::clone(&self.link)
    }

    /// Issue one request and return the response body on HTTP success.
    /// Every outcome updates the link state.
    pub async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        headers: HeaderMap,
        body: Option<String>,
    ) -> Result<String, TransportError> {
        debug!(?method, %url, "Issuing request");
        let mut builder = match method {
            HttpMethod::Get => self.client.get(url),
            HttpMethod::Post => self.client.post(url),
            HttpMethod::Put => self.client.put(url),
        };
        builder = builder.headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("request timed out: {e}")
                } else if e.is_connect() {
                    format!("connect failed: {e}")
                } else if e.is_builder() || e.is_request() {
                    self.link.record_failure("invalid request");
                    return Err(TransportError::InvalidUrl(e.to_string()));
                } else {
                    e.to_string()
                };
                self.link.record_failure(&reason);
                return Err(TransportError::Network(reason));
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.link.record_failure("authentication rejected");
            return Err(TransportError::Auth { status });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            self.link.record_failure("endpoint error");
            return Err(TransportError::Endpoint { status, body });
        }

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        self.link.record_success();
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_state_logs_transitions_once() {
        let link = LinkState::default();
        assert!(link.is_connected());

        link.record_failure("down");
        link.record_failure("still down");
        link.record_failure("still down");
        assert!(!link.is_connected());
        assert_eq!(link.disconnect_count(), 1);

        link.record_success();
        link.record_success();
        assert!(link.is_connected());
        assert_eq!(link.reconnect_count(), 1);

        link.record_failure("down again");
        assert_eq!(link.disconnect_count(), 2);
    }

    #[tokio::test]
    async fn classifies_statuses() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/denied"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let transport = Transport::new(Duration::from_secs(5)).unwrap();

        let body = transport
            .request(
                HttpMethod::Get,
                &format!("{}/ok", server.uri()),
                HeaderMap::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(body, "fine");
        assert!(transport.link().is_connected());

        let err = transport
            .request(
                HttpMethod::Get,
                &format!("{}/denied", server.uri()),
                HeaderMap::new(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Auth { .. }));

        let err = transport
            .request(
                HttpMethod::Get,
                &format!("{}/broken", server.uri()),
                HeaderMap::new(),
                None,
            )
            .await
            .unwrap_err();
        match err {
            TransportError::Endpoint { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
