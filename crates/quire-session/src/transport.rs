//! Transport seam between the request pipeline and the network.
//!
//! # Design
//! - [`Transport`] is the only place the pipeline touches the network, so
//!   tests substitute scripted transports.
//! - Non-success statuses are responses, not errors; only failures to get a
//!   response at all become [`TransportError`].
//! - Every request carries an `x-request-id` header for correlation.

use std::fmt::{self, Formatter};
use std::time::Duration;

use async_trait::async_trait;
use quire_config::ClientConfig;
use quire_telemetry::{redact_credential, redact_text};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::error::{SessionError, SessionResult};

/// Header carrying the per-request correlation id.
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// One call handed to a [`Transport`].
#[derive(Clone)]
pub struct OutboundRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the API base URL.
    pub path: String,
    /// JSON body, if any.
    pub body: Option<Value>,
    /// Bearer credential to attach, if any.
    pub bearer: Option<String>,
    /// Correlation id sent as `x-request-id`.
    pub request_id: Uuid,
}

impl OutboundRequest {
    /// Build an unauthenticated request with a fresh correlation id.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            path: path.into(),
            body,
            bearer: None,
            request_id: Uuid::new_v4(),
        }
    }

    /// Attach a bearer credential. Empty credentials are not attached.
    #[must_use]
    pub fn with_bearer(mut self, credential: &str) -> Self {
        self.bearer = (!credential.is_empty()).then(|| credential.to_string());
        self
    }
}

impl fmt::Debug for OutboundRequest {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("OutboundRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("has_body", &self.body.is_some())
            .field(
                "bearer",
                &self.bearer.as_deref().map(redact_credential),
            )
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// A response as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// Response status.
    pub status: StatusCode,
    /// Parsed `Retry-After` delay, when present in seconds form.
    pub retry_after: Option<Duration>,
    /// Raw response body.
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Build a response with the given status and JSON body.
    #[must_use]
    pub fn json(status: StatusCode, body: &Value) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.to_string().into_bytes(),
        }
    }

    /// Build a response with an empty body.
    #[must_use]
    pub const fn empty(status: StatusCode) -> Self {
        Self {
            status,
            retry_after: None,
            body: Vec::new(),
        }
    }
}

/// Failure to obtain any response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request did not complete within the transport timeout.
    #[error("request timed out")]
    Timeout,
    /// The connection could not be established.
    #[error("connection failed")]
    Connect {
        /// Redacted failure detail.
        detail: String,
    },
    /// The request URL could not be formed.
    #[error("invalid request url")]
    InvalidUrl {
        /// Offending URL.
        url: String,
    },
    /// Any other transport failure.
    #[error("request failed")]
    Other {
        /// Redacted failure detail.
        detail: String,
    },
}

impl TransportError {
    /// Whether retrying the same request could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connect { .. })
    }
}

/// Issues calls on behalf of the pipeline.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and return whatever the server answered.
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    /// Build a transport for the configured API base URL.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportBuild`] when the HTTP client cannot
    /// be constructed.
    pub fn new(config: &ClientConfig) -> SessionResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| SessionError::TransportBuild { source })?;
        Ok(Self::with_client(client, config.api_url.clone()))
    }

    /// Wrap an existing client.
    #[must_use]
    pub const fn with_client(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|_| TransportError::InvalidUrl { url: joined })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        let url = self.url_for(&request.path)?;
        debug!(
            method = %request.method,
            path = %request.path,
            request_id = %request.request_id,
            credential = %request.bearer.as_deref().map_or_else(|| "none".to_string(), redact_credential),
            "dispatching request"
        );
        let mut builder = self
            .client
            .request(request.method, url)
            .header(HEADER_REQUEST_ID, request.request_id.to_string());
        if let Some(bearer) = request.bearer.as_deref() {
            builder = builder.bearer_auth(bearer);
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let retry_after = retry_after(response.headers());
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();
        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    let detail = redact_text(&error.to_string()).into_owned();
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connect { detail }
    } else {
        TransportError::Other { detail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn transport_for(base: &str) -> anyhow::Result<HttpTransport> {
        let config = ClientConfig::new(Url::parse(base)?);
        Ok(HttpTransport::new(&config)?)
    }

    #[tokio::test]
    async fn attaches_bearer_body_and_request_id() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/posts")
                .header("authorization", "Bearer T1")
                .header_exists(HEADER_REQUEST_ID)
                .json_body(json!({"title": "hello"}));
            then.status(201).json_body(json!({"id": 7}));
        });

        let transport = transport_for(&server.base_url())?;
        let request = OutboundRequest::new(
            Method::POST,
            "/api/posts",
            Some(json!({"title": "hello"})),
        )
        .with_bearer("T1");
        let response = transport.send(request).await?;

        mock.assert();
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(serde_json::from_slice::<Value>(&response.body)?, json!({"id": 7}));
        Ok(())
    }

    #[tokio::test]
    async fn unauthenticated_request_has_no_authorization() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/public").header_missing("authorization");
            then.status(429).header("Retry-After", "7");
        });

        let transport = transport_for(&format!("{}/", server.base_url()))?;
        let response = transport
            .send(OutboundRequest::new(Method::GET, "api/public", None).with_bearer(""))
            .await?;

        mock.assert();
        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.retry_after, Some(Duration::from_secs(7)));
        Ok(())
    }

    #[tokio::test]
    async fn refused_connection_is_transient() -> anyhow::Result<()> {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
            listener.local_addr()?.port()
        };
        let transport = transport_for(&format!("http://127.0.0.1:{port}"))?;
        let error = transport
            .send(OutboundRequest::new(Method::GET, "/api/ping", None))
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected connection failure"))?;
        assert!(matches!(error, TransportError::Connect { .. }));
        assert!(error.is_transient());
        Ok(())
    }

    #[test]
    fn debug_hides_bearer() {
        let request = OutboundRequest::new(Method::GET, "/", None).with_bearer("secret-token");
        assert!(!format!("{request:?}").contains("secret-token"));
    }
}
