// HTTP transport
// The single seam every outbound request goes through

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Request, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;

use crate::error::CliError;

/// Transport-level failure (no HTTP response was received)
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct TransportError {
    /// Coarse category: timeout, connection_failed, request_error, body_error, unknown
    pub kind: &'static str,
    pub message: String,
}

impl From<TransportError> for CliError {
    fn from(err: TransportError) -> Self {
        CliError::Network(err.to_string())
    }
}

/// Fully buffered HTTP response
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Body as (lossy) UTF-8 text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// Pluggable HTTP sender
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request and buffer the response.
    ///
    /// Never retries; a timeout is reported as a `TransportError`.
    async fn send(&self, request: Request) -> std::result::Result<TransportResponse, TransportError>;
}

/// TLS and timeout settings for the reqwest-backed transport
#[derive(Debug, Clone, Default)]
pub struct TransportSettings {
    /// Connect timeout in seconds
    pub connect_timeout: u64,
    /// Whole-request timeout in seconds
    pub request_timeout: u64,
    /// PEM-encoded trust anchors for both the API and the auth server
    pub ca_certificates: Vec<String>,
    pub skip_tls_validation: bool,
}

/// Production transport backed by a pooled `reqwest::Client`
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(settings: &TransportSettings) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(settings.connect_timeout))
            .timeout(Duration::from_secs(settings.request_timeout))
            .danger_accept_invalid_certs(settings.skip_tls_validation);

        for pem in &settings.ca_certificates {
            let certs = reqwest::Certificate::from_pem_bundle(pem.as_bytes())
                .context("Failed to parse CA certificate")?;
            if certs.is_empty() {
                anyhow::bail!("CA certificate does not contain any PEM certificates");
            }
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder.build().context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: Request) -> std::result::Result<TransportResponse, TransportError> {
        let method = request.method().clone();
        let url = request.url().clone();
        tracing::debug!(method = %method, url = %url, "Sending HTTP request");

        let response = self.client.execute(request).await.map_err(|e| {
            let err = categorize(&e);
            tracing::debug!(error_kind = err.kind, error = %e, url = %url, "HTTP request error");
            err
        })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| categorize(&e))?;
        tracing::debug!(status = %status, "Received HTTP response");

        Ok(TransportResponse { status, body })
    }
}

fn categorize(e: &reqwest::Error) -> TransportError {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() || e.is_decode() {
        "body_error"
    } else {
        "unknown"
    };
    TransportError {
        kind,
        message: e.to_string(),
    }
}

/// Scripted in-process transport for tests
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// What the scripted transport saw
    #[derive(Debug, Clone)]
    pub struct RecordedRequest {
        pub method: reqwest::Method,
        pub url: reqwest::Url,
        pub authorization: Option<String>,
        pub body: Option<String>,
    }

    impl RecordedRequest {
        pub fn path(&self) -> &str {
            self.url.path()
        }

        /// Decoded form field from the request body
        pub fn form_value(&self, key: &str) -> Option<String> {
            let body = self.body.as_deref()?;
            url::form_urlencoded::parse(body.as_bytes())
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.into_owned())
        }
    }

    type Handler = dyn Fn(&RecordedRequest) -> std::result::Result<TransportResponse, TransportError>
        + Send
        + Sync;

    /// Transport answering from a closure and recording every request
    #[derive(Clone)]
    pub struct ScriptedTransport {
        handler: Arc<Handler>,
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
    }

    impl ScriptedTransport {
        pub fn new<F>(handler: F) -> Self
        where
            F: Fn(&RecordedRequest) -> std::result::Result<TransportResponse, TransportError>
                + Send
                + Sync
                + 'static,
        {
            Self {
                handler: Arc::new(handler),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn requests(&self) -> Vec<RecordedRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            request: Request,
        ) -> std::result::Result<TransportResponse, TransportError> {
            let recorded = RecordedRequest {
                method: request.method().clone(),
                url: request.url().clone(),
                authorization: request
                    .headers()
                    .get(reqwest::header::AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string),
                body: request
                    .body()
                    .and_then(|b| b.as_bytes())
                    .map(|b| String::from_utf8_lossy(b).into_owned()),
            };
            self.requests.lock().unwrap().push(recorded.clone());
            (self.handler)(&recorded)
        }
    }

    /// Shorthand for a JSON response
    pub fn respond(status: u16, body: &str) -> std::result::Result<TransportResponse, TransportError> {
        Ok(TransportResponse::new(
            StatusCode::from_u16(status).unwrap(),
            body.to_string(),
        ))
    }

    /// Shorthand for a connection failure
    pub fn connection_refused() -> std::result::Result<TransportResponse, TransportError> {
        Err(TransportError {
            kind: "connection_failed",
            message: "connection refused".to_string(),
        })
    }
}
