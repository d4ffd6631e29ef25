// Auth server discovery from the API's /info endpoint

use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::{Method, Request, StatusCode};
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::endpoint;
use crate::error::{CliError, Result};
use crate::transport::Transport;

#[derive(Debug, Deserialize)]
struct ServerInfo {
    #[serde(rename = "auth-server")]
    auth_server: Option<AuthServerInfo>,
}

#[derive(Debug, Deserialize)]
struct AuthServerInfo {
    url: Option<String>,
}

/// Normalize a user-supplied API URL.
///
/// Transformations:
/// - example.com:8844 → https://example.com:8844 (scheme defaults to https)
/// - https://example.com/ → https://example.com (trailing slash dropped)
pub fn normalize_api_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    if with_scheme.starts_with("http://") {
        tracing::warn!(
            "Targeting {} over plain HTTP; credentials will be sent unencrypted",
            with_scheme
        );
    }
    with_scheme
}

/// Resolves the auth server paired with an API
pub struct AuthServerResolver {
    transport: Arc<dyn Transport>,
}

impl AuthServerResolver {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Fetch `GET {api_url}/info` and return the auth server's base URL
    pub async fn resolve(&self, api_url: &str) -> Result<String> {
        let url = endpoint(api_url, &["info"]).map_err(CliError::InvalidTarget)?;
        tracing::debug!(url = %url, "Fetching server info");

        let mut request = Request::new(Method::GET, url);
        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static("application/json"));

        let response = self.transport.send(request).await?;
        if response.status != StatusCode::OK {
            return Err(CliError::InvalidTarget(format!(
                "{} answered /info with {}",
                api_url, response.status
            )));
        }

        let info: ServerInfo = response.json().map_err(|e| {
            CliError::InvalidTarget(format!("{} returned unexpected server info: {}", api_url, e))
        })?;

        let auth_url = info
            .auth_server
            .and_then(|a| a.url)
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                CliError::InvalidTarget(format!(
                    "{} did not report an auth server URL",
                    api_url
                ))
            })?;

        let auth_url = auth_url.trim_end_matches('/').to_string();
        tracing::info!("Resolved auth server: {}", auth_url);
        Ok(auth_url)
    }
}
