// Token endpoint calls: password, refresh and client-credentials grants, revocation

use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Request, Url};
use thiserror::Error;

use super::types::{ClientIdentity, PasswordCredentials, TokenResponse, CLI_CLIENT_ID};
use crate::error::{server_message, CliError};
use crate::transport::{Transport, TransportError};

/// One grant against `POST /oauth/token`
#[derive(Debug, Clone, Copy)]
pub(super) enum Grant<'a> {
    Password(&'a PasswordCredentials),
    RefreshToken(&'a str),
    ClientCredentials(&'a ClientIdentity),
}

impl Grant<'_> {
    pub(super) fn name(&self) -> &'static str {
        match self {
            Grant::Password(_) => "password",
            Grant::RefreshToken(_) => "refresh_token",
            Grant::ClientCredentials(_) => "client_credentials",
        }
    }

    /// Form fields, in key order
    fn form(&self) -> Vec<(&str, &str)> {
        match self {
            Grant::Password(creds) => vec![
                ("client_id", CLI_CLIENT_ID),
                ("client_secret", ""),
                ("grant_type", "password"),
                ("password", creds.password.as_str()),
                ("response_type", "token"),
                ("username", creds.username.as_str()),
            ],
            Grant::RefreshToken(token) => vec![
                ("client_id", CLI_CLIENT_ID),
                ("client_secret", ""),
                ("grant_type", "refresh_token"),
                ("refresh_token", token),
                ("response_type", "token"),
            ],
            Grant::ClientCredentials(identity) => vec![
                ("client_id", identity.client_id.as_str()),
                ("client_secret", identity.client_secret.as_str()),
                ("grant_type", "client_credentials"),
                ("response_type", "token"),
            ],
        }
    }
}

/// Why a grant did not yield a token
#[derive(Error, Debug)]
pub(super) enum GrantError {
    /// The auth server answered with a non-2xx status
    #[error("{status} - {message}")]
    Rejected { status: u16, message: String },

    /// No response from the auth server
    #[error(transparent)]
    Network(TransportError),

    /// 2xx with a body that is not a usable token response
    #[error("unexpected token response: {0}")]
    Malformed(String),

    /// The auth URL could not be turned into a request
    #[error("invalid auth server URL: {0}")]
    BadUrl(String),
}

/// Join path segments onto a base URL, escaping each segment
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<Url, String> {
    let mut url = Url::parse(base).map_err(|e| format!("{}: {}", base, e))?;
    url.path_segments_mut()
        .map_err(|_| format!("{}: cannot be a base URL", base))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn token_request(auth_url: &str, grant: &Grant<'_>) -> Result<Request, GrantError> {
    let url = endpoint(auth_url, &["oauth", "token"]).map_err(GrantError::BadUrl)?;

    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(grant.form())
        .finish();

    let mut request = Request::new(Method::POST, url);
    let headers = request.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    *request.body_mut() = Some(body.into());
    Ok(request)
}

/// Run one grant against the auth server
pub(super) async fn request_token(
    transport: &dyn Transport,
    auth_url: &str,
    grant: Grant<'_>,
) -> Result<TokenResponse, GrantError> {
    tracing::debug!(grant_type = grant.name(), auth_url, "Requesting token");

    let request = token_request(auth_url, &grant)?;
    let response = transport
        .send(request)
        .await
        .map_err(GrantError::Network)?;

    if !response.is_success() {
        let message = server_message(&response.text());
        tracing::error!(
            grant_type = grant.name(),
            status = response.status.as_u16(),
            message = %message,
            "Token request rejected"
        );
        return Err(GrantError::Rejected {
            status: response.status.as_u16(),
            message,
        });
    }

    let data: TokenResponse = response
        .json()
        .map_err(|e| GrantError::Malformed(e.to_string()))?;

    if data.access_token.is_empty() {
        return Err(GrantError::Malformed(
            "response does not contain access_token".to_string(),
        ));
    }

    tracing::debug!(
        grant_type = grant.name(),
        token_type = data.token_type.as_deref().unwrap_or("unknown"),
        expires_in = data.expires_in,
        "Token issued"
    );
    Ok(data)
}

/// `DELETE /oauth/token/revoke/{refresh_token}`
pub(super) async fn revoke(
    transport: &dyn Transport,
    auth_url: &str,
    refresh_token: &str,
    access_token: Option<&str>,
) -> Result<(), CliError> {
    let url = endpoint(auth_url, &["oauth", "token", "revoke", refresh_token])
        .map_err(CliError::Config)?;

    let mut request = Request::new(Method::DELETE, url);
    if let Some(token) = access_token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| CliError::Internal(anyhow::anyhow!("Invalid access token: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let response = transport.send(request).await?;
    if !response.is_success() {
        return Err(CliError::AuthenticationFailed(format!(
            "revocation failed: {} - {}",
            response.status.as_u16(),
            server_message(&response.text())
        )));
    }
    Ok(())
}
