use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Request, StatusCode, Url};
use std::sync::Arc;

use crate::auth::TokenManager;
use crate::error::{server_message, CliError, Result};
use crate::transport::{Transport, TransportResponse};

/// 401 error code signalling an expired access token
pub const TOKEN_EXPIRED_ERROR: &str = "access_token_expired";

/// How a resource API response is handled
#[derive(Debug)]
pub enum Outcome {
    Success,
    /// 401 with the token-expiry code: refresh and retry once
    TokenExpired,
    /// Terminal failure, never retried
    Failed(CliError),
}

/// Classify a resource API response
pub fn classify(response: &TransportResponse) -> Outcome {
    if response.is_success() {
        return Outcome::Success;
    }

    let body = response.text();
    if response.status == StatusCode::UNAUTHORIZED && is_token_expired(&body) {
        return Outcome::TokenExpired;
    }

    Outcome::Failed(CliError::Api {
        status: response.status.as_u16(),
        message: server_message(&body),
    })
}

fn is_token_expired(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json.get("error").and_then(|v| v.as_str()).map(str::to_string))
        .is_some_and(|code| code == TOKEN_EXPIRED_ERROR)
}

/// Authenticated request pipeline
/// Executes one logical API call with at most one re-authentication retry:
/// - no stored token: log in before the first request
/// - 401 `access_token_expired`: refresh, resend the identical request once
/// - anything else non-2xx: surfaced immediately as `CliError::Api`
/// - transport failure: surfaced as `CliError::Network`, no retry
pub struct RequestPipeline {
    /// Token state and grant strategies
    tokens: TokenManager,

    /// Sender for resource API calls
    transport: Arc<dyn Transport>,
}

impl RequestPipeline {
    pub fn new(tokens: TokenManager, transport: Arc<dyn Transport>) -> Self {
        Self { tokens, transport }
    }

    /// Execute one API call
    pub async fn execute(
        &mut self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<TransportResponse> {
        let request = self.build_request(method, path, query, body)?;

        let token = match self.tokens.current_token()? {
            Some(token) => token,
            None => {
                tracing::info!("No access token stored, authenticating before first request");
                self.tokens.ensure_session().await?
            }
        };

        let response = self.send_with_token(&request, &token).await?;
        match classify(&response) {
            Outcome::Success => return Ok(response),
            Outcome::Failed(err) => return Err(self.log_failure(&request, err)),
            Outcome::TokenExpired => {}
        }

        tracing::warn!("Access token expired, refreshing and retrying once...");
        if let Err(e) = self.tokens.refresh().await {
            tracing::error!("Token refresh failed: {}", e);
            return Err(match e {
                CliError::AuthenticationFailed(msg) => CliError::AuthenticationFailed(msg),
                other => CliError::AuthenticationFailed(format!("Token refresh failed: {}", other)),
            });
        }

        let token = self
            .tokens
            .current_token()?
            .ok_or(CliError::Unauthenticated)?;

        // Single retry; a second expiry is returned as a failure
        let response = self.send_with_token(&request, &token).await?;
        match classify(&response) {
            Outcome::Success => Ok(response),
            Outcome::Failed(err) => Err(self.log_failure(&request, err)),
            Outcome::TokenExpired => Err(self.log_failure(
                &request,
                CliError::Api {
                    status: StatusCode::UNAUTHORIZED.as_u16(),
                    message: TOKEN_EXPIRED_ERROR.to_string(),
                },
            )),
        }
    }

    fn build_request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&serde_json::Value>,
    ) -> Result<Request> {
        let api_url = self.tokens.session().require_api_url()?;
        let raw = format!("{}{}", api_url.trim_end_matches('/'), path);
        let mut url = Url::parse(&raw)
            .map_err(|e| CliError::Config(format!("Invalid API URL {}: {}", raw, e)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        let mut request = Request::new(method, url);
        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(body) = body {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| CliError::Internal(anyhow::anyhow!("Failed to encode body: {}", e)))?;
            request
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            *request.body_mut() = Some(bytes.into());
        }

        Ok(request)
    }

    async fn send_with_token(&self, request: &Request, token: &str) -> Result<TransportResponse> {
        let mut attempt = request.try_clone().ok_or_else(|| {
            CliError::Internal(anyhow::anyhow!("Request body is not cloneable"))
        })?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            CliError::AuthenticationFailed("stored access token is not a valid header value".to_string())
        })?;
        attempt.headers_mut().insert(AUTHORIZATION, bearer);

        let response = self.transport.send(attempt).await.map_err(|e| {
            tracing::error!(
                error_kind = e.kind,
                url = %request.url(),
                "HTTP request failed"
            );
            CliError::from(e)
        })?;

        tracing::debug!(status = %response.status, url = %request.url(), "Received API response");
        Ok(response)
    }

    fn log_failure(&self, request: &Request, err: CliError) -> CliError {
        tracing::error!(
            method = %request.method(),
            url = %request.url(),
            error = %err,
            "API request failed"
        );
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthSources, ClientIdentity};
    use crate::session::{GrantKind, MemoryConfigStore, Session};
    use crate::transport::testing::{connection_refused, respond, RecordedRequest, ScriptedTransport};
    use proptest::prelude::*;

    const EXPIRED: &str = "2YotnFZFEjr1zCsicMWpAA";
    const FRESH: &str = "3YotnFZFEjr1zCsicMWpAA";
    const PATHS_JSON: &str = r#"{"paths":[{"path":"consul/"}]}"#;

    fn targeted() -> Session {
        Session {
            api_url: Some("https://credhub.example.com:8844".to_string()),
            auth_url: Some("https://uaa.example.com:8443".to_string()),
            ..Default::default()
        }
    }

    fn password_session(token: &str) -> Session {
        Session {
            access_token: Some(token.to_string()),
            refresh_token: Some("erousflkajqwer".to_string()),
            grant: Some(GrantKind::Password),
            ..targeted()
        }
    }

    fn pipeline(
        session: Session,
        transport: &ScriptedTransport,
        sources: AuthSources,
    ) -> (RequestPipeline, MemoryConfigStore) {
        let store = MemoryConfigStore::with_session(session.clone());
        let transport: Arc<dyn Transport> = Arc::new(transport.clone());
        let tokens = TokenManager::new(session, Box::new(store.clone()), transport.clone(), sources);
        (RequestPipeline::new(tokens, transport), store)
    }

    fn bearer(request: &RecordedRequest) -> &str {
        request.authorization.as_deref().unwrap_or_default()
    }

    /// API accepting only FRESH; token endpoint issuing FRESH
    fn expiring_server(request: &RecordedRequest) -> std::result::Result<TransportResponse, crate::transport::TransportError> {
        if request.path() == "/oauth/token" {
            return respond(200, &format!(r#"{{"access_token":"{}","token_type":"bearer"}}"#, FRESH));
        }
        if bearer(request).ends_with(FRESH) {
            respond(200, PATHS_JSON)
        } else {
            respond(401, r#"{"error":"access_token_expired","error_description":"Access token expired"}"#)
        }
    }

    #[tokio::test]
    async fn test_valid_token_single_request() {
        let transport = ScriptedTransport::new(|_| respond(200, PATHS_JSON));
        let (mut pipeline, store) = pipeline(password_session(FRESH), &transport, AuthSources::default());

        let response = pipeline
            .execute(Method::GET, "/api/v1/data", &[("paths", "true")], None)
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url.as_str(), "https://credhub.example.com:8844/api/v1/data?paths=true");
        assert_eq!(bearer(&requests[0]), format!("Bearer {}", FRESH));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_expired_token_refreshes_and_retries_once() {
        let transport = ScriptedTransport::new(expiring_server);
        let (mut pipeline, store) = pipeline(password_session(EXPIRED), &transport, AuthSources::default());

        let response = pipeline
            .execute(Method::GET, "/api/v1/data", &[("paths", "true")], None)
            .await
            .unwrap();
        assert_eq!(response.text(), PATHS_JSON);

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(bearer(&requests[0]), format!("Bearer {}", EXPIRED));
        assert_eq!(requests[1].path(), "/oauth/token");
        assert_eq!(requests[1].form_value("refresh_token").as_deref(), Some("erousflkajqwer"));
        assert_eq!(bearer(&requests[2]), format!("Bearer {}", FRESH));
        assert_eq!(requests[2].url, requests[0].url);

        let api_requests = requests.iter().filter(|r| r.path() == "/api/v1/data").count();
        assert_eq!(api_requests, 2);
        assert_eq!(store.snapshot().access_token.as_deref(), Some(FRESH));
    }

    #[tokio::test]
    async fn test_expired_password_session_with_env_client_uses_client_credentials() {
        let transport = ScriptedTransport::new(expiring_server);
        let sources = AuthSources::with_client_identity(ClientIdentity::new("test_client", "test_secret"));
        let (mut pipeline, store) = pipeline(password_session(EXPIRED), &transport, sources);

        pipeline
            .execute(Method::GET, "/api/v1/data", &[("paths", "true")], None)
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].path(), "/oauth/token");
        assert_eq!(
            requests[1].body.as_deref(),
            Some("client_id=test_client&client_secret=test_secret&grant_type=client_credentials&response_type=token")
        );
        assert_eq!(bearer(&requests[2]), format!("Bearer {}", FRESH));

        let stored = store.snapshot();
        assert_eq!(stored.access_token.as_deref(), Some(FRESH));
        assert!(stored.refresh_token.is_none());
        assert_eq!(stored.grant, Some(GrantKind::ClientCredentials));
    }

    #[tokio::test]
    async fn test_retry_resends_identical_body() {
        let transport = ScriptedTransport::new(expiring_server);
        let (mut pipeline, _) = pipeline(password_session(EXPIRED), &transport, AuthSources::default());
        let body = serde_json::json!({"name": "/example", "type": "password", "value": "s3cret"});

        pipeline
            .execute(Method::PUT, "/api/v1/data", &[], Some(&body))
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].method, Method::PUT);
        assert_eq!(requests[2].method, Method::PUT);
        assert_eq!(requests[0].body, requests[2].body);
        let sent: serde_json::Value = serde_json::from_str(requests[2].body.as_deref().unwrap()).unwrap();
        assert_eq!(sent, body);
    }

    #[tokio::test]
    async fn test_second_expiry_is_not_retried() {
        let transport = ScriptedTransport::new(|request| {
            if request.path() == "/oauth/token" {
                respond(200, r#"{"access_token":"also-expired"}"#)
            } else {
                respond(401, r#"{"error":"access_token_expired"}"#)
            }
        });
        let (mut pipeline, _) = pipeline(password_session(EXPIRED), &transport, AuthSources::default());

        let err = pipeline
            .execute(Method::GET, "/api/v1/data", &[], None)
            .await
            .unwrap_err();

        assert!(matches!(err, CliError::Api { status: 401, .. }));
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_rejected_refresh_does_not_resend() {
        let transport = ScriptedTransport::new(|request| {
            if request.path() == "/oauth/token" {
                respond(400, r#"{"error":"invalid_grant","error_description":"Invalid refresh token"}"#)
            } else {
                respond(401, r#"{"error":"access_token_expired"}"#)
            }
        });
        let (mut pipeline, store) = pipeline(password_session(EXPIRED), &transport, AuthSources::default());

        let err = pipeline
            .execute(Method::GET, "/api/v1/data", &[], None)
            .await
            .unwrap_err();

        assert!(matches!(err, CliError::AuthenticationFailed(_)));
        assert_eq!(transport.request_count(), 2);
        assert_eq!(store.snapshot().access_token.as_deref(), Some(EXPIRED));
    }

    #[tokio::test]
    async fn test_expiry_without_strategy_is_auth_failure() {
        let transport = ScriptedTransport::new(|_| respond(401, r#"{"error":"access_token_expired"}"#));
        let session = Session {
            access_token: Some(EXPIRED.to_string()),
            ..targeted()
        };
        let (mut pipeline, _) = pipeline(session, &transport, AuthSources::default());

        let err = pipeline
            .execute(Method::GET, "/api/v1/data", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::AuthenticationFailed(_)));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_other_401_is_terminal() {
        let transport = ScriptedTransport::new(|_| {
            respond(401, r#"{"error":"invalid_token","error_description":"Invalid access token"}"#)
        });
        let (mut pipeline, _) = pipeline(password_session(EXPIRED), &transport, AuthSources::default());

        let err = pipeline
            .execute(Method::GET, "/api/v1/data", &[], None)
            .await
            .unwrap_err();
        match err {
            CliError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid access token");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_api_errors_surface_immediately() {
        for status in [400u16, 403, 404, 500, 503] {
            let transport = ScriptedTransport::new(move |_| {
                respond(status, r#"{"error":"The request could not be completed"}"#)
            });
            let (mut pipeline, _) = pipeline(password_session(FRESH), &transport, AuthSources::default());

            let err = pipeline
                .execute(Method::GET, "/api/v1/data", &[("name", "/x")], None)
                .await
                .unwrap_err();
            assert!(
                matches!(err, CliError::Api { status: s, ref message } if s == status && message == "The request could not be completed"),
                "status {status}: {err:?}"
            );
            assert_eq!(transport.request_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_network_error_not_retried() {
        let transport = ScriptedTransport::new(|_| connection_refused());
        let (mut pipeline, _) = pipeline(password_session(FRESH), &transport, AuthSources::default());

        let err = pipeline
            .execute(Method::GET, "/api/v1/data", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Network(_)));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_first_use_client_credentials_login() {
        let transport = ScriptedTransport::new(|request| {
            if request.path() == "/oauth/token" {
                respond(
                    200,
                    r#"{"access_token":"2YotnFZFEjr1zCsicMWpAA","refresh_token":"erousflkajqwer","token_type":"bearer","expires_in":3600}"#,
                )
            } else {
                respond(200, PATHS_JSON)
            }
        });
        let sources = AuthSources::with_client_identity(ClientIdentity::new("test_client", "test_secret"));
        let (mut pipeline, store) = pipeline(targeted(), &transport, sources);

        let response = pipeline
            .execute(Method::GET, "/api/v1/data", &[("paths", "true")], None)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].path(), "/oauth/token");
        assert_eq!(requests[0].form_value("grant_type").as_deref(), Some("client_credentials"));
        assert_eq!(bearer(&requests[1]), "Bearer 2YotnFZFEjr1zCsicMWpAA");

        let stored = store.snapshot();
        assert_eq!(stored.access_token.as_deref(), Some("2YotnFZFEjr1zCsicMWpAA"));
        assert!(stored.refresh_token.is_none());
    }

    #[tokio::test]
    async fn test_unauthenticated_before_any_request() {
        let transport = ScriptedTransport::new(|_| panic!("no request expected"));
        let (mut pipeline, _) = pipeline(targeted(), &transport, AuthSources::default());

        let err = pipeline
            .execute(Method::GET, "/api/v1/data", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Unauthenticated));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_target_is_config_error() {
        let transport = ScriptedTransport::new(|_| panic!("no request expected"));
        let session = Session {
            access_token: Some(FRESH.to_string()),
            ..Default::default()
        };
        let (mut pipeline, _) = pipeline(session, &transport, AuthSources::default());

        let err = pipeline
            .execute(Method::GET, "/api/v1/data", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_classify() {
        let ok = TransportResponse::new(StatusCode::OK, "{}");
        assert!(matches!(classify(&ok), Outcome::Success));

        let expired = TransportResponse::new(StatusCode::UNAUTHORIZED, r#"{"error":"access_token_expired"}"#);
        assert!(matches!(classify(&expired), Outcome::TokenExpired));

        // The expiry code only counts on a 401
        let forbidden = TransportResponse::new(StatusCode::FORBIDDEN, r#"{"error":"access_token_expired"}"#);
        assert!(matches!(classify(&forbidden), Outcome::Failed(CliError::Api { status: 403, .. })));

        let plain = TransportResponse::new(StatusCode::UNAUTHORIZED, "access_token_expired");
        assert!(matches!(classify(&plain), Outcome::Failed(_)));
    }

    proptest! {
        #[test]
        fn prop_only_expiry_code_is_retryable(code in prop_oneof![Just(TOKEN_EXPIRED_ERROR.to_string()), "[a-z_]{1,24}"], status in 400u16..600) {
            let body = serde_json::json!({ "error": code }).to_string();
            let response = TransportResponse::new(StatusCode::from_u16(status).unwrap(), body);
            let retryable = matches!(classify(&response), Outcome::TokenExpired);
            prop_assert_eq!(retryable, status == 401 && code == TOKEN_EXPIRED_ERROR);
        }
    }
}
