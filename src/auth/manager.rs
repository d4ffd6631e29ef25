use std::sync::Arc;

use super::grants::{self, Grant, GrantError};
use super::types::{token_preview, AuthSources, Identity, TokenResponse};
use crate::error::{CliError, Result};
use crate::session::{ConfigStore, GrantKind, Session};
use crate::transport::Transport;

/// Token manager
/// Produces a bearer token for the next request and replaces an invalid one.
///
/// Expiry is never tracked locally: a token is only known to be stale once the
/// API answers 401 `access_token_expired`. Every mutation writes the whole
/// session through the store before it becomes visible in memory, so a failed
/// login or refresh leaves the prior state untouched.
pub struct TokenManager {
    /// Session as of the last successful write
    session: Session,

    /// Durable home of `session`
    store: Box<dyn ConfigStore>,

    /// Sender for token endpoint and revocation calls
    transport: Arc<dyn Transport>,

    /// Environment identity and interactive prompt
    sources: AuthSources,
}

impl TokenManager {
    pub fn new(
        session: Session,
        store: Box<dyn ConfigStore>,
        transport: Arc<dyn Transport>,
        sources: AuthSources,
    ) -> Self {
        Self {
            session,
            store,
            transport,
            sources,
        }
    }

    /// Load the session from `store` and build a manager around it
    pub fn load(
        store: Box<dyn ConfigStore>,
        transport: Arc<dyn Transport>,
        sources: AuthSources,
    ) -> Result<Self> {
        let session = store.read()?;
        tracing::debug!(
            store = store.name(),
            authenticated = session.is_authenticated(),
            "Loaded session"
        );
        Ok(Self::new(session, store, transport, sources))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Whether a token can be obtained without an explicit login command
    pub fn has_strategy(&self) -> bool {
        self.session.refresh_token.is_some()
            || self.sources.client_identity.is_some()
            || self.sources.prompt.is_some()
    }

    /// Stored access token.
    ///
    /// `Ok(None)` means no token is stored but one can be obtained; never
    /// touches the network.
    pub fn current_token(&self) -> Result<Option<String>> {
        match &self.session.access_token {
            Some(token) => Ok(Some(token.clone())),
            None if self.has_strategy() => Ok(None),
            None => Err(CliError::Unauthenticated),
        }
    }

    /// Perform an initial login with the grant matching `identity`
    pub async fn establish_session(&mut self, identity: Identity) -> Result<()> {
        let auth_url = self.session.require_auth_url()?.to_string();
        let kind = identity.grant_kind();
        tracing::info!("Logging in via {:?} grant...", kind);

        let grant = match &identity {
            Identity::Password(creds) => Grant::Password(creds),
            Identity::ClientCredentials(client) => Grant::ClientCredentials(client),
        };

        let tokens = grants::request_token(self.transport.as_ref(), &auth_url, grant)
            .await
            .map_err(|e| CliError::AuthenticationFailed(e.to_string()))?;

        let mut next = self.session.clone();
        next.access_token = Some(tokens.access_token);
        next.refresh_token = match kind {
            GrantKind::Password => tokens.refresh_token,
            // Re-derived from the environment on every invocation
            GrantKind::ClientCredentials => None,
        };
        next.grant = Some(kind);
        self.commit(next)?;

        tracing::info!(
            "Login successful (token: {})",
            self.session
                .access_token
                .as_deref()
                .map(token_preview)
                .unwrap_or_default()
        );
        Ok(())
    }

    /// Re-derive a valid access token without prompting.
    ///
    /// An environment client identity takes precedence over a stored refresh
    /// token, which is then dropped.
    pub async fn refresh(&mut self) -> Result<()> {
        if let Some(client) = self.sources.client_identity.clone() {
            tracing::info!("Re-running client credentials grant...");
            return self.establish_session(Identity::ClientCredentials(client)).await;
        }

        if let Some(refresh_token) = self.session.refresh_token.clone() {
            let auth_url = self.session.require_auth_url()?.to_string();
            tracing::info!("Refreshing access token...");

            let tokens = grants::request_token(
                self.transport.as_ref(),
                &auth_url,
                Grant::RefreshToken(&refresh_token),
            )
            .await
            .map_err(|e| match e {
                GrantError::Network(err) => CliError::from(err),
                other => CliError::AuthenticationFailed(format!(
                    "refresh token was rejected ({}). Please log in again.",
                    other
                )),
            })?;

            return self.apply_refresh(tokens);
        }

        Err(CliError::Unauthenticated)
    }

    fn apply_refresh(&mut self, tokens: TokenResponse) -> Result<()> {
        let mut next = self.session.clone();
        next.access_token = Some(tokens.access_token);
        // Keep the existing refresh token unless the server rotated it
        if let Some(rotated) = tokens.refresh_token {
            next.refresh_token = Some(rotated);
        }
        self.commit(next)?;

        tracing::info!(
            "Token refreshed (token: {})",
            self.session
                .access_token
                .as_deref()
                .map(token_preview)
                .unwrap_or_default()
        );
        Ok(())
    }

    /// Obtain a first token for a session that has none.
    ///
    /// Environment client identity wins over a stored refresh token, which
    /// wins over prompting.
    pub async fn ensure_session(&mut self) -> Result<String> {
        if let Some(client) = self.sources.client_identity.clone() {
            self.establish_session(Identity::ClientCredentials(client))
                .await?;
        } else if self.session.refresh_token.is_some() {
            self.refresh().await?;
        } else if let Some(prompt) = &self.sources.prompt {
            let creds = prompt
                .password_login()
                .map_err(|e| CliError::AuthenticationFailed(format!("{:#}", e)))?;
            self.establish_session(Identity::Password(creds)).await?;
        } else {
            return Err(CliError::Unauthenticated);
        }

        self.session
            .access_token
            .clone()
            .ok_or(CliError::Unauthenticated)
    }

    /// Revoke the refresh token (best effort) and delete all token fields
    pub async fn clear_session(&mut self) -> Result<()> {
        if let (Some(refresh_token), Some(auth_url)) =
            (&self.session.refresh_token, &self.session.auth_url)
        {
            if let Err(e) = grants::revoke(
                self.transport.as_ref(),
                auth_url,
                refresh_token,
                self.session.access_token.as_deref(),
            )
            .await
            {
                tracing::warn!("Token revocation failed, clearing local session anyway: {}", e);
            }
        }

        let mut next = self.session.clone();
        next.clear_tokens();
        // Local state is cleared even if the write below fails
        self.session = next.clone();
        self.store.write(&next)?;

        tracing::info!("Session cleared");
        Ok(())
    }

    /// Persist `next`, then make it current
    fn commit(&mut self, next: Session) -> Result<()> {
        self.store.write(&next)?;
        self.session = next;
        Ok(())
    }
}
