// Authentication types

use serde::Deserialize;
use std::fmt;

use crate::session::GrantKind;

/// OAuth client the password and refresh grants are issued to
pub const CLI_CLIENT_ID: &str = "credhub_cli";

/// Non-interactive identity for the client-credentials grant
#[derive(Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientIdentity {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Username and password for the password grant
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordCredentials {
    pub username: String,
    pub password: String,
}

impl PasswordCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for PasswordCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Identity material for an initial login; the variant picks the grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Resource-owner password grant, yields a refresh token
    Password(PasswordCredentials),

    /// Client-credentials grant, stateless
    ClientCredentials(ClientIdentity),
}

impl Identity {
    pub fn grant_kind(&self) -> GrantKind {
        match self {
            Identity::Password(_) => GrantKind::Password,
            Identity::ClientCredentials(_) => GrantKind::ClientCredentials,
        }
    }
}

/// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    /// Informational only; expiry is detected from 401 responses
    pub expires_in: Option<u64>,
}

/// Source of interactive username/password input
pub trait LoginPrompt: Send + Sync {
    fn password_login(&self) -> anyhow::Result<PasswordCredentials>;
}

/// Ways the token manager may obtain a session without explicit user action
#[derive(Default)]
pub struct AuthSources {
    /// Client identity supplied by the environment
    pub client_identity: Option<ClientIdentity>,

    /// Interactive prompt, when stdin is a terminal
    pub prompt: Option<Box<dyn LoginPrompt>>,
}

impl AuthSources {
    pub fn with_client_identity(identity: ClientIdentity) -> Self {
        Self {
            client_identity: Some(identity),
            prompt: None,
        }
    }
}

/// Short, loggable prefix of a token
pub fn token_preview(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}...", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let identity = ClientIdentity::new("test_client", "test_secret");
        let rendered = format!("{:?}", identity);
        assert!(rendered.contains("test_client"));
        assert!(!rendered.contains("test_secret"));

        let creds = PasswordCredentials::new("admin", "hunter2");
        let rendered = format!("{:?}", Identity::Password(creds));
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_grant_kind() {
        let identity = Identity::ClientCredentials(ClientIdentity::new("a", "b"));
        assert_eq!(identity.grant_kind(), GrantKind::ClientCredentials);
        let identity = Identity::Password(PasswordCredentials::new("a", "b"));
        assert_eq!(identity.grant_kind(), GrantKind::Password);
    }

    #[test]
    fn test_token_response_optional_fields() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"3YotnFZFEjr1zCsicMWpAA","token_type":"bearer"}"#,
        )
        .unwrap();
        assert_eq!(response.access_token, "3YotnFZFEjr1zCsicMWpAA");
        assert!(response.refresh_token.is_none());
        assert!(response.expires_in.is_none());
    }

    #[test]
    fn test_token_preview() {
        assert_eq!(token_preview("2YotnFZFEjr1zCsicMWpAA"), "2YotnFZF...");
        assert_eq!(token_preview("abc"), "abc...");
    }
}
