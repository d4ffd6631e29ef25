// Session state module
// Persisted target and token state, plus the stores that hold it

mod memory;
mod sqlite;

use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

pub use memory::MemoryConfigStore;
pub use sqlite::SqliteConfigStore;

/// How the stored tokens were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    Password,
    ClientCredentials,
}

/// Durable session record shared across process invocations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Session {
    pub api_url: Option<String>,
    pub auth_url: Option<String>,
    pub access_token: Option<String>,
    /// Only ever set for password-grant sessions
    pub refresh_token: Option<String>,
    pub grant: Option<GrantKind>,
    /// PEM-encoded trust anchors
    pub ca_certificates: Vec<String>,
    pub skip_tls_validation: bool,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// API URL, or a configuration error when no target is set
    pub fn require_api_url(&self) -> Result<&str> {
        self.api_url.as_deref().ok_or_else(|| {
            CliError::Config(
                "An API target is not set. Please target the location of your server with `credhub api` to continue."
                    .to_string(),
            )
        })
    }

    /// Auth server URL, or a configuration error when no target is set
    pub fn require_auth_url(&self) -> Result<&str> {
        self.auth_url.as_deref().ok_or_else(|| {
            CliError::Config(
                "The auth server URL is not set. Please target your server with `credhub api` to continue."
                    .to_string(),
            )
        })
    }

    /// Drop every token field, keeping the target
    pub fn clear_tokens(&mut self) {
        self.access_token = None;
        self.refresh_token = None;
        self.grant = None;
    }
}

/// Durable key-value record of the session
pub trait ConfigStore: Send + Sync {
    /// Read the stored session.
    ///
    /// A missing or empty store yields `Session::default()`.
    fn read(&self) -> Result<Session>;

    /// Replace the stored session.
    ///
    /// Either the whole session lands or the previous one is kept.
    fn write(&self, session: &Session) -> Result<()>;

    /// Name of this store backend
    fn name(&self) -> &str {
        "unknown"
    }
}

impl<T: ConfigStore + ?Sized> ConfigStore for Box<T> {
    fn read(&self) -> Result<Session> {
        (**self).read()
    }
    fn write(&self, session: &Session) -> Result<()> {
        (**self).write(session)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}
