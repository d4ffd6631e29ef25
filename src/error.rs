// Error handling module
// Defines the client error taxonomy and process exit codes

use thiserror::Error;

/// Errors surfaced by the authenticated request pipeline and the commands built on it
#[derive(Error, Debug)]
pub enum CliError {
    /// No usable credential and no strategy to obtain one
    #[error("You are not currently authenticated. Please log in to continue.")]
    Unauthenticated,

    /// A login or refresh attempt was rejected by the auth server
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Transport-level failure reaching the API or the auth server
    #[error("Network error: {0}")]
    Network(String),

    /// API endpoint unreachable or discovery returned an unexpected shape
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The resource API rejected the request
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Missing target or unusable local state
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Unauthenticated | CliError::AuthenticationFailed(_) => 2,
            CliError::Network(_) => 3,
            CliError::InvalidTarget(_) => 4,
            CliError::Api { .. } => 5,
            CliError::Config(_) => 6,
            CliError::Internal(_) => 1,
        }
    }
}

/// Pull a human-readable message out of an error body.
///
/// Servers answer with `{"error": ..}` or `{"error_description": ..}`; anything
/// else is returned as raw text.
pub fn server_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["error_description", "error"] {
            if let Some(msg) = json.get(key).and_then(|v| v.as_str()) {
                return msg.to_string();
            }
        }
    }
    body.trim().to_string()
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, CliError>;
