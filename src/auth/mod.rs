// Authentication module
// Manages token lifecycle: login grants, refresh, revocation

mod grants;
mod manager;
mod types;

pub use manager::TokenManager;
pub use types::{
    token_preview, AuthSources, ClientIdentity, Identity, LoginPrompt, PasswordCredentials,
    TokenResponse, CLI_CLIENT_ID,
};

pub(crate) use grants::endpoint;
