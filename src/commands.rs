// Command handlers behind the CLI subcommands

use serde::Serialize;
use std::sync::Arc;

use crate::auth::{AuthSources, ClientIdentity, Identity, LoginPrompt, PasswordCredentials, TokenManager};
use crate::config::{parse_credential_value, read_ca_cert, Command, Config, DialoguerPrompt};
use crate::credhub::CredHub;
use crate::error::{CliError, Result};
use crate::pipeline::RequestPipeline;
use crate::resolver::{normalize_api_url, AuthServerResolver};
use crate::session::{ConfigStore, Session, SqliteConfigStore};
use crate::transport::{ReqwestTransport, Transport, TransportSettings};

/// What a command prints on success
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Message(String),
    Json(serde_json::Value),
}

impl Output {
    fn json<T: Serialize>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value).map_err(anyhow::Error::from)?;
        Ok(Output::Json(value))
    }

    /// Text written to stdout
    pub fn render(&self) -> String {
        match self {
            Output::Message(message) => message.clone(),
            Output::Json(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}

/// Run one subcommand against the session stored in `config.config_dir`
pub async fn execute(config: &Config, command: Command) -> Result<Output> {
    let store = SqliteConfigStore::in_dir(&config.config_dir);
    tracing::debug!(store = %store.path().display(), "Using session store");

    match command {
        Command::Api { server: None, .. } => show_target(&store),

        Command::Api {
            server: Some(server),
            ca_cert,
            skip_tls_validation,
        } => {
            let session = target(config, &store, &server, &ca_cert, skip_tls_validation).await?;
            Ok(Output::Message(format!(
                "Setting the target url: {}",
                session.api_url.unwrap_or_default()
            )))
        }

        Command::Login {
            username,
            password,
            client_name,
            client_secret,
            server,
            ca_cert,
            skip_tls_validation,
        } => {
            match server {
                Some(server) => {
                    target(config, &store, &server, &ca_cert, skip_tls_validation).await?;
                }
                None => auto_target(config, &store).await?,
            }

            let identity = login_identity(config, username, password, client_name, client_secret)?;
            let mut tokens = token_manager(config, store)?.0;
            tokens.establish_session(identity).await?;
            Ok(Output::Message("Login Successful".to_string()))
        }

        Command::Logout => {
            let mut tokens = token_manager(config, store)?.0;
            tokens.clear_session().await?;
            Ok(Output::Message("Logout Successful".to_string()))
        }

        other => {
            auto_target(config, &store).await?;
            let (tokens, transport) = token_manager(config, store)?;
            let mut credhub = CredHub::new(RequestPipeline::new(tokens, transport));
            credential_command(&mut credhub, other).await
        }
    }
}

async fn credential_command(credhub: &mut CredHub, command: Command) -> Result<Output> {
    match command {
        Command::Get {
            id: Some(id), ..
        } => Output::json(&credhub.get_by_id(&id).await?),

        Command::Get {
            name: Some(name),
            all: true,
            ..
        } => {
            let versions = credhub.get_all_versions(&name).await?;
            Output::json(&serde_json::json!({ "versions": versions }))
        }

        Command::Get {
            name: Some(name),
            versions: Some(n),
            ..
        } => {
            let versions = credhub.get_n_versions(&name, n).await?;
            Output::json(&serde_json::json!({ "versions": versions }))
        }

        Command::Get {
            name: Some(name), ..
        } => Output::json(&credhub.get_latest_version(&name).await?),

        Command::Get { .. } => Err(CliError::Config(
            "A credential name or ID is required".to_string(),
        )),

        Command::Set {
            name,
            credential_type,
            value,
        } => {
            let value = parse_credential_value(&credential_type, &value)
                .map_err(|e| CliError::Config(format!("{:#}", e)))?;
            Output::json(&credhub.set(&name, &credential_type, &value).await?)
        }

        Command::Delete { name } => {
            credhub.delete(&name).await?;
            Ok(Output::Message("Credential successfully deleted".to_string()))
        }

        Command::Find {
            all_paths: true, ..
        } => Output::json(&credhub.find_all_paths().await?),

        Command::Find {
            name_like: Some(name_like),
            ..
        } => Output::json(&credhub.find_by_name(&name_like).await?),

        Command::Find {
            path: Some(path), ..
        } => Output::json(&credhub.find_by_path(&path).await?),

        Command::Find { .. } => Err(CliError::Config(
            "One of --name-like, --path or --all-paths is required".to_string(),
        )),

        Command::Api { .. } | Command::Login { .. } | Command::Logout => Err(CliError::Internal(
            anyhow::anyhow!("not a credential command"),
        )),
    }
}

fn show_target(store: &SqliteConfigStore) -> Result<Output> {
    let session = store.read()?;
    Ok(Output::Message(match session.api_url {
        Some(api_url) => api_url,
        None => "An API target is not set. Use `credhub api <server>` to target a CredHub server."
            .to_string(),
    }))
}

/// Point the session at `server`, discovering its auth server.
///
/// Tokens are dropped when the target changes.
async fn target(
    config: &Config,
    store: &SqliteConfigStore,
    server: &str,
    ca_cert: &[String],
    skip_tls_validation: bool,
) -> Result<Session> {
    let api_url = normalize_api_url(server);
    let ca_certificates = ca_cert
        .iter()
        .map(|entry| read_ca_cert(entry))
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(|e| CliError::Config(format!("{:#}", e)))?;

    if skip_tls_validation {
        tracing::warn!("TLS validation is disabled for {}", api_url);
    }

    let transport = build_transport(config, &ca_certificates, skip_tls_validation)?;
    let auth_url = AuthServerResolver::new(transport).resolve(&api_url).await?;

    let previous = store.read()?;
    let mut next = previous.clone();
    if previous.api_url.as_deref() != Some(api_url.as_str())
        || previous.auth_url.as_deref() != Some(auth_url.as_str())
    {
        next.clear_tokens();
    }
    next.api_url = Some(api_url);
    next.auth_url = Some(auth_url);
    next.ca_certificates = ca_certificates;
    next.skip_tls_validation = skip_tls_validation;
    store.write(&next)?;

    tracing::info!(
        api_url = next.api_url.as_deref().unwrap_or_default(),
        auth_url = next.auth_url.as_deref().unwrap_or_default(),
        "Target set"
    );
    Ok(next)
}

/// Target CREDHUB_SERVER when nothing is targeted yet
async fn auto_target(config: &Config, store: &SqliteConfigStore) -> Result<()> {
    if store.read()?.api_url.is_some() {
        return Ok(());
    }
    if let Some(server) = &config.server {
        tracing::info!("No target stored, using CREDHUB_SERVER ({})", server);
        target(config, store, server, &[], false).await?;
    }
    Ok(())
}

fn login_identity(
    config: &Config,
    username: Option<String>,
    password: Option<String>,
    client_name: Option<String>,
    client_secret: Option<String>,
) -> Result<Identity> {
    match (username, password, client_name, client_secret) {
        (Some(_), _, Some(_), _) | (Some(_), _, _, Some(_)) => Err(CliError::Config(
            "Client credentials may not be combined with a username and password".to_string(),
        )),

        (Some(username), Some(password), None, None) => Ok(Identity::Password(
            PasswordCredentials::new(username, password),
        )),

        (Some(username), None, None, None) if config.interactive => {
            let password = DialoguerPrompt.password_for(&username)?;
            Ok(Identity::Password(PasswordCredentials::new(username, password)))
        }

        (Some(_), None, None, None) => Err(CliError::Config(
            "A password is required when logging in with a username".to_string(),
        )),

        (None, Some(_), _, _) => Err(CliError::Config(
            "A username is required when logging in with a password".to_string(),
        )),

        (None, None, Some(client_id), Some(client_secret)) => Ok(Identity::ClientCredentials(
            ClientIdentity::new(client_id, client_secret),
        )),

        (None, None, Some(_), None) | (None, None, None, Some(_)) => Err(CliError::Config(
            "Both --client-name and --client-secret are required".to_string(),
        )),

        (None, None, None, None) => {
            if let Some(client) = &config.client_identity {
                return Ok(Identity::ClientCredentials(client.clone()));
            }
            if config.interactive {
                let creds = DialoguerPrompt
                    .password_login()
                    .map_err(|e| CliError::AuthenticationFailed(format!("{:#}", e)))?;
                return Ok(Identity::Password(creds));
            }
            Err(CliError::Config(
                "Username and password or client credentials are required to log in".to_string(),
            ))
        }
    }
}

fn token_manager(
    config: &Config,
    store: SqliteConfigStore,
) -> Result<(TokenManager, Arc<dyn Transport>)> {
    let session = store.read()?;
    let transport = build_transport(config, &session.ca_certificates, session.skip_tls_validation)?;

    let sources = AuthSources {
        client_identity: config.client_identity.clone(),
        prompt: config
            .interactive
            .then(|| Box::new(DialoguerPrompt) as Box<dyn LoginPrompt>),
    };

    let tokens = TokenManager::new(session, Box::new(store), transport.clone(), sources);
    Ok((tokens, transport))
}

/// Transport trusting the session's CAs plus any from CREDHUB_CA_CERT
fn build_transport(
    config: &Config,
    ca_certificates: &[String],
    skip_tls_validation: bool,
) -> Result<Arc<dyn Transport>> {
    let mut trusted = ca_certificates.to_vec();
    for pem in &config.ca_certificates {
        if !trusted.contains(pem) {
            trusted.push(pem.clone());
        }
    }

    let settings = TransportSettings {
        connect_timeout: config.http_connect_timeout,
        request_timeout: config.http_request_timeout,
        ca_certificates: trusted,
        skip_tls_validation,
    };
    let transport =
        ReqwestTransport::new(&settings).map_err(|e| CliError::Config(format!("{:#}", e)))?;
    Ok(Arc::new(transport))
}
