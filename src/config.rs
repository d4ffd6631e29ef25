use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::{Input, Password};
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::auth::{ClientIdentity, LoginPrompt, PasswordCredentials};

/// CredHub CLI - manage credentials stored in a CredHub server
#[derive(Parser, Debug)]
#[command(name = "credhub", author, version, about, long_about = None)]
pub struct CliArgs {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    /// Directory holding the session store
    #[arg(long, env = "CREDHUB_CONFIG_DIR", global = true)]
    pub config_dir: Option<String>,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "30", global = true)]
    pub connect_timeout: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "60", global = true)]
    pub request_timeout: u64,

    /// Never prompt for credentials
    #[arg(long, global = true)]
    pub no_interactive: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Get or set the CredHub API target
    Api {
        /// URL of the CredHub API
        server: Option<String>,

        /// Trusted CA for the API and auth server (PEM text or file path)
        #[arg(long = "ca-cert")]
        ca_cert: Vec<String>,

        /// Disable TLS certificate validation (not recommended)
        #[arg(long)]
        skip_tls_validation: bool,
    },

    /// Authenticate against the auth server
    Login {
        #[arg(short = 'u', long)]
        username: Option<String>,

        #[arg(short = 'p', long)]
        password: Option<String>,

        /// Client name for the client credentials grant
        #[arg(long)]
        client_name: Option<String>,

        /// Client secret for the client credentials grant
        #[arg(long)]
        client_secret: Option<String>,

        /// Target this API before logging in
        #[arg(short = 's', long)]
        server: Option<String>,

        #[arg(long = "ca-cert")]
        ca_cert: Vec<String>,

        #[arg(long)]
        skip_tls_validation: bool,
    },

    /// Revoke and discard the stored tokens
    Logout,

    /// Fetch a credential
    Get {
        /// Credential name
        #[arg(short = 'n', long, required_unless_present = "id")]
        name: Option<String>,

        /// Credential version ID
        #[arg(long, conflicts_with = "name")]
        id: Option<String>,

        /// Number of versions to fetch
        #[arg(long, requires = "name")]
        versions: Option<u32>,

        /// Fetch every version
        #[arg(long, requires = "name", conflicts_with = "versions")]
        all: bool,
    },

    /// Write a credential value
    Set {
        #[arg(short = 'n', long)]
        name: String,

        /// Credential type (value, json, password, ...)
        #[arg(short = 't', long = "type", default_value = "value")]
        credential_type: String,

        /// Credential value; parsed as JSON unless the type is value or password
        #[arg(short = 'v', long)]
        value: String,
    },

    /// Delete a credential
    Delete {
        #[arg(short = 'n', long)]
        name: String,
    },

    /// Find credentials by name or path
    Find {
        /// Substring of the credential name
        #[arg(short = 'n', long = "name-like")]
        name_like: Option<String>,

        /// Credential path prefix
        #[arg(short = 'p', long)]
        path: Option<String>,

        /// List every credential path
        #[arg(short = 'a', long = "all-paths")]
        all_paths: bool,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // Storage
    pub config_dir: PathBuf,

    // Environment-supplied target and identity
    pub server: Option<String>,
    pub client_identity: Option<ClientIdentity>,
    pub ca_certificates: Vec<String>,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Behaviour
    pub interactive: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let interactive = !args.no_interactive && std::io::stdin().is_terminal();
        let config = Self::from_args(&args, interactive, |key| std::env::var(key).ok())?;

        Ok((config, args.command))
    }

    /// Build configuration from parsed arguments and an environment lookup
    pub fn from_args(
        args: &CliArgs,
        interactive: bool,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let config_dir = args
            .config_dir
            .as_deref()
            .map(expand_tilde)
            .or_else(|| dirs::home_dir().map(|home| home.join(".credhub")))
            .context("Could not determine config directory (set CREDHUB_CONFIG_DIR)")?;

        let client_identity = match (
            env("CREDHUB_CLIENT").filter(|s| !s.is_empty()),
            env("CREDHUB_SECRET"),
        ) {
            (Some(client_id), Some(client_secret)) => {
                Some(ClientIdentity::new(client_id, client_secret))
            }
            (Some(_), None) => anyhow::bail!("CREDHUB_SECRET is required when CREDHUB_CLIENT is set"),
            _ => None,
        };

        let ca_certificates = match env("CREDHUB_CA_CERT").filter(|s| !s.trim().is_empty()) {
            // Inline PEM is a single bundle, otherwise a comma-separated list of files
            Some(pem) if pem.contains("-----BEGIN") => vec![pem],
            Some(paths) => paths
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(read_ca_cert)
                .collect::<Result<Vec<_>>>()?,
            None => vec![],
        };

        Ok(Config {
            config_dir,
            server: env("CREDHUB_SERVER").filter(|s| !s.trim().is_empty()),
            client_identity,
            ca_certificates,
            http_connect_timeout: args.connect_timeout,
            http_request_timeout: args.request_timeout,
            interactive,
            log_level: args.log_level.clone(),
        })
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// PEM text is taken as-is, anything else is read as a file path
pub fn read_ca_cert(entry: &str) -> Result<String> {
    if entry.contains("-----BEGIN") {
        return Ok(entry.to_string());
    }
    let path = expand_tilde(entry.trim());
    std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read CA certificate: {}", path.display()))
}

/// Parse a credential value given on the command line
pub fn parse_credential_value(credential_type: &str, raw: &str) -> Result<serde_json::Value> {
    match credential_type.to_lowercase().as_str() {
        "value" | "password" => Ok(serde_json::Value::String(raw.to_string())),
        other => serde_json::from_str(raw)
            .with_context(|| format!("Value for a {} credential must be valid JSON", other)),
    }
}

// === Interactive Prompts ===

/// Terminal prompt for username and password
pub struct DialoguerPrompt;

impl DialoguerPrompt {
    pub fn password_for(&self, username: &str) -> Result<String> {
        Password::new()
            .with_prompt(format!("password for {}", username))
            .interact()
            .context("Failed to read password")
    }
}

impl LoginPrompt for DialoguerPrompt {
    fn password_login(&self) -> Result<PasswordCredentials> {
        let username: String = Input::new()
            .with_prompt("username")
            .interact_text()
            .context("Failed to read username")?;

        if username.trim().is_empty() {
            anyhow::bail!("username cannot be empty");
        }

        let password = self.password_for(&username)?;
        Ok(PasswordCredentials::new(username, password))
    }
}
