// Session persistence in a SQLite key-value table

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use super::{ConfigStore, Session};
use crate::error::{CliError, Result};

const SESSION_KEY: &str = "credhub:session";
const DB_FILE: &str = "config.sqlite3";

/// Session store backed by `config.sqlite3` in the config directory
pub struct SqliteConfigStore {
    path: PathBuf,
}

impl SqliteConfigStore {
    /// Store living in `dir/config.sqlite3`
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(DB_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> anyhow::Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("Failed to open SQLite database: {}", self.path.display()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create session table")?;
        Ok(conn)
    }

    fn load(&self) -> anyhow::Result<Session> {
        if !self.path.exists() {
            return Ok(Session::default());
        }

        let conn = self.open()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM session_kv WHERE key = ?",
                [SESSION_KEY],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load session from SQLite")?;

        match value {
            Some(json) if !json.trim().is_empty() => {
                serde_json::from_str(&json).context("Failed to parse session from SQLite")
            }
            _ => Ok(Session::default()),
        }
    }

    fn save(&self, session: &Session) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let json = serde_json::to_string(session).context("Failed to serialize session")?;
        // Owner-only before any token row is written
        create_private(&self.path)?;
        let mut conn = self.open()?;
        let tx = conn.transaction().context("Failed to start transaction")?;
        tx.execute(
            "INSERT INTO session_kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [SESSION_KEY, json.as_str()],
        )
        .context("Failed to write session to SQLite")?;
        tx.commit().context("Failed to commit session")?;
        Ok(())
    }
}

impl ConfigStore for SqliteConfigStore {
    fn read(&self) -> Result<Session> {
        self.load().map_err(|e| CliError::Config(format!("{:#}", e)))
    }

    fn write(&self, session: &Session) -> Result<()> {
        self.save(session)
            .map_err(|e| CliError::Config(format!("{:#}", e)))
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

/// Create `path` with mode 0600, tightening an existing file
#[cfg(unix)]
fn create_private(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> anyhow::Result<()> {
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(())
}
