// In-memory session store, primarily for testing

use std::sync::{Arc, Mutex};

use super::{ConfigStore, Session};
use crate::error::{CliError, Result};

#[derive(Default)]
struct Inner {
    session: Session,
    writes: usize,
    fail_writes: bool,
}

/// In-memory store; clones share the same state
#[derive(Clone, Default)]
pub struct MemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `session`
    pub fn with_session(session: Session) -> Self {
        let store = Self::new();
        store.lock().session = session;
        store
    }

    /// Current contents, bypassing the trait
    pub fn snapshot(&self) -> Session {
        self.lock().session.clone()
    }

    /// Number of successful writes so far
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConfigStore for MemoryConfigStore {
    fn read(&self) -> Result<Session> {
        Ok(self.lock().session.clone())
    }

    fn write(&self, session: &Session) -> Result<()> {
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(CliError::Config("store is read-only".to_string()));
        }
        inner.session = session.clone();
        inner.writes += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
