use super::SessionStore;

use crate::error::StdError;
use crate::utils::lock;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::debug;

#[derive(Default)]
struct Session {
    values: HashMap<String, Bytes>,
    expires_at: Option<Instant>,
}

impl Session {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

/// In-process [`SessionStore`]
///
/// Expiry follows the tokio clock, so paused-time tests can fast-forward it.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl std::fmt::Debug for MemorySessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySessionStore").field("sessions", &self.len()).finish()
    }
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        lock(&self.sessions).values().filter(|s| !s.is_expired(now)).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired sessions.
    pub fn purge(&self) {
        let now = Instant::now();
        let mut sessions = lock(&self.sessions);
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        debug!(purged = before - sessions.len(), "purged expired sessions");
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session: &str, key: &str) -> Result<Option<Bytes>, StdError> {
        let now = Instant::now();
        let mut sessions = lock(&self.sessions);
        let Some(s) = sessions.get(session) else { return Ok(None) };
        if s.is_expired(now) {
            sessions.remove(session);
            return Ok(None);
        }
        Ok(s.values.get(key).cloned())
    }

    async fn put(&self, session: &str, key: &str, value: Bytes) -> Result<(), StdError> {
        let now = Instant::now();
        let mut sessions = lock(&self.sessions);
        let s = sessions.entry(session.to_owned()).or_default();
        if s.is_expired(now) {
            *s = Session::default();
        }
        s.values.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, session: &str, key: &str) -> Result<(), StdError> {
        if let Some(s) = lock(&self.sessions).get_mut(session) {
            s.values.remove(key);
        }
        Ok(())
    }

    async fn set_expiry(&self, session: &str, max_age: Duration) -> Result<(), StdError> {
        let mut sessions = lock(&self.sessions);
        let Some(s) = sessions.get_mut(session) else {
            return Err(format!("session {session:?} does not exist").into());
        };
        s.expires_at = Some(Instant::now() + max_age);
        Ok(())
    }
}
