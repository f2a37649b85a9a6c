//! Identity and session store interfaces
//!
//! Authentication happens outside this crate. Callers hand the coordinator the
//! [`Identity`] they resolved, and a [`SessionStore`] that keeps small records
//! under `(session id, key)` with an expiry.

mod memory;
pub use self::memory::MemorySessionStore;

use crate::error::StdError;

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

/// An authenticated principal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    id: String,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Session store
///
/// Values live under `(session, key)`. An expired session behaves as if it
/// never existed.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Loads a value; `None` if the session or key is absent or expired.
    async fn get(&self, session: &str, key: &str) -> Result<Option<Bytes>, StdError>;

    /// Stores a value, creating the session if needed.
    async fn put(&self, session: &str, key: &str, value: Bytes) -> Result<(), StdError>;

    async fn delete(&self, session: &str, key: &str) -> Result<(), StdError>;

    /// Expires the whole session `max_age` from now.
    async fn set_expiry(&self, session: &str, max_age: Duration) -> Result<(), StdError>;
}
