//! Cancellation ledger
//!
//! Every successful write of a request leaves a [`Rollback`] in the ledger. If a
//! later step of the same request fails, [`CancellationLedger::cancel`] executes
//! all of them.

use crate::error::StdError;
use crate::storage::{Rollback, Storage};

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

struct LedgerEntry {
    field: String,
    action: Rollback,
    storage: Arc<dyn Storage>,
}

/// Ordered rollback actions of one request
#[derive(Default)]
pub struct CancellationLedger {
    entries: Vec<LedgerEntry>,
}

impl fmt::Debug for CancellationLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (&e.field, &e.action)))
            .finish()
    }
}

/// One rollback action that failed
#[derive(Debug)]
pub struct RollbackFailure {
    pub field: String,
    pub action: Rollback,
    pub source: StdError,
}

/// Aggregated failures of [`CancellationLedger::cancel`]
#[derive(Debug, thiserror::Error)]
#[error("CancelError: {} of {total} rollback actions failed: {}", .failures.len(), summary(.failures))]
pub struct CancelError {
    pub total: usize,
    pub failures: Vec<RollbackFailure>,
}

fn summary(failures: &[RollbackFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({}): {}", f.action, f.field, f.source))
        .collect::<Vec<_>>()
        .join("; ")
}

impl CancellationLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the rollback of a successful write to `storage`.
    pub fn push(&mut self, field: impl Into<String>, action: Rollback, storage: Arc<dyn Storage>) {
        self.entries.push(LedgerEntry {
            field: field.into(),
            action,
            storage,
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recorded actions in write order
    pub fn actions(&self) -> impl Iterator<Item = &Rollback> {
        self.entries.iter().map(|e| &e.action)
    }

    /// Recorded `(field, action)` pairs in write order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Rollback)> {
        self.entries.iter().map(|e| (e.field.as_str(), &e.action))
    }

    /// Executes every recorded action, most recent first.
    ///
    /// A failing action does not stop the others. Entries are kept, so calling
    /// this again re-executes the (idempotent) actions.
    ///
    /// # Errors
    /// Returns every failure, if any.
    pub async fn cancel(&self) -> Result<(), CancelError> {
        let mut failures = Vec::new();
        for entry in self.entries.iter().rev() {
            match entry.storage.rollback(&entry.action).await {
                Ok(()) => debug!(field = %entry.field, action = %entry.action, "rolled back"),
                Err(source) => {
                    warn!(field = %entry.field, action = %entry.action, error = %source, "rollback failed");
                    failures.push(RollbackFailure {
                        field: entry.field.clone(),
                        action: entry.action.clone(),
                        source,
                    });
                }
            }
        }
        if failures.is_empty() {
            return Ok(());
        }
        Err(CancelError {
            total: self.entries.len(),
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::object::Object;
    use crate::storage::{MemoryStorage, ObjectBody, UploadContext, Written};

    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Storage for Flaky {
        async fn upload(&self, _: &UploadContext, _: &Object, _: ObjectBody<'_>) -> Result<Written, StdError> {
            Err("unused".into())
        }

        async fn rollback(&self, _: &Rollback) -> Result<(), StdError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err("disk on fire".into())
        }
    }

    fn handle(h: &str) -> Rollback {
        Rollback::DeleteHandle {
            backend: "memory".to_owned(),
            handle: h.to_owned(),
        }
    }

    #[tokio::test]
    async fn empty_is_noop() {
        let ledger = CancellationLedger::new();
        assert!(ledger.is_empty());
        ledger.cancel().await.unwrap();
    }

    #[tokio::test]
    async fn aggregates_failures() {
        let flaky = Arc::new(Flaky { calls: AtomicUsize::new(0) });
        let memory: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

        let mut ledger = CancellationLedger::new();
        ledger.push("a", handle("1"), flaky.clone());
        ledger.push("b", handle("2"), memory);
        ledger.push("c", handle("3"), flaky.clone());
        assert_eq!(ledger.len(), 3);

        let err = ledger.cancel().await.unwrap_err();
        assert_eq!(err.total, 3);
        assert_eq!(err.failures.len(), 2);
        // most recent first
        assert_eq!(err.failures[0].field, "c");
        assert_eq!(err.failures[1].field, "a");
        assert!(err.to_string().contains("disk on fire"));
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);

        // entries survive, so a retry runs them again
        assert!(ledger.cancel().await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
        assert_eq!(ledger.actions().count(), 3);
    }
}
