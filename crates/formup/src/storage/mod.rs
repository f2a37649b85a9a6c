//! Storage backends
//!
//! A file field streams each accepted file to a [`Storage`]. The backend writes
//! the bytes, reports how many it wrote and returns a [`Rollback`] descriptor
//! that deletes them again. The parser records the descriptor in the request's
//! [`CancellationLedger`](crate::CancellationLedger) so a later failure can undo
//! the write.

mod memory;
pub use self::memory::MemoryStorage;

use crate::error::StdError;
use crate::object::{ChunkInfo, Object};

use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// File content handed to a backend
///
/// Yields at most the field's remaining byte budget. Errors from the request
/// body end the stream.
pub type ObjectBody<'a> = Pin<Box<dyn Stream<Item = Result<Bytes, StdError>> + Send + 'a>>;

/// Undo action for one successful write
///
/// Backends must execute these idempotently: a second execution of the same
/// descriptor succeeds without effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rollback {
    /// Remove a file from a local directory
    DeletePath { path: PathBuf },
    /// Remove an object identified by a backend-specific handle
    DeleteHandle { backend: String, handle: String },
}

impl fmt::Display for Rollback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeletePath { path } => write!(f, "delete path {}", path.display()),
            Self::DeleteHandle { backend, handle } => write!(f, "delete {backend}:{handle}"),
        }
    }
}

/// Result of a successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    /// Exact number of bytes written
    pub bytes: u64,
    pub rollback: Rollback,
}

/// Execution scope of one request
#[derive(Debug, Clone, Default)]
pub struct UploadContext {
    cancel: CancellationToken,
    uploader: Option<String>,
    chunk: Option<ChunkInfo>,
}

impl UploadContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parsing stops and fails with `Cancelled` once this token is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = Some(uploader.into());
        self
    }

    /// Marks the request as one chunk of a chunked upload.
    #[must_use]
    pub fn with_chunk(mut self, chunk: ChunkInfo) -> Self {
        self.chunk = Some(chunk);
        self
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn uploader(&self) -> Option<&str> {
        self.uploader.as_deref()
    }

    #[must_use]
    pub fn chunk(&self) -> Option<&ChunkInfo> {
        self.chunk.as_ref()
    }
}

/// Storage backend
///
/// Implementations are shared by concurrent requests.
#[async_trait::async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Streams `body` to its final location.
    ///
    /// Must consume `body` to its end unless failing, and report the exact number
    /// of bytes written.
    ///
    /// # Errors
    /// Any error is surfaced to the client as a storage failure.
    async fn upload(&self, cx: &UploadContext, object: &Object, body: ObjectBody<'_>) -> Result<Written, StdError>;

    /// Executes a rollback descriptor returned by [`upload`](Self::upload).
    ///
    /// # Errors
    /// Returns an error if the written bytes could not be removed.
    async fn rollback(&self, action: &Rollback) -> Result<(), StdError>;
}
