use super::{ObjectBody, Rollback, Storage, UploadContext, Written};

use crate::error::StdError;
use crate::object::Object;
use crate::utils::lock;

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tracing::debug;

const BACKEND: &str = "memory";

/// In-memory storage backend
///
/// Objects are keyed by their resolved path; a second upload to the same path
/// replaces the first. Useful for tests and local development.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, (Object, Bytes)>>,
    uploads: AtomicUsize,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Content stored under `path`
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Bytes> {
        lock(&self.objects).get(path).map(|(_, content)| content.clone())
    }

    /// Descriptor of the object stored under `path`
    #[must_use]
    pub fn object(&self, path: &str) -> Option<Object> {
        lock(&self.objects).get(path).map(|(object, _)| object.clone())
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.objects).is_empty()
    }

    /// Bytes currently held
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        lock(&self.objects).values().map(|(_, content)| content.len() as u64).sum()
    }

    /// Number of `upload` calls, failed ones included
    #[must_use]
    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn upload(&self, _: &UploadContext, object: &Object, mut body: ObjectBody<'_>) -> Result<Written, StdError> {
        self.uploads.fetch_add(1, Ordering::Relaxed);

        let mut content = BytesMut::new();
        while let Some(result) = body.next().await {
            content.extend_from_slice(&result?);
        }
        let content = content.freeze();
        let bytes = content.len() as u64;

        let key = object.path();
        debug!(%key, bytes, "stored object");

        let mut stored = object.clone();
        stored.size = bytes;
        lock(&self.objects).insert(key.clone(), (stored, content));

        Ok(Written {
            bytes,
            rollback: Rollback::DeleteHandle {
                backend: BACKEND.to_owned(),
                handle: key,
            },
        })
    }

    async fn rollback(&self, action: &Rollback) -> Result<(), StdError> {
        match action {
            Rollback::DeleteHandle { backend, handle } if backend == BACKEND => {
                let removed = lock(&self.objects).remove(handle);
                debug!(%handle, existed = removed.is_some(), "deleted object");
                Ok(())
            }
            _ => Err(format!("memory storage cannot execute rollback: {action}").into()),
        }
    }
}
