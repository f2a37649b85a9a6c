use crate::error::*;
use crate::utils::write_body;

use formup::Object;
use formup::StdError;
use formup::storage::{ObjectBody, Rollback, Storage, UploadContext, Written};

use std::env;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use path_absolutize::Absolutize;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
pub struct FileSystem {
    root: PathBuf,
}

impl FileSystem {
    /// # Errors
    /// Returns an error if `root` does not exist or cannot be resolved.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = env::current_dir()?.join(root).canonicalize()?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves an object path below the root.
    ///
    /// # Errors
    /// Returns an error if the path is empty, absolute, or escapes the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative);
        if relative.is_empty() || path.is_absolute() {
            return Err(Error::from_string(format!("invalid object path: {relative:?}")));
        }
        let resolved = self.root.join(path).absolutize()?.into_owned();
        if resolved == self.root || !resolved.starts_with(&self.root) {
            return Err(Error::from_string(format!("object path escapes the root: {relative:?}")));
        }
        Ok(resolved)
    }

    fn check_owned(&self, path: &Path) -> Result<PathBuf> {
        let resolved = path.absolutize()?.into_owned();
        if !resolved.starts_with(&self.root) {
            return Err(Error::from_string(format!("rollback outside the root: {}", path.display())));
        }
        Ok(resolved)
    }

    async fn write(&self, object: &Object, body: ObjectBody<'_>) -> Result<Written> {
        let path = self.resolve(&object.path())?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        let tmp = {
            let mut name = path.clone().into_os_string();
            name.push(format!(".{}.part", Uuid::new_v4().simple()));
            PathBuf::from(name)
        };

        let result = async {
            let mut file = fs::File::create(&tmp).await?;
            let bytes = write_body(body, &mut file).await?;
            drop(file);
            fs::rename(&tmp, &path).await?;
            Ok::<_, Error>(bytes)
        }
        .await;

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(rm) = fs::remove_file(&tmp).await
                    && rm.kind() != ErrorKind::NotFound
                {
                    debug!(path = %tmp.display(), error = %rm, "failed to remove partial file");
                }
                return Err(e);
            }
        };

        debug!(path = %path.display(), bytes, field = %object.field, "wrote file");
        Ok(Written {
            bytes,
            rollback: Rollback::DeletePath { path },
        })
    }

    async fn delete(&self, path: &Path) -> Result {
        let path = self.check_owned(path)?;
        match fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "deleted file"),
            Err(e) if e.kind() == ErrorKind::NotFound => debug!(path = %path.display(), "file already gone"),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Storage for FileSystem {
    async fn upload(&self, _: &UploadContext, object: &Object, body: ObjectBody<'_>) -> Result<Written, StdError> {
        Ok(self.write(object, body).await?)
    }

    async fn rollback(&self, action: &Rollback) -> Result<(), StdError> {
        match action {
            Rollback::DeletePath { path } => Ok(self.delete(path).await?),
            Rollback::DeleteHandle { .. } => Err(Error::from_string(format!("file system cannot execute rollback: {action}")).into()),
        }
    }
}
