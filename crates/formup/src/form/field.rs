use super::FieldValue;
use super::validation::Validator;

use crate::error::*;
use crate::http::content_type::is_allowed;
use crate::object::{DEFAULT_CHUNK_PATH_TEMPLATE, DEFAULT_PATH_TEMPLATE};
use crate::storage::Storage;

use std::fmt;
use std::sync::Arc;

use mime::Mime;

/// How a field's parts are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    /// A value buffered in memory
    Scalar,
    /// One file streamed to storage
    File,
    /// A `multipart/mixed` set of files streamed to storage
    Files,
}

impl FieldMode {
    #[must_use]
    pub fn is_file(self) -> bool {
        matches!(self, Self::File | Self::Files)
    }
}

/// One expected form field
///
/// ```
/// use std::sync::Arc;
/// use formup::form::{Field, validation::NotEmpty};
/// use formup::storage::MemoryStorage;
///
/// let storage = Arc::new(MemoryStorage::new());
/// let avatar = Field::file("avatar", 1024, storage)
///     .required()
///     .allow("image/png")
///     .path_template("avatars/{uploaderid}/{fileuuid}");
/// let caption = Field::scalar("caption", 280).validator(NotEmpty);
/// assert!(avatar.is_required());
/// assert!(!caption.is_required());
/// ```
#[derive(Clone)]
pub struct Field {
    name: String,
    mode: FieldMode,
    limit: u64,
    required: bool,
    allowed: Vec<String>,
    validators: Vec<Arc<dyn Validator>>,
    storage: Option<Arc<dyn Storage>>,
    path_template: Option<String>,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("limit", &self.limit)
            .field("required", &self.required)
            .field("allowed", &self.allowed)
            .field("validators", &self.validators.len())
            .field("storage", &self.storage.is_some())
            .field("path_template", &self.path_template)
            .finish()
    }
}

impl Field {
    /// An optional field without storage, allow-list or validators.
    pub fn new(name: impl Into<String>, mode: FieldMode, limit: u64) -> Self {
        Self {
            name: name.into(),
            mode,
            limit,
            required: false,
            allowed: Vec::new(),
            validators: Vec::new(),
            storage: None,
            path_template: None,
        }
    }

    /// A value of at most `limit` bytes.
    pub fn scalar(name: impl Into<String>, limit: u64) -> Self {
        Self::new(name, FieldMode::Scalar, limit)
    }

    /// One file of at most `limit` bytes.
    pub fn file(name: impl Into<String>, limit: u64, storage: Arc<dyn Storage>) -> Self {
        Self::new(name, FieldMode::File, limit).storage(storage)
    }

    /// A set of files totalling at most `limit` bytes.
    pub fn files(name: impl Into<String>, limit: u64, storage: Arc<dyn Storage>) -> Self {
        Self::new(name, FieldMode::Files, limit).storage(storage)
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Adds an accepted content type; `type/*` and `*/*` are wildcards.
    #[must_use]
    pub fn allow(mut self, content_type: impl Into<String>) -> Self {
        self.allowed.push(content_type.into());
        self
    }

    #[must_use]
    pub fn validator(mut self, validator: impl Validator) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn path_template(mut self, template: impl Into<String>) -> Self {
        self.path_template = Some(template.into());
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn mode(&self) -> FieldMode {
        self.mode
    }

    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    #[must_use]
    pub fn storage_backend(&self) -> Option<&Arc<dyn Storage>> {
        self.storage.as_ref()
    }

    /// Destination path template of a file.
    #[must_use]
    pub fn template(&self) -> &str {
        self.path_template.as_deref().unwrap_or(DEFAULT_PATH_TEMPLATE)
    }

    /// Destination path template of one chunk of a chunked upload.
    #[must_use]
    pub fn chunk_template(&self) -> &str {
        self.path_template.as_deref().unwrap_or(DEFAULT_CHUNK_PATH_TEMPLATE)
    }

    /// Whether the allow-list accepts `content_type`.
    #[must_use]
    pub fn accepts(&self, content_type: &Mime) -> bool {
        is_allowed(content_type, &self.allowed)
    }

    /// Runs the validators in order and stops at the first failure.
    ///
    /// Absent values pass; whether a field must be present is decided by
    /// [`required`](Self::required) during parsing.
    ///
    /// # Errors
    /// Returns `ValidationFailed` with the validator's message.
    pub fn is_valid(&self, value: &FieldValue) -> UploadResult {
        if value.is_absent() {
            return Ok(());
        }
        for validator in &self.validators {
            if let Err(msg) = validator.validate(value) {
                return Err(upload_error!(ValidationFailed, "field {:?}: {}", self.name, msg));
            }
        }
        Ok(())
    }
}
