//! Form templates
//!
//! A [`Form`] is an ordered, immutable list of [`Field`]s describing what a
//! request body must contain. Parts must arrive in the declared order; optional
//! fields may be omitted. Parsing a body against a form yields a [`ParsedForm`].

mod field;
pub mod validation;

pub use self::field::{Field, FieldMode};

use crate::error::*;
use crate::object::Object;

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use tracing::error;

/// Parsed value of one field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FieldValue {
    /// The optional field was omitted
    #[default]
    Absent,
    /// Buffered value of a scalar field
    Scalar(Bytes),
    /// Stored files of a file field
    Files(Vec<Object>),
}

impl FieldValue {
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Scalar(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The scalar value, if it is valid UTF-8
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    #[must_use]
    pub fn objects(&self) -> &[Object] {
        match self {
            Self::Files(objects) => objects,
            _ => &[],
        }
    }
}

/// Form template
///
/// Cheap to clone; the field list is shared.
#[derive(Debug, Clone)]
pub struct Form {
    fields: Arc<[Field]>,
}

impl Form {
    pub fn new(fields: impl IntoIterator<Item = Field>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name() == name)
    }

    /// Checks the template for mistakes that make every request fail.
    ///
    /// # Errors
    /// Returns `Misconfigured` for an empty or duplicate field name, or a file field
    /// without a storage backend.
    pub fn check(&self) -> UploadResult {
        let mut seen = HashSet::new();
        for field in self.fields.iter() {
            let name = field.name();
            if name.is_empty() {
                error!("form field with an empty name");
                return Err(upload_error!(Misconfigured, "empty field name"));
            }
            if !seen.insert(name) {
                error!(field = name, "duplicate form field");
                return Err(upload_error!(Misconfigured, "duplicate field {:?}", name));
            }
            if field.mode().is_file() && field.storage_backend().is_none() {
                error!(field = name, "file field without storage");
                return Err(upload_error!(Misconfigured, "file field {:?} has no storage", name));
            }
        }
        Ok(())
    }
}

/// A form populated from one request
#[derive(Debug, Clone)]
pub struct ParsedForm {
    form: Form,
    values: Vec<FieldValue>,
}

impl ParsedForm {
    pub(crate) fn new(form: Form) -> Self {
        let values = vec![FieldValue::Absent; form.fields.len()];
        Self { form, values }
    }

    pub(crate) fn set(&mut self, index: usize, value: FieldValue) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value;
        }
    }

    #[must_use]
    pub fn form(&self) -> &Form {
        &self.form
    }

    /// Value of `name`, or `None` for an unknown field
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(self.form.position(name)?)
    }

    /// Raw bytes of a scalar field; `None` if the optional field was omitted.
    ///
    /// # Errors
    /// Returns `Misconfigured` if the form has no such field or the field holds files.
    pub fn get(&self, name: &str) -> UploadResult<Option<&Bytes>> {
        let Some(index) = self.form.position(name) else {
            return Err(upload_error!(Misconfigured, "no field {:?} in form", name));
        };
        match self.values.get(index) {
            Some(FieldValue::Scalar(bytes)) => Ok(Some(bytes)),
            Some(FieldValue::Files(_)) => Err(upload_error!(Misconfigured, "field {:?} holds files", name)),
            Some(FieldValue::Absent) | None => {
                if self.form.fields.get(index).is_some_and(|f| f.mode().is_file()) {
                    return Err(upload_error!(Misconfigured, "field {:?} holds files", name));
                }
                Ok(None)
            }
        }
    }

    /// Stored files of a file field; empty if omitted or unknown.
    #[must_use]
    pub fn files(&self, name: &str) -> &[Object] {
        match self.value(name) {
            Some(value) => value.objects(),
            None => &[],
        }
    }

    /// `(name, value)` pairs in declared order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.form.fields.iter().map(Field::name).zip(self.values.iter())
    }

    pub(crate) fn values(&self) -> &[FieldValue] {
        &self.values
    }
}
