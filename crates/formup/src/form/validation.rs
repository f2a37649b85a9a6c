//! Field validators

use super::FieldValue;

use atoi::FromRadix10Checked;

/// Field value validator
///
/// Validators run after the whole body is parsed, in the order they were
/// attached. Absent optional values are not validated.
///
/// Any `Fn(&FieldValue) -> Result<(), String>` is a validator:
///
/// ```
/// use formup::form::{Field, FieldValue};
///
/// let field = Field::scalar("nickname", 64).validator(|v: &FieldValue| match v.as_str() {
///     Some(s) if s.starts_with('_') => Err("must not start with an underscore".to_owned()),
///     _ => Ok(()),
/// });
/// ```
pub trait Validator: Send + Sync + 'static {
    /// # Errors
    /// Returns a message describing the violation.
    fn validate(&self, value: &FieldValue) -> Result<(), String>;
}

impl<F> Validator for F
where
    F: Fn(&FieldValue) -> Result<(), String> + Send + Sync + 'static,
{
    fn validate(&self, value: &FieldValue) -> Result<(), String> {
        (self)(value)
    }
}

/// Rejects empty scalars and empty file sets.
#[derive(Debug, Clone, Copy)]
pub struct NotEmpty;

impl Validator for NotEmpty {
    fn validate(&self, value: &FieldValue) -> Result<(), String> {
        let empty = match value {
            FieldValue::Absent => true,
            FieldValue::Scalar(bytes) => bytes.is_empty(),
            FieldValue::Files(objects) => objects.is_empty(),
        };
        if empty { Err("must not be empty".to_owned()) } else { Ok(()) }
    }
}

/// Bounds the byte length of a scalar or the number of files in a set.
#[derive(Debug, Clone, Copy)]
pub struct MaxLen(pub usize);

impl Validator for MaxLen {
    fn validate(&self, value: &FieldValue) -> Result<(), String> {
        let len = match value {
            FieldValue::Absent => 0,
            FieldValue::Scalar(bytes) => bytes.len(),
            FieldValue::Files(objects) => objects.len(),
        };
        if len > self.0 {
            return Err(format!("length {len} exceeds {}", self.0));
        }
        Ok(())
    }
}

/// Accepts base-10 unsigned integers that fit in a `u64`.
#[derive(Debug, Clone, Copy)]
pub struct Numeric;

impl Validator for Numeric {
    fn validate(&self, value: &FieldValue) -> Result<(), String> {
        let Some(bytes) = value.as_bytes() else {
            return Err("must be a scalar value".to_owned());
        };
        match u64::from_radix_10_checked(bytes) {
            (Some(_), used) if used > 0 && used == bytes.len() => Ok(()),
            _ => Err("must be a base-10 unsigned integer".to_owned()),
        }
    }
}

/// Accepts one of a fixed set of strings.
#[derive(Debug, Clone)]
pub struct OneOf(Vec<String>);

impl OneOf {
    pub fn new<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(choices.into_iter().map(Into::into).collect())
    }
}

impl Validator for OneOf {
    fn validate(&self, value: &FieldValue) -> Result<(), String> {
        match value.as_str() {
            Some(s) if self.0.iter().any(|c| c == s) => Ok(()),
            _ => Err(format!("must be one of {:?}", self.0)),
        }
    }
}
