//! multipart/form-data encoding
//!
//! Builds request bodies the parser accepts: text fields, single files and
//! `multipart/mixed` file sets. Used by clients and tests.
//!
//! ```
//! use formup::encode::{FilePart, FormBody};
//!
//! let mut body = FormBody::with_boundary("XyZ");
//! body.text("title", "holiday")
//!     .file("cover", "a.png", Some("image/png"), b"\x89PNG\r\n\x1a\n")
//!     .files("extras", &[FilePart::new("b.txt", Some("text/plain"), b"bee")]);
//!
//! assert_eq!(body.content_type(), "multipart/form-data; boundary=XyZ");
//! let bytes = body.finish();
//! assert!(bytes.ends_with(b"--XyZ--\r\n"));
//! ```

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Percent-encodes `"`, CR and LF in a `Content-Disposition` parameter, as
/// browsers do for form-data names and filenames.
fn escape(value: &str) -> Cow<'_, str> {
    if !value.contains(['"', '\r', '\n']) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len().saturating_add(8));
    for c in value.chars() {
        match c {
            '"' => out.push_str("%22"),
            '\r' => out.push_str("%0D"),
            '\n' => out.push_str("%0A"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// One file of a `multipart/mixed` set
#[derive(Debug, Clone, Copy)]
pub struct FilePart<'a> {
    pub filename: &'a str,
    pub content_type: Option<&'a str>,
    pub content: &'a [u8],
}

impl<'a> FilePart<'a> {
    #[must_use]
    pub fn new(filename: &'a str, content_type: Option<&'a str>, content: &'a [u8]) -> Self {
        Self {
            filename,
            content_type,
            content,
        }
    }
}

/// multipart/form-data body builder
#[derive(Debug)]
pub struct FormBody {
    boundary: String,
    body: BytesMut,
    nested: usize,
}

impl Default for FormBody {
    fn default() -> Self {
        Self::new()
    }
}

impl FormBody {
    /// Creates a builder with a random boundary.
    #[must_use]
    pub fn new() -> Self {
        Self::with_boundary(format!("formup-{}", Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            body: BytesMut::new(),
            nested: 0,
        }
    }

    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The request `Content-Type` value.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn open_part(&mut self, disposition: &str, content_type: Option<&str>) {
        self.body.put_slice(format!("--{}\r\n", self.boundary).as_bytes());
        self.body
            .put_slice(format!("Content-Disposition: {disposition}\r\n").as_bytes());
        if let Some(content_type) = content_type {
            self.body.put_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        self.body.put_slice(b"\r\n");
    }

    /// Adds a scalar field.
    pub fn text(&mut self, name: &str, value: impl AsRef<[u8]>) -> &mut Self {
        self.open_part(&format!("form-data; name=\"{}\"", escape(name)), None);
        self.body.put_slice(value.as_ref());
        self.body.put_slice(b"\r\n");
        self
    }

    /// Adds a single file. Without a content type the parser sniffs one.
    pub fn file(&mut self, name: &str, filename: &str, content_type: Option<&str>, content: impl AsRef<[u8]>) -> &mut Self {
        let disposition = format!("form-data; name=\"{}\"; filename=\"{}\"", escape(name), escape(filename));
        self.open_part(&disposition, content_type);
        self.body.put_slice(content.as_ref());
        self.body.put_slice(b"\r\n");
        self
    }

    /// Adds a file set wrapped in `multipart/mixed`.
    pub fn files(&mut self, name: &str, files: &[FilePart<'_>]) -> &mut Self {
        self.nested = self.nested.wrapping_add(1);
        // must not start with the outer boundary
        let inner = format!("mixed-{}-{}", self.nested, self.boundary);

        self.open_part(
            &format!("form-data; name=\"{}\"", escape(name)),
            Some(&format!("multipart/mixed; boundary={inner}")),
        );
        for file in files {
            self.body.put_slice(format!("--{inner}\r\n").as_bytes());
            self.body
                .put_slice(format!("Content-Disposition: file; filename=\"{}\"\r\n", escape(file.filename)).as_bytes());
            if let Some(content_type) = file.content_type {
                self.body.put_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
            }
            self.body.put_slice(b"\r\n");
            self.body.put_slice(file.content);
            self.body.put_slice(b"\r\n");
        }
        self.body.put_slice(format!("--{inner}--\r\n").as_bytes());
        self
    }

    /// Appends the close delimiter and returns the encoded body.
    #[must_use]
    pub fn finish(mut self) -> Bytes {
        self.body.put_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        self.body.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let mut body = FormBody::with_boundary("b");
        body.text("k", "v").file("f", "x.bin", None, b"\x00\x01");
        let bytes = body.finish();
        let expected = concat!(
            "--b\r\n",
            "Content-Disposition: form-data; name=\"k\"\r\n",
            "\r\n",
            "v\r\n",
            "--b\r\n",
            "Content-Disposition: form-data; name=\"f\"; filename=\"x.bin\"\r\n",
            "\r\n",
            "\x00\x01\r\n",
            "--b--\r\n",
        );
        assert_eq!(bytes, expected.as_bytes());
    }

    #[test]
    fn disposition_escaping() {
        assert_eq!(escape("plain.txt"), "plain.txt");
        assert_eq!(escape("my \"best\".txt"), "my %22best%22.txt");
        assert_eq!(escape("a\r\nb"), "a%0D%0Ab");
    }

    #[test]
    fn random_boundaries_differ() {
        assert_ne!(FormBody::new().boundary(), FormBody::new().boundary());
    }
}
