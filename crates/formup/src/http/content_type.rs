//! Content-Type handling utilities
//!
//! Parsing of request and part content types, boundary extraction and
//! allow-list matching.

use crate::error::*;

use mime::Mime;

/// Error type for Content-Type parsing failures
#[derive(Debug, thiserror::Error)]
pub enum ContentTypeError {
    /// The Content-Type header value is not valid UTF-8
    #[error("Content-Type header contains invalid UTF-8 characters")]
    InvalidUtf8,

    /// The Content-Type header value has an invalid format
    #[error("Content-Type header has invalid format: {reason}")]
    InvalidFormat { reason: String },
}

impl From<mime::FromStrError> for ContentTypeError {
    fn from(err: mime::FromStrError) -> Self {
        ContentTypeError::InvalidFormat { reason: err.to_string() }
    }
}

/// Reads the `Content-Type` header of a request.
///
/// # Errors
/// Returns `MalformedBody` if the value is not valid UTF-8.
pub fn header_content_type(headers: &http::HeaderMap) -> UploadResult<Option<&str>> {
    match headers.get(http::header::CONTENT_TYPE) {
        None => Ok(None),
        Some(value) => match value.to_str() {
            Ok(s) => Ok(Some(s)),
            Err(_) => Err(upload_error!(ContentTypeError::InvalidUtf8, MalformedBody)),
        },
    }
}

/// Parses the request `Content-Type` value.
///
/// # Errors
/// Returns `MalformedBody` if the value is absent, not a MIME type or not `multipart/*`.
pub fn parse_request_content_type(value: Option<&str>) -> UploadResult<Mime> {
    let Some(value) = value else {
        return Err(upload_error!(MalformedBody, "missing Content-Type header"));
    };
    let mime = parse_content_type(value)?;
    if mime.type_() != mime::MULTIPART {
        return Err(upload_error!(MalformedBody, "expected multipart/*, got {}", mime.essence_str()));
    }
    Ok(mime)
}

/// Parses a Content-Type value with a descriptive error.
///
/// # Errors
/// Returns `MalformedBody` if the value is not a valid MIME type.
pub fn parse_content_type(value: &str) -> UploadResult<Mime> {
    match value.parse::<Mime>() {
        Ok(mime) => Ok(mime),
        Err(err) => {
            let hint = get_detailed_error_message(value);
            Err(upload_error!(
                ContentTypeError::from(err),
                MalformedBody,
                "Invalid Content-Type: {:?}. {}",
                value,
                hint
            ))
        }
    }
}

/// Extracts the `boundary` parameter.
///
/// # Errors
/// Returns `NoBoundary` if the parameter is missing or empty.
pub fn extract_boundary(mime: &Mime) -> UploadResult<String> {
    match mime.get_param(mime::BOUNDARY) {
        Some(b) if !b.as_str().is_empty() => Ok(b.as_str().to_owned()),
        _ => Err(upload_error!(NoBoundary, "no boundary in {:?}", mime.as_ref())),
    }
}

/// Get a detailed error message explaining what might be wrong with the Content-Type
fn get_detailed_error_message(content_type_str: &str) -> String {
    let mut hints = Vec::new();

    if content_type_str.contains(' ') && !content_type_str.contains(';') {
        hints.push("contains spaces without semicolon separator");
    }

    if content_type_str.starts_with('/') || content_type_str.ends_with('/') {
        hints.push("missing type or subtype");
    }

    if content_type_str.split(';').next().map_or(0, |s| s.split('/').count()) != 2 {
        hints.push("should be in format 'type/subtype' (e.g., 'image/png', 'multipart/form-data')");
    }

    if content_type_str.contains(";;") {
        hints.push("contains double semicolons");
    }

    if hints.is_empty() {
        hints.push("must be a valid MIME type (e.g., 'text/plain', 'multipart/mixed; boundary=...')");
    }

    if hints.len() == 1 {
        format!("Content-Type {}", hints.join(""))
    } else {
        format!("Content-Type issues: {}", hints.join("; "))
    }
}

/// Check if a MIME type is multipart/mixed
#[inline]
pub fn is_multipart_mixed(mime: &Mime) -> bool {
    mime.type_() == mime::MULTIPART && mime.subtype() == "mixed"
}

/// Check if a MIME type is any multipart type
#[inline]
pub fn is_multipart(mime: &Mime) -> bool {
    mime.type_() == mime::MULTIPART
}

/// Matches a MIME type against one allow-list entry.
///
/// Entries are compared on their essence, case-insensitively. `type/*` and `*/*`
/// are wildcards; parameters on either side are ignored.
pub fn matches_allowed(mime: &Mime, allowed: &str) -> bool {
    let essence = allowed.split(';').next().unwrap_or_default().trim();
    let Some((ty, subty)) = essence.split_once('/') else { return false };
    if ty == "*" {
        return subty == "*";
    }
    if !mime.type_().as_str().eq_ignore_ascii_case(ty) {
        return false;
    }
    subty == "*" || mime.subtype().as_str().eq_ignore_ascii_case(subty)
}

/// An empty allow-list accepts any type.
pub fn is_allowed(mime: &Mime, allow_list: &[String]) -> bool {
    allow_list.is_empty() || allow_list.iter().any(|a| matches_allowed(mime, a))
}
