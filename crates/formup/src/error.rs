//! Upload errors
//!
//! Every failure surfaced by this crate is an [`UploadError`]: an [`UploadErrorCode`],
//! an optional human-readable message and an optional source error. Codes are grouped
//! into [`ErrorClass`]es and each code maps to one HTTP status, so the routing layer
//! can turn any failure into a response without inspecting messages.

use std::borrow::Cow;
use std::fmt;

use http::StatusCode;

/// Boxed error used at trait seams (storage, session store, ticket service)
pub type StdError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result carrying an [`UploadError`]
pub type UploadResult<T = (), E = UploadError> = Result<T, E>;

/// Coarse failure class
///
/// Malformed requests and policy violations are the client's fault and are never
/// retried. Misconfiguration is a programming error. Upstream failures come from
/// a collaborator (storage backend, session store, ticket service).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    MalformedRequest,
    PolicyViolation,
    ServerMisconfiguration,
    UpstreamFailure,
    Authorization,
}

/// Upload error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum UploadErrorCode {
    /// The request content type carries no `boundary` parameter.
    NoBoundary,
    /// The body is not a well-formed multipart stream.
    MalformedBody,
    /// A required field is absent or arrived out of order.
    MissingField,
    /// A part appeared after every declared field was consumed.
    UnexpectedPart,
    /// A chunk request lacks one of the chunk headers.
    MissingChunkField,
    /// A chunk header is present but unparsable or inconsistent.
    InvalidChunkField,
    /// The chunk's upload id differs from the id bound to its session.
    UploadIdMismatch,
    /// The part's content type is outside the field's allow-list.
    ContentTypeRejected,
    /// A field, file set or chunk exceeds its byte limit.
    TooLarge,
    /// A field validator rejected the value.
    ValidationFailed,
    /// The form template cannot serve requests.
    Misconfigured,
    /// The storage backend failed.
    Storage,
    /// The session store failed.
    Session,
    /// No authenticated owner identity.
    Unauthenticated,
    /// The upload session is absent or expired.
    SessionNotFound,
    /// The admission controller refused a slot.
    AdmissionDenied,
    /// The request was cancelled before it completed.
    Cancelled,
}

impl UploadErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoBoundary => "NoBoundary",
            Self::MalformedBody => "MalformedBody",
            Self::MissingField => "MissingField",
            Self::UnexpectedPart => "UnexpectedPart",
            Self::MissingChunkField => "MissingChunkField",
            Self::InvalidChunkField => "InvalidChunkField",
            Self::UploadIdMismatch => "UploadIdMismatch",
            Self::ContentTypeRejected => "ContentTypeRejected",
            Self::TooLarge => "TooLarge",
            Self::ValidationFailed => "ValidationFailed",
            Self::Misconfigured => "Misconfigured",
            Self::Storage => "Storage",
            Self::Session => "Session",
            Self::Unauthenticated => "Unauthenticated",
            Self::SessionNotFound => "SessionNotFound",
            Self::AdmissionDenied => "AdmissionDenied",
            Self::Cancelled => "Cancelled",
        }
    }

    #[must_use]
    pub const fn class(self) -> ErrorClass {
        match self {
            Self::NoBoundary
            | Self::MalformedBody
            | Self::MissingField
            | Self::UnexpectedPart
            | Self::MissingChunkField
            | Self::InvalidChunkField
            | Self::UploadIdMismatch
            | Self::Cancelled => ErrorClass::MalformedRequest,
            Self::ContentTypeRejected | Self::TooLarge | Self::ValidationFailed | Self::AdmissionDenied => {
                ErrorClass::PolicyViolation
            }
            Self::Misconfigured => ErrorClass::ServerMisconfiguration,
            Self::Storage | Self::Session => ErrorClass::UpstreamFailure,
            Self::Unauthenticated | Self::SessionNotFound => ErrorClass::Authorization,
        }
    }

    #[must_use]
    pub const fn status_code(self) -> StatusCode {
        match self {
            Self::NoBoundary
            | Self::MalformedBody
            | Self::MissingField
            | Self::UnexpectedPart
            | Self::MissingChunkField
            | Self::InvalidChunkField
            | Self::UploadIdMismatch
            | Self::Cancelled => StatusCode::BAD_REQUEST,
            Self::ContentTypeRejected => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ValidationFailed => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Misconfigured => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage | Self::Session => StatusCode::BAD_GATEWAY,
            Self::Unauthenticated | Self::SessionNotFound => StatusCode::UNAUTHORIZED,
            Self::AdmissionDenied => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl fmt::Display for UploadErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload error
pub struct UploadError {
    code: UploadErrorCode,
    message: Option<Cow<'static, str>>,
    source: Option<StdError>,
}

impl UploadError {
    #[must_use]
    pub fn new(code: UploadErrorCode) -> Self {
        Self {
            code,
            message: None,
            source: None,
        }
    }

    #[must_use]
    pub fn with_message(code: UploadErrorCode, msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: Some(msg.into()),
            source: None,
        }
    }

    #[must_use]
    pub fn with_source(code: UploadErrorCode, source: StdError) -> Self {
        Self {
            code,
            message: None,
            source: Some(source),
        }
    }

    #[must_use]
    pub fn set_message(mut self, msg: impl Into<Cow<'static, str>>) -> Self {
        self.message = Some(msg.into());
        self
    }

    #[must_use]
    pub fn code(&self) -> UploadErrorCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        self.code.class()
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    /// Whether the client, not the server, is at fault.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    pub fn take_source(&mut self) -> Option<StdError> {
        self.source.take()
    }
}

impl From<UploadErrorCode> for UploadError {
    fn from(code: UploadErrorCode) -> Self {
        Self::new(code)
    }
}

impl fmt::Debug for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("UploadError");
        d.field("code", &self.code);
        if let Some(ref message) = self.message {
            d.field("message", message);
        }
        if let Some(ref source) = self.source {
            d.field("source", source);
        }
        d.finish_non_exhaustive()
    }
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadError: {}", self.code)?;
        if let Some(ref message) = self.message {
            write!(f, ": {message}")?;
        }
        if let Some(ref source) = self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source = self.source.as_ref()?;
        Some(source.as_ref())
    }
}

/// Constructs an [`UploadError`]
///
/// ```
/// use formup::{upload_error, UploadErrorCode};
///
/// let err = upload_error!(TooLarge, "field {:?} exceeds {} bytes", "avatar", 1024);
/// assert_eq!(err.code(), UploadErrorCode::TooLarge);
///
/// let io = std::io::Error::other("disk full");
/// let err = upload_error!(io, Storage, "write failed");
/// assert_eq!(err.code(), UploadErrorCode::Storage);
/// ```
#[macro_export]
macro_rules! upload_error {
    ($code:ident) => {
        $crate::UploadError::new($crate::UploadErrorCode::$code)
    };
    ($code:ident, $fmt:literal $(, $args:expr)* $(,)?) => {
        $crate::UploadError::with_message($crate::UploadErrorCode::$code, format!($fmt $(, $args)*))
    };
    ($source:expr, $code:ident) => {
        $crate::UploadError::with_source($crate::UploadErrorCode::$code, ::std::boxed::Box::from($source))
    };
    ($source:expr, $code:ident, $fmt:literal $(, $args:expr)* $(,)?) => {
        $crate::UploadError::with_source($crate::UploadErrorCode::$code, ::std::boxed::Box::from($source))
            .set_message(format!($fmt $(, $args)*))
    };
}
