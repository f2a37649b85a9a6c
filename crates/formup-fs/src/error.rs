use formup::StdError;

use std::panic::Location;

use tracing::error;
use tracing_error::SpanTrace;

#[derive(Debug)]
pub struct Error {
    source: StdError,
    span_trace: SpanTrace,
}

pub type Result<T = (), E = Error> = std::result::Result<T, E>;

impl Error {
    #[must_use]
    #[track_caller]
    pub fn new(source: StdError) -> Self {
        log(&*source);
        Self {
            source,
            span_trace: SpanTrace::capture(),
        }
    }

    #[must_use]
    #[track_caller]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self::new(s.into().into())
    }

    #[must_use]
    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }
}

impl<E> From<E> for Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[track_caller]
    fn from(source: E) -> Self {
        Self::new(Box::new(source))
    }
}

impl From<Error> for StdError {
    fn from(e: Error) -> Self {
        e.source
    }
}

#[inline]
#[track_caller]
fn log(source: &dyn std::error::Error) {
    let location = Location::caller();
    let span_trace = SpanTrace::capture();
    error!(%location, error = %source, "span trace:\n{span_trace}");
}
