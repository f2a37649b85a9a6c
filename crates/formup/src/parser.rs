//! Multipart form parser
//!
//! [`FormParser`] reads a request body part by part against a [`Form`]:
//!
//! 1. Parts are matched to fields in declared order; omitted optional fields
//!    are skipped, a missing required field fails the request.
//! 2. A part's content type is the declared one, or sniffed from its first bytes.
//! 3. Scalars are buffered up to the field limit; files are streamed to the
//!    field's storage through a view clipped to the remaining budget, then the
//!    part is probed once more to detect overflow.
//! 4. Parts after the last field are rejected, then validators run.
//!
//! Every successful write is recorded in the request's [`CancellationLedger`].
//! A failure returns a [`Rejection`] that still owns the ledger; after an
//! upstream failure or cancellation the ledger has already been executed.

use crate::config::{ConfigError, ParserConfig};
use crate::error::*;
use crate::form::{Field, FieldMode, FieldValue, Form, ParsedForm};
use crate::http::content_type::*;
use crate::http::{BodySource, ByteSource, MultipartError, MultipartReader, PartHeaders, Tap, limited};
use crate::ledger::CancellationLedger;
use crate::object::Object;
use crate::storage::{ObjectBody, UploadContext};
use crate::utils::sniff::sniff;

use std::fmt;

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use http_body_util::BodyExt;
use mime::Mime;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// A successfully parsed request
#[derive(Debug)]
pub struct ParseResult {
    pub form: ParsedForm,
    /// Rollbacks of every file written while parsing
    pub ledger: CancellationLedger,
}

/// A failed parse
///
/// Storage failures and cancellation roll the ledger back before the rejection
/// is returned. Other failures, late validation included, leave the stored
/// files in place; call [`rollback`](Self::rollback) before reporting the error.
#[derive(Debug)]
pub struct Rejection {
    error: UploadError,
    ledger: CancellationLedger,
}

impl Rejection {
    #[must_use]
    pub fn new(error: UploadError, ledger: CancellationLedger) -> Self {
        Self { error, ledger }
    }

    #[must_use]
    pub fn error(&self) -> &UploadError {
        &self.error
    }

    #[must_use]
    pub fn ledger(&self) -> &CancellationLedger {
        &self.ledger
    }

    #[must_use]
    pub fn into_parts(self) -> (UploadError, CancellationLedger) {
        (self.error, self.ledger)
    }

    /// Cancels the ledger and returns the original error.
    ///
    /// Rollback failures are logged and never replace the original error.
    pub async fn rollback(self) -> UploadError {
        if let Err(e) = self.ledger.cancel().await {
            warn!(code = %self.error.code(), error = %e, "rollback of rejected upload failed");
        }
        self.error
    }
}

impl From<UploadError> for Rejection {
    fn from(error: UploadError) -> Self {
        Self::new(error, CancellationLedger::new())
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl std::error::Error for Rejection {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Multipart form parser
#[derive(Debug, Clone, Default)]
pub struct FormParser {
    config: ParserConfig,
}

impl FormParser {
    /// # Errors
    /// Returns an error if `config` is invalid.
    pub fn new(config: ParserConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parses an HTTP request.
    ///
    /// # Errors
    /// See [`parse_stream`](Self::parse_stream).
    pub async fn parse<B>(&self, form: &Form, req: http::Request<B>, cx: &UploadContext) -> Result<ParseResult, Rejection>
    where
        B: http_body::Body<Data = Bytes> + Send,
        B::Error: Into<StdError>,
    {
        let (parts, body) = req.into_parts();
        let content_type = header_content_type(&parts.headers)?;
        let body = body.into_data_stream().map_err(|e| -> StdError { e.into() });
        self.parse_stream(form, content_type, body, cx).await
    }

    /// Parses a body stream with the given request `Content-Type`.
    ///
    /// # Errors
    /// Returns a [`Rejection`] carrying the first failure and the ledger of the
    /// files already stored.
    pub async fn parse_stream<S>(
        &self,
        form: &Form,
        content_type: Option<&str>,
        body: S,
        cx: &UploadContext,
    ) -> Result<ParseResult, Rejection>
    where
        S: Stream<Item = Result<Bytes, StdError>> + Send,
    {
        form.check()?;

        let mime = parse_request_content_type(content_type).inspect_err(|e| warn!(error = %e, "rejected request"))?;
        let boundary = extract_boundary(&mime).inspect_err(|e| warn!(error = %e, "rejected request"))?;

        let source = BodySource::new(body, cx.cancellation_token().clone());
        let mut reader = MultipartReader::new(source, boundary.as_bytes(), &self.config);

        let mut engine = Engine {
            form,
            cx,
            sniff_len: self.config.sniff_len,
            parsed: ParsedForm::new(form.clone()),
            ledger: CancellationLedger::new(),
        };

        match engine.run(&mut reader).await {
            Ok(()) => Ok(ParseResult {
                form: engine.parsed,
                ledger: engine.ledger,
            }),
            Err(err) => {
                warn!(code = %err.code(), error = %err, written = engine.ledger.len(), "rejected upload");
                let upstream = err.class() == ErrorClass::UpstreamFailure || err.code() == UploadErrorCode::Cancelled;
                if upstream && let Err(e) = engine.ledger.cancel().await {
                    warn!(error = %e, "rollback after failed upload incomplete");
                }
                Err(Rejection::new(err, engine.ledger))
            }
        }
    }
}

fn map_multipart(e: MultipartError) -> UploadError {
    let code = match e {
        MultipartError::Cancelled => UploadErrorCode::Cancelled,
        MultipartError::HeaderTooLarge(..) | MultipartError::BoundaryBufferTooLarge(..) | MultipartError::TooManyParts(..) => {
            UploadErrorCode::TooLarge
        }
        MultipartError::Underlying(_) | MultipartError::InvalidFormat | MultipartError::Incomplete => {
            UploadErrorCode::MalformedBody
        }
    };
    UploadError::with_source(code, Box::new(e))
}

struct Engine<'a> {
    form: &'a Form,
    cx: &'a UploadContext,
    sniff_len: usize,
    parsed: ParsedForm,
    ledger: CancellationLedger,
}

impl Engine<'_> {
    async fn run<R: ByteSource>(&mut self, reader: &mut MultipartReader<R>) -> UploadResult {
        let fields = self.form.fields();
        let mut pending: Option<PartHeaders> = None;

        for (index, field) in fields.iter().enumerate() {
            let headers = match pending.take() {
                Some(headers) => headers,
                None => match reader.next_part().await.map_err(map_multipart)? {
                    Some(headers) => headers,
                    None => {
                        let remaining = fields.get(index..).unwrap_or_default();
                        if let Some(missing) = remaining.iter().find(|f| f.is_required()) {
                            return Err(upload_error!(MissingField, "missing field {:?}", missing.name()));
                        }
                        break;
                    }
                },
            };

            let Some(name) = headers.name.as_deref() else {
                return Err(upload_error!(MalformedBody, "part without a name"));
            };
            if name != field.name() {
                if field.is_required() {
                    return Err(upload_error!(MissingField, "expected field {:?}, got {:?}", field.name(), name));
                }
                debug!(field = field.name(), "optional field omitted");
                pending = Some(headers);
                continue;
            }

            let value = self.read_field(reader, field, &headers).await?;
            self.parsed.set(index, value);
        }

        let extra = match pending {
            Some(headers) => Some(headers),
            None => reader.next_part().await.map_err(map_multipart)?,
        };
        if let Some(headers) = extra {
            return Err(upload_error!(UnexpectedPart, "unexpected part {:?}", headers.name.unwrap_or_default()));
        }

        for (field, value) in fields.iter().zip(self.parsed.values()) {
            field.is_valid(value)?;
        }
        Ok(())
    }

    async fn read_field<R: ByteSource>(
        &mut self,
        reader: &mut MultipartReader<R>,
        field: &Field,
        headers: &PartHeaders,
    ) -> UploadResult<FieldValue> {
        match field.mode() {
            FieldMode::Scalar => {
                if !field.allowed().is_empty() {
                    let content_type = self.content_type(reader, headers, field.limit()).await?;
                    check_allowed(field, &content_type)?;
                }
                match reader.read_to_end(field.limit()).await.map_err(map_multipart)? {
                    Ok(bytes) => {
                        debug!(field = field.name(), len = bytes.len(), "read field");
                        Ok(FieldValue::Scalar(bytes))
                    }
                    Err(_) => Err(upload_error!(TooLarge, "field {:?} exceeds {} bytes", field.name(), field.limit())),
                }
            }
            FieldMode::File => {
                let content_type = self.content_type(reader, headers, field.limit()).await?;
                if is_multipart(&content_type) {
                    return Err(upload_error!(
                        ContentTypeRejected,
                        "field {:?} takes a single file, got {}",
                        field.name(),
                        content_type.essence_str()
                    ));
                }
                check_allowed(field, &content_type)?;
                let object = self.store(reader, field, headers, content_type, field.limit()).await?;
                Ok(FieldValue::Files(vec![object]))
            }
            FieldMode::Files => {
                let content_type = self.content_type(reader, headers, field.limit()).await?;
                if !is_multipart_mixed(&content_type) {
                    return Err(upload_error!(
                        ContentTypeRejected,
                        "field {:?} takes multipart/mixed, got {}",
                        field.name(),
                        content_type.essence_str()
                    ));
                }
                let boundary = extract_boundary(&content_type)?;

                let mut budget = field.limit();
                let mut objects = Vec::new();
                let parts = {
                    let mut inner = reader.nested(boundary.as_bytes());
                    while let Some(headers) = inner.next_part().await.map_err(map_multipart)? {
                        let content_type = self.content_type(&mut inner, &headers, budget).await?;
                        if is_multipart(&content_type) {
                            return Err(upload_error!(ContentTypeRejected, "nested multipart in field {:?}", field.name()));
                        }
                        check_allowed(field, &content_type)?;
                        let object = self.store(&mut inner, field, &headers, content_type, budget).await?;
                        budget = budget.saturating_sub(object.size);
                        objects.push(object);
                    }
                    inner.parts()
                };
                reader.add_parts(parts);
                Ok(FieldValue::Files(objects))
            }
        }
    }

    /// Declared content type, or one sniffed from at most `budget` leading bytes.
    async fn content_type<R: ByteSource>(
        &self,
        reader: &mut MultipartReader<R>,
        headers: &PartHeaders,
        budget: u64,
    ) -> UploadResult<Mime> {
        if let Some(declared) = headers.content_type.as_deref() {
            return parse_content_type(declared);
        }
        if budget == 0 && !reader.peek(1).await.map_err(map_multipart)?.is_empty() {
            let filename = headers.filename.as_deref().unwrap_or_default();
            return Err(upload_error!(TooLarge, "no bytes left for part {:?}", filename));
        }
        let len = usize::try_from(budget).map_or(self.sniff_len, |b| b.min(self.sniff_len));
        let head = reader.peek(len).await.map_err(map_multipart)?;
        let sniffed = sniff(&head);
        debug!(content_type = sniffed, "sniffed content type");
        parse_content_type(sniffed)
    }

    fn new_object(&self, field: &Field, headers: &PartHeaders, content_type: Mime) -> Object {
        let chunk = self.cx.chunk();
        Object {
            field: field.name().to_owned(),
            upload_id: chunk.map(|c| c.upload_id.clone()),
            uploader_id: self.cx.uploader().map(str::to_owned),
            size: 0,
            chunk_offset: chunk.map(|c| c.chunk_offset),
            chunks_total: chunk.map(|c| c.chunks_total),
            filename: chunk.map(|c| c.filename.clone()).or_else(|| headers.filename.clone()),
            file_uuid: chunk.map_or_else(Uuid::new_v4, |c| c.file_uuid),
            path_template: match chunk {
                Some(_) => field.chunk_template().to_owned(),
                None => field.template().to_owned(),
            },
            content_type,
        }
    }

    /// Streams the current part to the field's storage.
    async fn store<R: ByteSource>(
        &mut self,
        reader: &mut MultipartReader<R>,
        field: &Field,
        headers: &PartHeaders,
        content_type: Mime,
        budget: u64,
    ) -> UploadResult<Object> {
        let Some(storage) = field.storage_backend().cloned() else {
            error!(field = field.name(), "file field without storage");
            return Err(upload_error!(Misconfigured, "file field {:?} has no storage", field.name()));
        };

        let mut object = self.new_object(field, headers, content_type);

        let tap = Tap::default();
        let result = {
            let body: ObjectBody<'_> = Box::pin(limited(reader, budget, &tap));
            storage.upload(self.cx, &object, body).await
        };

        if let Some(fault) = tap.take_fault() {
            if let Ok(written) = result {
                self.ledger.push(field.name(), written.rollback, storage);
            }
            return Err(map_multipart(fault));
        }

        let written = match result {
            Ok(written) => written,
            Err(source) => {
                error!(field = field.name(), error = %source, "storage failed");
                return Err(upload_error!(source, Storage, "storing field {:?}", field.name()));
            }
        };

        self.ledger.push(field.name(), written.rollback, storage);
        object.size = written.bytes;

        if written.bytes > budget {
            return Err(upload_error!(
                TooLarge,
                "field {:?}: storage reported {} bytes, limit {}",
                field.name(),
                written.bytes,
                budget
            ));
        }

        if reader.read_chunk().await.map_err(map_multipart)?.is_some() {
            if tap.delivered() >= budget {
                return Err(upload_error!(TooLarge, "field {:?} exceeds {} bytes", field.name(), field.limit()));
            }
            error!(field = field.name(), delivered = tap.delivered(), "storage stopped reading early");
            return Err(upload_error!(Storage, "storage stopped reading field {:?} early", field.name()));
        }

        debug!(field = field.name(), size = object.size, path = %object.path(), "stored file");
        Ok(object)
    }
}

fn check_allowed(field: &Field, content_type: &Mime) -> UploadResult {
    if field.accepts(content_type) {
        return Ok(());
    }
    Err(upload_error!(
        ContentTypeRejected,
        "field {:?} does not accept {}",
        field.name(),
        content_type.essence_str()
    ))
}
