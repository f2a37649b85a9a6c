//! Chunked uploads
//!
//! A large file is sent as a sequence of requests, one chunk each. The
//! coordinator binds a client-visible upload id to a server-generated file UUID
//! in an upload session, then checks every chunk against that session before
//! its body is read.
//!
//! ```text
//! initialize ──▶ (upload session, upload id) ──▶ receive_chunk × chunkstotal
//! ```
//!
//! Completion is not tracked: the chunk with `chunkoffset == chunkstotal - 1` is
//! the last one, and the session simply expires.

use crate::admission::{Admission, Ticket, TicketService};
use crate::config::{ChunkedConfig, ConfigError, ParserConfig};
use crate::error::*;
use crate::form::{FieldMode, Form};
use crate::object::ChunkInfo;
use crate::parser::{FormParser, ParseResult, Rejection};
use crate::session::{Identity, SessionStore};
use crate::storage::UploadContext;
use crate::utils::unix_now;

use std::sync::Arc;

use atoi::FromRadix10Checked;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Request headers of a chunk
pub mod headers {
    pub const UPLOAD_SESSION: &str = "uploadsession";
    pub const UPLOAD_ID: &str = "uploadid";
    pub const FILENAME: &str = "filename";
    pub const FILE_SIZE: &str = "filesize";
    pub const CHUNK_SIZE: &str = "chunksize";
    pub const CHUNK_OFFSET: &str = "chunkoffset";
    pub const CHUNKS_TOTAL: &str = "chunkstotal";
}

/// Record kept in an upload session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSessionRecord {
    pub upload_id: String,
    pub file_uuid: Uuid,
    /// Identity that initialized the upload
    pub owner: String,
    /// Admission ticket, if admission control is enabled
    pub ticket: Option<Ticket>,
    /// Unix timestamp (seconds)
    pub created_at: i64,
}

/// Result of [`ChunkedUploads::initialize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializedUpload {
    /// Sent back by the client in the `uploadsession` header
    pub session_id: String,
    /// Sent back by the client in the `uploadid` header
    pub upload_id: String,
}

/// A stored chunk
#[derive(Debug)]
pub struct ChunkReceipt {
    pub chunk: ChunkInfo,
    pub result: ParseResult,
}

pub struct ChunkedUploadsBuilder {
    sessions: Arc<dyn SessionStore>,
    tickets: Option<Arc<dyn TicketService>>,
    config: ChunkedConfig,
    parser: ParserConfig,
}

impl ChunkedUploadsBuilder {
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            sessions,
            tickets: None,
            config: ChunkedConfig::default(),
            parser: ParserConfig::default(),
        }
    }

    pub fn set_ticket_service(&mut self, tickets: Arc<dyn TicketService>) {
        self.tickets = Some(tickets);
    }

    pub fn set_config(&mut self, config: ChunkedConfig) {
        self.config = config;
    }

    pub fn set_parser_config(&mut self, config: ParserConfig) {
        self.parser = config;
    }

    /// # Errors
    /// Returns an error if a configuration is invalid, or admission control is
    /// enabled without a ticket service.
    pub fn build(self) -> Result<ChunkedUploads, ConfigError> {
        self.config.validate()?;
        let parser = FormParser::new(self.parser)?;
        let admission = match (self.config.max_concurrency, self.tickets) {
            (None, _) => None,
            (Some(_), None) => return Err(ConfigError::MissingTicketService),
            (Some(max), Some(service)) => Some(Admission::new(service, max, self.config.ticket_ttl())),
        };
        Ok(ChunkedUploads {
            sessions: self.sessions,
            admission,
            parser,
            config: self.config,
        })
    }
}

/// Chunked upload coordinator
pub struct ChunkedUploads {
    sessions: Arc<dyn SessionStore>,
    admission: Option<Admission>,
    parser: FormParser,
    config: ChunkedConfig,
}

impl std::fmt::Debug for ChunkedUploads {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedUploads")
            .field("admission", &self.admission)
            .field("parser", &self.parser)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn session_failure(source: StdError, op: &'static str) -> UploadError {
    error!(error = %source, op, "session store failed");
    upload_error!(source, Session, "session store: {} failed", op)
}

fn header<'a>(headers: &'a http::HeaderMap, name: &'static str) -> UploadResult<&'a str> {
    let Some(value) = headers.get(name) else {
        return Err(upload_error!(MissingChunkField, "missing header {:?}", name));
    };
    match value.to_str() {
        Ok(s) if !s.is_empty() => Ok(s),
        _ => Err(upload_error!(InvalidChunkField, "invalid header {:?}", name)),
    }
}

fn numeric_header(headers: &http::HeaderMap, name: &'static str) -> UploadResult<u64> {
    let value = header(headers, name)?;
    match u64::from_radix_10_checked(value.as_bytes()) {
        (Some(n), used) if used == value.len() => Ok(n),
        _ => Err(upload_error!(InvalidChunkField, "header {:?} is not a base-10 integer: {:?}", name, value)),
    }
}

struct ChunkHeaders<'a> {
    session_id: &'a str,
    upload_id: &'a str,
    filename: &'a str,
    file_size: u64,
    chunk_size: u64,
    chunk_offset: u64,
    chunks_total: u64,
}

impl<'a> ChunkHeaders<'a> {
    fn parse(map: &'a http::HeaderMap) -> UploadResult<Self> {
        let this = Self {
            session_id: header(map, headers::UPLOAD_SESSION)?,
            upload_id: header(map, headers::UPLOAD_ID)?,
            filename: header(map, headers::FILENAME)?,
            file_size: numeric_header(map, headers::FILE_SIZE)?,
            chunk_size: numeric_header(map, headers::CHUNK_SIZE)?,
            chunk_offset: numeric_header(map, headers::CHUNK_OFFSET)?,
            chunks_total: numeric_header(map, headers::CHUNKS_TOTAL)?,
        };
        if this.chunk_offset >= this.chunks_total {
            return Err(upload_error!(
                InvalidChunkField,
                "chunkoffset {} is not below chunkstotal {}",
                this.chunk_offset,
                this.chunks_total
            ));
        }
        Ok(this)
    }
}

impl ChunkedUploads {
    #[must_use]
    pub fn builder(sessions: Arc<dyn SessionStore>) -> ChunkedUploadsBuilder {
        ChunkedUploadsBuilder::new(sessions)
    }

    #[must_use]
    pub fn config(&self) -> &ChunkedConfig {
        &self.config
    }

    #[must_use]
    pub fn parser(&self) -> &FormParser {
        &self.parser
    }

    /// Starts a chunked upload for `owner`.
    ///
    /// # Errors
    /// + `Unauthenticated` without an owner
    /// + `AdmissionDenied` if the owner has too many uploads in progress
    /// + `Session` if the session store or ticket service fails
    pub async fn initialize(&self, owner: Option<&Identity>) -> UploadResult<InitializedUpload> {
        let Some(owner) = owner else {
            return Err(upload_error!(Unauthenticated, "initializing an upload requires an identity"));
        };

        let ticket = match &self.admission {
            Some(admission) => Some(admission.acquire(owner).await?),
            None => None,
        };

        let session_id = Uuid::new_v4().simple().to_string();
        let record = UploadSessionRecord {
            upload_id: Uuid::new_v4().simple().to_string(),
            file_uuid: Uuid::new_v4(),
            owner: owner.id().to_owned(),
            ticket,
            created_at: unix_now(),
        };

        if let Err(err) = self.store_record(&session_id, &record).await {
            if let (Some(admission), Some(ticket)) = (&self.admission, &record.ticket)
                && let Err(e) = admission.release(ticket).await
            {
                warn!(error = %e, "failed to release ticket of an aborted upload");
            }
            return Err(err);
        }

        debug!(owner = %owner, session = %session_id, upload_id = %record.upload_id, "initialized chunked upload");
        Ok(InitializedUpload {
            session_id,
            upload_id: record.upload_id,
        })
    }

    async fn store_record(&self, session_id: &str, record: &UploadSessionRecord) -> UploadResult {
        let value = serde_json::to_vec(record).map_err(|e| upload_error!(e, Session, "encoding upload session"))?;
        let key = self.config.session_key.as_str();
        self.sessions
            .put(session_id, key, Bytes::from(value))
            .await
            .map_err(|e| session_failure(e, "put"))?;
        self.sessions
            .set_expiry(session_id, self.config.session_max_age())
            .await
            .map_err(|e| session_failure(e, "set_expiry"))?;
        Ok(())
    }

    async fn load_record(&self, session_id: &str) -> UploadResult<UploadSessionRecord> {
        let value = self
            .sessions
            .get(session_id, &self.config.session_key)
            .await
            .map_err(|e| session_failure(e, "get"))?;
        let Some(value) = value else {
            warn!(session = %session_id, "upload session not found");
            return Err(upload_error!(SessionNotFound, "upload session is absent or expired"));
        };
        serde_json::from_slice(&value).map_err(|e| {
            error!(session = %session_id, error = %e, "corrupt upload session");
            upload_error!(e, Session, "decoding upload session")
        })
    }

    /// Checks one chunk against its upload session and stores it.
    ///
    /// `form` must contain one single-file field; it receives the chunk.
    ///
    /// # Errors
    /// Chunk and session failures are raised before the body is read, so they
    /// never reach storage. Parse failures carry the ledger of the request.
    pub async fn receive_chunk<B>(
        &self,
        form: &Form,
        owner: Option<&Identity>,
        req: http::Request<B>,
        cx: UploadContext,
    ) -> Result<ChunkReceipt, Rejection>
    where
        B: http_body::Body<Data = Bytes> + Send,
        B::Error: Into<StdError>,
    {
        if !form.fields().iter().any(|f| f.mode() == FieldMode::File) {
            error!("chunk form without a single-file field");
            return Err(upload_error!(Misconfigured, "chunk form needs a single-file field").into());
        }
        // chunks of one upload share a file uuid, so only the offset tells them apart
        if let Some(field) = form
            .fields()
            .iter()
            .find(|f| f.mode().is_file() && !f.chunk_template().contains("{chunkoffset}"))
        {
            error!(field = field.name(), template = field.chunk_template(), "chunk path template without {{chunkoffset}}");
            return Err(upload_error!(
                Misconfigured,
                "path template of field {:?} must contain {{chunkoffset}}",
                field.name()
            )
            .into());
        }
        let Some(owner) = owner else {
            return Err(upload_error!(Unauthenticated, "uploading a chunk requires an identity").into());
        };

        let (chunk, ticket) = {
            let h = ChunkHeaders::parse(req.headers())?;
            let record = self.load_record(h.session_id).await?;
            if record.owner != owner.id() {
                warn!(session = %h.session_id, owner = %owner, "upload session belongs to another identity");
                return Err(upload_error!(Unauthenticated, "upload session belongs to another identity").into());
            }
            if record.upload_id != h.upload_id {
                warn!(session = %h.session_id, upload_id = %h.upload_id, "upload id mismatch");
                return Err(upload_error!(UploadIdMismatch, "upload id does not match the upload session").into());
            }
            (
                ChunkInfo {
                    upload_id: record.upload_id,
                    filename: h.filename.to_owned(),
                    file_size: h.file_size,
                    chunk_size: h.chunk_size,
                    chunk_offset: h.chunk_offset,
                    chunks_total: h.chunks_total,
                    file_uuid: record.file_uuid,
                },
                record.ticket,
            )
        };

        let cx = cx.with_uploader(owner.id()).with_chunk(chunk.clone());
        let result = self.parser.parse(form, req, &cx).await?;

        debug!(
            upload_id = %chunk.upload_id,
            offset = chunk.chunk_offset,
            total = chunk.chunks_total,
            "stored chunk"
        );

        if chunk.is_last()
            && let (Some(admission), Some(ticket)) = (&self.admission, &ticket)
            && let Err(e) = admission.release(ticket).await
        {
            warn!(upload_id = %chunk.upload_id, error = %e, "failed to release admission ticket");
        }

        Ok(ChunkReceipt { chunk, result })
    }
}
