//! Streaming multipart uploads
//!
//! `formup` accepts files submitted as `multipart/form-data` request bodies,
//! validates each part against a declared [`Form`](form::Form), and streams
//! file parts to a pluggable [`Storage`](storage::Storage) backend under strict
//! size limits. Large files can be split into chunks sent by independent
//! requests, with concurrent uploads bounded per identity.
//!
//! # Architecture
//!
//! - [`form`]: immutable form templates, fields and validators
//! - [`parser`]: the multipart parsing engine
//! - [`ledger`]: rollback of partial writes when a request fails late
//! - [`storage`]: the storage callback contract and an in-memory backend
//! - [`chunked`]: the chunked upload coordinator
//! - [`admission`]: per-identity admission control
//! - [`session`]: identity and session store interfaces
//! - [`config`]: parser and coordinator configuration
//! - [`encode`]: a multipart body encoder for clients and tests
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use formup::{FormParser, StdError};
//! use formup::encode::FormBody;
//! use formup::form::{Field, Form};
//! use formup::storage::{MemoryStorage, UploadContext};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let storage = Arc::new(MemoryStorage::new());
//! let form = Form::new([
//!     Field::scalar("title", 64).required(),
//!     Field::file("avatar", 1024, storage.clone()).allow("image/png"),
//! ]);
//!
//! let mut body = FormBody::with_boundary("b0undary");
//! body.text("title", "hello");
//! let content_type = body.content_type();
//! let body = futures::stream::iter([Ok::<_, StdError>(body.finish())]);
//!
//! let parser = FormParser::default();
//! let parsed = parser
//!     .parse_stream(&form, Some(content_type.as_str()), body, &UploadContext::new())
//!     .await
//!     .unwrap();
//! assert_eq!(parsed.form.get("title").unwrap().unwrap(), "hello");
//! assert!(parsed.form.files("avatar").is_empty());
//! # }
//! ```
//!
//! # Failures
//!
//! A failed parse returns a [`Rejection`]. After a storage failure or
//! cancellation the stored files are already deleted. After any other failure
//! they are still in their backends. Call [`Rejection::rollback`] to delete
//! them, then answer with [`UploadError::status_code`].
//!
//! # Security
//!
//! Limits are enforced per field and per part. Total body size, request rate and
//! timeouts are left to the HTTP layer.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::bool_assert_comparison,  // I don't like `assert!(!expression)`. It's very misleading.
    clippy::multiple_crate_versions, // Sometimes not fixable
    clippy::module_name_repetitions,
    clippy::single_match_else,
    clippy::wildcard_imports,
    clippy::needless_continue,
)]

mod utils;

#[macro_use]
mod error;

pub mod admission;
pub mod chunked;
pub mod config;
pub mod encode;
pub mod form;
pub mod http;
pub mod ledger;
pub mod object;
pub mod parser;
pub mod session;
pub mod storage;

pub use self::error::*;
pub use self::http::{MultipartError, PartHeaders};
pub use self::ledger::CancellationLedger;
pub use self::object::{ChunkInfo, Object};
pub use self::parser::{FormParser, ParseResult, Rejection};
pub use self::utils::sniff::sniff as sniff_content_type;
