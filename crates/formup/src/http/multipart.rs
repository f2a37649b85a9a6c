//! Streaming multipart reader
//!
//! See <https://www.rfc-editor.org/rfc/rfc2046#section-5.1> and
//! <https://www.rfc-editor.org/rfc/rfc7578>.
//!
//! [`MultipartReader`] pulls bytes from a [`ByteSource`] on demand and never holds
//! more than one part's header block, one transport chunk and a partial delimiter
//! in memory. The body of a `multipart/mixed` part is itself a [`ByteSource`], so
//! nested parts are read through the outer reader without buffering.

use crate::config::ParserConfig;
use crate::error::StdError;
use crate::utils::lock;

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use memchr::memchr_iter;
use tokio_util::sync::CancellationToken;

/// Number of header lines accepted per part.
const MAX_PART_HEADERS: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum MultipartError {
    #[error("MultipartError: Underlying: {0}")]
    Underlying(StdError),
    #[error("MultipartError: InvalidFormat")]
    InvalidFormat,
    #[error("MultipartError: Incomplete")]
    Incomplete,
    #[error("MultipartError: HeaderTooLarge: header block of {0} bytes exceeds limit of {1} bytes")]
    HeaderTooLarge(usize, usize),
    #[error("MultipartError: BoundaryBufferTooLarge: size {0} exceeds limit {1}")]
    BoundaryBufferTooLarge(usize, usize),
    #[error("MultipartError: TooManyParts: part count {0} exceeds limit of {1}")]
    TooManyParts(usize, usize),
    #[error("MultipartError: Cancelled")]
    Cancelled,
}

/// A pull-based source of body bytes.
pub(crate) trait ByteSource: Send {
    /// Returns `None` once the source is exhausted.
    fn next_bytes(&mut self) -> impl Future<Output = Option<Result<Bytes, MultipartError>>> + Send;
}

/// Request body adapter that stops as soon as the request is cancelled.
pub(crate) struct BodySource<S> {
    body: Pin<Box<S>>,
    cancel: CancellationToken,
}

impl<S> BodySource<S>
where
    S: Stream<Item = Result<Bytes, StdError>> + Send,
{
    pub(crate) fn new(body: S, cancel: CancellationToken) -> Self {
        Self {
            body: Box::pin(body),
            cancel,
        }
    }
}

impl<S> ByteSource for BodySource<S>
where
    S: Stream<Item = Result<Bytes, StdError>> + Send,
{
    async fn next_bytes(&mut self) -> Option<Result<Bytes, MultipartError>> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Some(Err(MultipartError::Cancelled)),
            item = self.body.next() => item.map(|r| r.map_err(MultipartError::Underlying)),
        }
    }
}

/// The body of the current part of an outer reader.
pub(crate) struct PartSource<'a, R> {
    outer: &'a mut MultipartReader<R>,
}

impl<R: ByteSource> ByteSource for PartSource<'_, R> {
    async fn next_bytes(&mut self) -> Option<Result<Bytes, MultipartError>> {
        self.outer.read_chunk().await.transpose()
    }
}

/// Headers of one part
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PartHeaders {
    /// `name` parameter of `Content-Disposition`
    pub name: Option<String>,
    /// `filename` parameter of `Content-Disposition`
    pub filename: Option<String>,
    /// declared `Content-Type`
    pub content_type: Option<String>,
}

impl PartHeaders {
    fn from_raw(headers: &[httparse::Header<'_>]) -> Result<Self, MultipartError> {
        let mut ans = Self::default();
        for header in headers {
            if header.name.eq_ignore_ascii_case("Content-Disposition") {
                let cd = parse_content_disposition(header.value)?;
                ans.name = cd.name.map(str::to_owned);
                ans.filename = cd.filename.map(str::to_owned);
            } else if header.name.eq_ignore_ascii_case("Content-Type") {
                let value = std::str::from_utf8(header.value).map_err(|_| MultipartError::InvalidFormat)?;
                ans.content_type = Some(value.trim().to_owned());
            }
        }
        Ok(ans)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the first boundary; bytes here are preamble.
    Preamble,
    /// Just after a `--boundary`.
    Boundary,
    /// Inside a part body.
    Body,
    /// After the close delimiter.
    Done,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    max_parts: usize,
    max_header_size: usize,
    max_boundary_buffer: usize,
}

enum Search {
    /// The delimiter starts at this offset.
    Found(usize),
    /// The bytes from this offset are a prefix of the delimiter.
    Partial(usize),
    NotFound,
}

/// Streaming reader over one multipart body
pub(crate) struct MultipartReader<R> {
    source: R,
    buf: BytesMut,
    /// `--{boundary}`
    dash_boundary: Box<[u8]>,
    /// `\r\n--{boundary}`
    delimiter: Box<[u8]>,
    state: State,
    /// Bytes handed back by a consumer, returned before `buf`.
    pending: Option<Bytes>,
    parts: usize,
    limits: Limits,
}

impl<R: ByteSource> MultipartReader<R> {
    pub(crate) fn new(source: R, boundary: &[u8], config: &ParserConfig) -> Self {
        let limits = Limits {
            max_parts: config.max_parts,
            max_header_size: config.max_header_size,
            max_boundary_buffer: config.max_boundary_buffer,
        };
        Self::with_limits(source, boundary, limits)
    }

    fn with_limits(source: R, boundary: &[u8], limits: Limits) -> Self {
        let dash_boundary: Box<[u8]> = {
            let mut v = Vec::with_capacity(boundary.len().saturating_add(2));
            v.extend_from_slice(b"--");
            v.extend_from_slice(boundary);
            v.into()
        };
        let delimiter: Box<[u8]> = {
            let mut v = Vec::with_capacity(boundary.len().saturating_add(4));
            v.extend_from_slice(b"\r\n--");
            v.extend_from_slice(boundary);
            v.into()
        };
        Self {
            source,
            buf: BytesMut::new(),
            dash_boundary,
            delimiter,
            state: State::Preamble,
            pending: None,
            parts: 0,
            limits,
        }
    }

    /// Number of parts read so far
    pub(crate) fn parts(&self) -> usize {
        self.parts
    }

    /// Counts parts read by a nested reader against this reader's limit.
    pub(crate) fn add_parts(&mut self, n: usize) {
        self.parts = self.parts.saturating_add(n);
    }

    /// Reads the body of the current part as a nested multipart body.
    pub(crate) fn nested(&mut self, boundary: &[u8]) -> MultipartReader<PartSource<'_, R>> {
        let limits = Limits {
            max_parts: self.limits.max_parts.saturating_sub(self.parts),
            ..self.limits
        };
        MultipartReader::with_limits(PartSource { outer: self }, boundary, limits)
    }

    /// Appends the next chunk of the source to `buf`.
    /// Returns `false` if the source is exhausted.
    async fn fill(&mut self) -> Result<bool, MultipartError> {
        match self.source.next_bytes().await {
            None => Ok(false),
            Some(Err(e)) => Err(e),
            Some(Ok(bytes)) => {
                self.buf.extend_from_slice(&bytes);
                Ok(true)
            }
        }
    }

    async fn fill_to(&mut self, n: usize) -> Result<(), MultipartError> {
        while self.buf.len() < n {
            if !self.fill().await? {
                return Err(MultipartError::Incomplete);
            }
        }
        Ok(())
    }

    /// Advances to the next part and returns its headers.
    ///
    /// The unread body of the current part is discarded. Returns `None` after
    /// the close delimiter.
    pub(crate) async fn next_part(&mut self) -> Result<Option<PartHeaders>, MultipartError> {
        match self.state {
            State::Done => return Ok(None),
            State::Preamble => self.skip_preamble().await?,
            State::Body => while self.read_chunk().await?.is_some() {},
            State::Boundary => {}
        }
        self.pending = None;

        self.fill_to(2).await?;
        if self.buf.starts_with(b"--") {
            self.state = State::Done;
            self.buf.clear();
            return Ok(None);
        }

        // transport padding
        loop {
            self.fill_to(1).await?;
            match self.buf.first() {
                Some(b' ' | b'\t') => self.buf.advance(1),
                _ => break,
            }
        }
        self.fill_to(2).await?;
        if !self.buf.starts_with(b"\r\n") {
            return Err(MultipartError::InvalidFormat);
        }
        self.buf.advance(2);

        self.parts = self.parts.saturating_add(1);
        if self.parts > self.limits.max_parts {
            return Err(MultipartError::TooManyParts(self.parts, self.limits.max_parts));
        }

        let headers = self.read_headers().await?;
        self.state = State::Body;
        Ok(Some(headers))
    }

    async fn skip_preamble(&mut self) -> Result<(), MultipartError> {
        loop {
            if self.buf.starts_with(&self.dash_boundary) {
                self.buf.advance(self.dash_boundary.len());
                break;
            }
            if self.buf.len() < self.dash_boundary.len() && self.dash_boundary.starts_with(&self.buf) {
                if !self.fill().await? {
                    return Err(MultipartError::Incomplete);
                }
                continue;
            }
            match search(&self.buf, &self.delimiter) {
                Search::Found(idx) => {
                    self.buf.advance(idx.saturating_add(self.delimiter.len()));
                    break;
                }
                Search::Partial(idx) => self.buf.advance(idx),
                Search::NotFound => self.buf.clear(),
            }
            if !self.fill().await? {
                return Err(MultipartError::Incomplete);
            }
        }
        self.state = State::Boundary;
        Ok(())
    }

    async fn read_headers(&mut self) -> Result<PartHeaders, MultipartError> {
        let max = self.limits.max_header_size;
        loop {
            let mut headers = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];
            let parsed = match httparse::parse_headers(&self.buf, &mut headers) {
                Ok(httparse::Status::Complete((idx, raw))) => Some((idx, PartHeaders::from_raw(raw)?)),
                Ok(httparse::Status::Partial) => None,
                Err(_) => return Err(MultipartError::InvalidFormat),
            };
            match parsed {
                Some((idx, _)) if idx > max => return Err(MultipartError::HeaderTooLarge(idx, max)),
                Some((idx, ans)) => {
                    self.buf.advance(idx);
                    return Ok(ans);
                }
                None => {
                    if self.buf.len() > max {
                        return Err(MultipartError::HeaderTooLarge(self.buf.len(), max));
                    }
                    if !self.fill().await? {
                        return Err(MultipartError::Incomplete);
                    }
                }
            }
        }
    }

    /// Reads the next chunk of the current part body.
    ///
    /// Returns `None` at the end of the part. A source that ends inside a part
    /// is an `Incomplete` error.
    pub(crate) async fn read_chunk(&mut self) -> Result<Option<Bytes>, MultipartError> {
        if let Some(bytes) = self.pending.take() {
            return Ok(Some(bytes));
        }
        if self.state != State::Body {
            return Ok(None);
        }
        loop {
            if self.buf.is_empty() {
                if !self.fill().await? {
                    return Err(MultipartError::Incomplete);
                }
                continue;
            }
            match search(&self.buf, &self.delimiter) {
                Search::Found(idx) => {
                    let data = self.buf.split_to(idx).freeze();
                    self.buf.advance(self.delimiter.len());
                    self.state = State::Boundary;
                    return Ok(if data.is_empty() { None } else { Some(data) });
                }
                Search::Partial(idx) if idx > 0 => {
                    return Ok(Some(self.buf.split_to(idx).freeze()));
                }
                Search::Partial(_) => {
                    let max = self.limits.max_boundary_buffer;
                    if self.buf.len() > max {
                        return Err(MultipartError::BoundaryBufferTooLarge(self.buf.len(), max));
                    }
                    if !self.fill().await? {
                        return Err(MultipartError::Incomplete);
                    }
                }
                Search::NotFound => return Ok(Some(self.buf.split().freeze())),
            }
        }
    }

    /// Hands bytes back; the next [`read_chunk`](Self::read_chunk) returns them first.
    pub(crate) fn unread(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.pending = Some(match self.pending.take() {
            None => bytes,
            Some(prev) => {
                let mut joined = BytesMut::with_capacity(bytes.len().saturating_add(prev.len()));
                joined.extend_from_slice(&bytes);
                joined.extend_from_slice(&prev);
                joined.freeze()
            }
        });
    }

    /// Returns up to `n` leading bytes of the current part without consuming them.
    pub(crate) async fn peek(&mut self, n: usize) -> Result<Bytes, MultipartError> {
        let mut head = BytesMut::new();
        while head.len() < n {
            match self.read_chunk().await? {
                Some(bytes) if head.is_empty() && bytes.len() >= n => {
                    self.unread(bytes.clone());
                    return Ok(bytes.slice(..n));
                }
                Some(bytes) => head.extend_from_slice(&bytes),
                None => break,
            }
        }
        let head = head.freeze();
        self.unread(head.clone());
        Ok(head.slice(..n.min(head.len())))
    }

    /// Buffers the rest of the current part.
    ///
    /// Returns `Err(len)` with the number of bytes seen once the part exceeds `limit`.
    pub(crate) async fn read_to_end(&mut self, limit: u64) -> Result<Result<Bytes, u64>, MultipartError> {
        let mut value = BytesMut::new();
        while let Some(bytes) = self.read_chunk().await? {
            let len = (value.len() as u64).saturating_add(bytes.len() as u64);
            if len > limit {
                return Ok(Err(len));
            }
            value.extend_from_slice(&bytes);
        }
        Ok(Ok(value.freeze()))
    }
}

/// Search for the delimiter; a delimiter may span two chunks, so a partial match at
/// the tail is reported separately.
fn search(buf: &[u8], delimiter: &[u8]) -> Search {
    for idx in memchr_iter(b'\r', buf) {
        #[allow(clippy::indexing_slicing)]
        let remaining = &buf[idx..];

        if remaining.len() >= delimiter.len() {
            if remaining.starts_with(delimiter) {
                return Search::Found(idx);
            }
            continue;
        }

        if delimiter.starts_with(remaining) {
            return Search::Partial(idx);
        }
    }
    Search::NotFound
}

/// Progress of a [`limited`] body stream
#[derive(Debug, Default)]
pub(crate) struct Tap {
    delivered: AtomicU64,
    fault: Mutex<Option<MultipartError>>,
}

impl Tap {
    /// Bytes handed to the consumer
    pub(crate) fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// The reader error that ended the stream, if any
    pub(crate) fn take_fault(&self) -> Option<MultipartError> {
        lock(&self.fault).take()
    }
}

/// The current part body as a stream of at most `limit` bytes.
///
/// Bytes past the limit are handed back to the reader, so an overflow is visible
/// to the next [`MultipartReader::read_chunk`]. Reader errors end the stream and
/// are recorded in `tap`.
pub(crate) fn limited<'a, R: ByteSource>(
    reader: &'a mut MultipartReader<R>,
    limit: u64,
    tap: &'a Tap,
) -> impl Stream<Item = Result<Bytes, StdError>> + Send + 'a {
    stream::unfold((reader, limit), move |(reader, remaining)| async move {
        if remaining == 0 {
            return None;
        }
        match reader.read_chunk().await {
            Ok(None) => None,
            Ok(Some(mut bytes)) => {
                if bytes.len() as u64 > remaining {
                    let cut = usize::try_from(remaining).unwrap_or(usize::MAX);
                    let rest = bytes.split_off(cut);
                    reader.unread(rest);
                }
                let len = bytes.len() as u64;
                tap.delivered.fetch_add(len, Ordering::Relaxed);
                Some((Ok(bytes), (reader, remaining.saturating_sub(len))))
            }
            Err(e) => {
                let kind = match e {
                    MultipartError::Cancelled => std::io::ErrorKind::Interrupted,
                    _ => std::io::ErrorKind::InvalidData,
                };
                let err: StdError = Box::new(std::io::Error::new(kind, e.to_string()));
                *lock(&tap.fault) = Some(e);
                Some((Err(err), (reader, 0)))
            }
        }
    })
}

/// Content-Disposition
#[derive(Debug)]
struct ContentDisposition<'a> {
    /// name
    name: Option<&'a str>,
    /// filename
    filename: Option<&'a str>,
}

/// RFC 2045 token character
fn is_token(c: u8) -> bool {
    c.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&c)
}

/// `; key=value` where the value is a token or a quoted string
fn disposition_param(input: &[u8]) -> nom::IResult<&[u8], (&[u8], &[u8])> {
    use nom::Parser;
    use nom::branch::alt;
    use nom::bytes::complete::{tag, take_till, take_while1};
    use nom::character::complete::space0;
    use nom::sequence::{delimited, preceded, separated_pair};

    let value = alt((
        delimited(tag(&b"\""[..]), take_till(|c: u8| c == b'"'), tag(&b"\""[..])),
        take_while1(is_token),
    ));

    preceded(
        (space0, tag(&b";"[..]), space0),
        separated_pair(take_while1(is_token), (space0, tag(&b"="[..]), space0), value),
    )
    .parse(input)
}

/// parse content disposition value
fn parse_content_disposition(input: &[u8]) -> Result<ContentDisposition<'_>, MultipartError> {
    use nom::Parser;
    use nom::bytes::complete::take_while1;
    use nom::character::complete::space0;
    use nom::combinator::all_consuming;
    use nom::multi::many0;

    let mut parse = all_consuming((space0, take_while1(is_token), many0(disposition_param), space0));
    let (_, (_, kind, params, _)) = parse
        .parse(input)
        .map_err(|_: nom::Err<nom::error::Error<&[u8]>>| MultipartError::InvalidFormat)?;

    let as_str = |b| std::str::from_utf8(b).map_err(|_| MultipartError::InvalidFormat);

    let kind = as_str(kind)?;
    if !["form-data", "file", "attachment", "inline"]
        .iter()
        .any(|k| k.eq_ignore_ascii_case(kind))
    {
        return Err(MultipartError::InvalidFormat);
    }

    let mut ans = ContentDisposition {
        name: None,
        filename: None,
    };
    for (key, value) in params {
        if key.eq_ignore_ascii_case(b"name") {
            ans.name = Some(as_str(value)?);
        } else if key.eq_ignore_ascii_case(b"filename") {
            ans.filename = Some(as_str(value)?);
        }
    }
    Ok(ans)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::slice;

    fn reader_from(chunks: Vec<Bytes>, boundary: &str) -> MultipartReader<BodySource<impl Stream<Item = Result<Bytes, StdError>>>> {
        let body = futures::stream::iter(chunks.into_iter().map(Ok::<_, StdError>));
        let source = BodySource::new(body, CancellationToken::new());
        MultipartReader::new(source, boundary.as_bytes(), &ParserConfig::default())
    }

    fn byte_by_byte(body: &[u8]) -> Vec<Bytes> {
        body.iter().map(|b| Bytes::copy_from_slice(slice::from_ref(b))).collect()
    }

    async fn read_part<R: ByteSource>(reader: &mut MultipartReader<R>) -> Bytes {
        reader.read_to_end(u64::MAX).await.unwrap().unwrap()
    }

    #[test]
    fn content_disposition() {
        {
            let text = b"form-data; name=\"Signature\"";
            let ans = parse_content_disposition(text).unwrap();
            assert_eq!(ans.name, Some("Signature"));
            assert_eq!(ans.filename, None);
        }
        {
            let text = b"form-data; filename=\"My Filename.jpg\";name=file";
            let ans = parse_content_disposition(text).unwrap();
            assert_eq!(ans.name, Some("file"));
            assert_eq!(ans.filename, Some("My Filename.jpg"));
        }
        {
            let text = b"file; filename=\"\"";
            let ans = parse_content_disposition(text).unwrap();
            assert_eq!(ans.name, None);
            assert_eq!(ans.filename, Some(""));
        }
        {
            assert!(parse_content_disposition(b"bogus; name=\"a\"").is_err());
            assert!(parse_content_disposition(b"form-data; name=\"a").is_err());
        }
    }

    #[tokio::test]
    async fn parts_and_values() {
        let body = concat!(
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"title\"\r\n",
            "\r\n",
            "hello\r\n",
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "\r\n line one\r\n--\r\n\r\n",
            "\r\n--XyZ--\r\n",
        );

        let mut reader = reader_from(vec![Bytes::from_static(body.as_bytes())], "XyZ");

        let headers = reader.next_part().await.unwrap().unwrap();
        assert_eq!(headers.name.as_deref(), Some("title"));
        assert_eq!(headers.filename, None);
        assert_eq!(read_part(&mut reader).await, "hello");

        let headers = reader.next_part().await.unwrap().unwrap();
        assert_eq!(headers.name.as_deref(), Some("doc"));
        assert_eq!(headers.filename.as_deref(), Some("a.txt"));
        assert_eq!(headers.content_type.as_deref(), Some("text/plain"));
        assert_eq!(read_part(&mut reader).await, "\r\n line one\r\n--\r\n\r\n");

        assert!(reader.next_part().await.unwrap().is_none());
        assert!(reader.next_part().await.unwrap().is_none());
        assert_eq!(reader.parts(), 2);
    }

    #[tokio::test]
    async fn delimiter_split_across_reads() {
        let file_content = "\r\n too much crlf \r\n--\r\n\r\n\r\n";
        let body = format!(
            "preamble\r\n--an-invalid-\r\n--boundary--\r\n\r\n{file_content}\r\n--an-invalid-\r\n--boundary----dropped-data"
        );
        let mut reader = reader_from(byte_by_byte(body.as_bytes()), "an-invalid-\r\n--boundary--");

        let headers = reader.next_part().await.unwrap().unwrap();
        assert_eq!(headers, PartHeaders::default());
        assert_eq!(read_part(&mut reader).await, file_content);
        assert!(reader.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn preamble_and_padding() {
        let body = b"This is the preamble.\r\n--b  \r\nContent-Disposition: form-data; name=\"x\"\r\n\r\n1\r\n--b--";
        let mut reader = reader_from(vec![Bytes::from_static(body)], "b");
        let headers = reader.next_part().await.unwrap().unwrap();
        assert_eq!(headers.name.as_deref(), Some("x"));
        assert_eq!(read_part(&mut reader).await, "1");
        assert!(reader.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn skipping_unread_body() {
        let body = b"--b\r\n\r\nskipped body\r\n--b\r\nContent-Disposition: form-data; name=\"y\"\r\n\r\nkept\r\n--b--\r\n";
        let mut reader = reader_from(byte_by_byte(body), "b");
        reader.next_part().await.unwrap().unwrap();
        let headers = reader.next_part().await.unwrap().unwrap();
        assert_eq!(headers.name.as_deref(), Some("y"));
        assert_eq!(read_part(&mut reader).await, "kept");
    }

    #[tokio::test]
    async fn peek_and_limited() {
        let body = b"--b\r\n\r\n0123456789\r\n--b--\r\n";
        let mut reader = reader_from(byte_by_byte(body), "b");
        reader.next_part().await.unwrap().unwrap();

        assert_eq!(reader.peek(4).await.unwrap(), "0123");

        let tap = Tap::default();
        let chunks: Vec<_> = limited(&mut reader, 6, &tap).collect().await;
        let taken: Vec<u8> = chunks.into_iter().flat_map(|c| c.unwrap().to_vec()).collect();
        assert_eq!(taken, b"012345");
        assert_eq!(tap.delivered(), 6);
        assert!(tap.take_fault().is_none());

        assert_eq!(read_part(&mut reader).await, "6789");
    }

    #[tokio::test]
    async fn nested_mixed() {
        let body = concat!(
            "--outer\r\n",
            "Content-Disposition: form-data; name=\"files\"\r\n",
            "Content-Type: multipart/mixed; boundary=inner\r\n",
            "\r\n",
            "--inner\r\n",
            "Content-Disposition: file; filename=\"a.txt\"\r\n",
            "\r\n",
            "AAA\r\n",
            "--inner\r\n",
            "Content-Disposition: file; filename=\"b.txt\"\r\n",
            "\r\n",
            "BBB\r\n",
            "--inner--\r\n",
            "--outer--\r\n",
        );
        let mut reader = reader_from(byte_by_byte(body.as_bytes()), "outer");
        reader.next_part().await.unwrap().unwrap();

        let mut names = Vec::new();
        let count = {
            let mut inner = reader.nested(b"inner");
            while let Some(headers) = inner.next_part().await.unwrap() {
                let content = read_part(&mut inner).await;
                names.push((headers.filename.unwrap(), content));
            }
            inner.parts()
        };
        reader.add_parts(count);

        assert_eq!(names, [("a.txt".to_owned(), Bytes::from("AAA")), ("b.txt".to_owned(), Bytes::from("BBB"))]);
        assert_eq!(reader.parts(), 3);
        assert!(reader.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn incomplete_body() {
        let body = b"--b\r\n\r\nno end";
        let mut reader = reader_from(vec![Bytes::from_static(body)], "b");
        reader.next_part().await.unwrap().unwrap();
        assert!(matches!(reader.read_chunk().await, Ok(Some(_))));
        assert!(matches!(reader.read_chunk().await, Err(MultipartError::Incomplete)));
    }

    #[tokio::test]
    async fn invalid_after_boundary() {
        let body = b"--bX\r\n\r\n";
        let mut reader = reader_from(vec![Bytes::from_static(body)], "b");
        assert!(matches!(reader.next_part().await, Err(MultipartError::InvalidFormat)));
    }

    #[tokio::test]
    async fn test_too_many_parts() {
        let boundary = "boundary123";
        let max_parts = ParserConfig::default().max_parts;

        let mut body_bytes = Vec::new();
        for i in 0..=max_parts {
            body_bytes.push(Bytes::from(format!("--{boundary}\r\n")));
            body_bytes.push(Bytes::from(format!("Content-Disposition: form-data; name=\"field{i}\"\r\n\r\n")));
            body_bytes.push(Bytes::from("value\r\n"));
        }
        body_bytes.push(Bytes::from(format!("--{boundary}--\r\n")));

        let mut reader = reader_from(body_bytes, boundary);
        let result = loop {
            match reader.next_part().await {
                Ok(Some(_)) => continue,
                other => break other,
            }
        };
        match result {
            Err(MultipartError::TooManyParts(count, limit)) => {
                assert_eq!(limit, max_parts);
                assert!(count > max_parts);
            }
            _ => panic!("Expected TooManyParts error"),
        }
    }

    #[tokio::test]
    async fn test_header_too_large() {
        let long = "x".repeat(ParserConfig::default().max_header_size + 1);
        let body_bytes = vec![
            Bytes::from("--b\r\n"),
            Bytes::from(format!("X-Long: {long}\r\n")),
            Bytes::from("\r\n\r\n--b--"),
        ];
        let mut reader = reader_from(body_bytes, "b");
        assert!(matches!(reader.next_part().await, Err(MultipartError::HeaderTooLarge(..))));
    }

    #[tokio::test]
    async fn cancelled_source() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let body = futures::stream::iter(vec![Ok::<_, StdError>(Bytes::from_static(b"--b\r\n"))]);
        let source = BodySource::new(body, cancel);
        let mut reader = MultipartReader::new(source, b"b", &ParserConfig::default());
        assert!(matches!(reader.next_part().await, Err(MultipartError::Cancelled)));
    }
}
