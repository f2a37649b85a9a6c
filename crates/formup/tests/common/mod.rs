#![allow(dead_code)]

use formup::StdError;

use std::sync::Once;

use bytes::Bytes;
use futures::Stream;

pub fn setup_tracing() {
    use tracing_subscriber::EnvFilter;

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

/// Splits a body into reads of `size` bytes.
pub fn chunked_body(body: Bytes, size: usize) -> impl Stream<Item = Result<Bytes, StdError>> + Send + 'static {
    let mut chunks = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        let n = size.min(rest.len());
        chunks.push(Ok(rest.split_to(n)));
    }
    futures::stream::iter(chunks)
}

/// A PNG signature padded to `len` bytes.
pub fn png(len: usize) -> Vec<u8> {
    let mut v = b"\x89PNG\r\n\x1a\n".to_vec();
    v.resize(len.max(v.len()), 0);
    v
}
