mod common;

use common::*;

use formup::chunked::{ChunkedUploads, InitializedUpload};
use formup::config::ChunkedConfig;
use formup::encode::FormBody;
use formup::form::{Field, Form};
use formup::session::{Identity, MemorySessionStore};
use formup::storage::{MemoryStorage, UploadContext};
use formup::{ChunkInfo, UploadErrorCode};

use std::sync::Arc;
use std::time::Duration;

use http::header::CONTENT_TYPE;
use http_body_util::Full;

struct Fixture {
    storage: Arc<MemoryStorage>,
    uploads: ChunkedUploads,
    form: Form,
}

fn fixture(config: ChunkedConfig) -> Fixture {
    setup_tracing();
    let storage = Arc::new(MemoryStorage::new());
    let form = Form::new([Field::file("chunk", 64, storage.clone())
        .required()
        .path_template("{uploaderid}/{fileuuid}/{chunkoffset}-of-{chunkstotal}")]);
    let uploads = {
        let mut b = ChunkedUploads::builder(Arc::new(MemorySessionStore::new()));
        b.set_config(config);
        b.build().unwrap()
    };
    Fixture { storage, uploads, form }
}

fn chunk_request(init: &InitializedUpload, upload_id: &str, offset: u64, total: u64, content: &str) -> http::Request<Full<bytes::Bytes>> {
    let mut body = FormBody::new();
    body.file("chunk", "blob", Some("application/octet-stream"), content);
    http::Request::builder()
        .header(CONTENT_TYPE, body.content_type())
        .header("uploadsession", init.session_id.as_str())
        .header("uploadid", upload_id)
        .header("filename", "movie.mp4")
        .header("filesize", (total * 4).to_string())
        .header("chunksize", "4")
        .header("chunkoffset", offset.to_string())
        .header("chunkstotal", total.to_string())
        .body(Full::new(body.finish()))
        .unwrap()
}

#[tokio::test]
async fn chunks_share_file_uuid() {
    let f = fixture(ChunkedConfig::default());
    let alice = Identity::new("alice");

    let init = f.uploads.initialize(Some(&alice)).await.unwrap();
    assert!(!init.upload_id.is_empty());
    assert_ne!(init.session_id, init.upload_id);

    let mut infos: Vec<ChunkInfo> = Vec::new();
    for (offset, content) in [(0, "abcd"), (1, "efgh")] {
        let req = chunk_request(&init, &init.upload_id, offset, 3, content);
        let receipt = f.uploads.receive_chunk(&f.form, Some(&alice), req, UploadContext::new()).await.unwrap();
        assert!(!receipt.chunk.is_last());

        let object = &receipt.result.form.files("chunk")[0];
        assert_eq!(object.file_uuid, receipt.chunk.file_uuid);
        assert_eq!(object.upload_id.as_deref(), Some(init.upload_id.as_str()));
        assert_eq!(object.uploader_id.as_deref(), Some("alice"));
        assert_eq!(object.filename.as_deref(), Some("movie.mp4"));
        assert_eq!(object.chunk_offset, Some(offset));
        assert_eq!(object.chunks_total, Some(3));
        assert_eq!(f.storage.get(&object.path()).unwrap(), content);
        infos.push(receipt.chunk);
    }

    assert_eq!(infos[0].file_uuid, infos[1].file_uuid);
    let prefix = format!("alice/{}/", infos[0].file_uuid);
    let keys = f.storage.keys();
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|k| k.starts_with(&prefix)));
    assert!(keys.contains(&format!("{prefix}0-of-3")));
    assert!(keys.contains(&format!("{prefix}1-of-3")));

    // a second upload gets its own file
    let other = f.uploads.initialize(Some(&alice)).await.unwrap();
    let req = chunk_request(&other, &other.upload_id, 0, 1, "zz");
    let receipt = f.uploads.receive_chunk(&f.form, Some(&alice), req, UploadContext::new()).await.unwrap();
    assert!(receipt.chunk.is_last());
    assert_ne!(receipt.chunk.file_uuid, infos[0].file_uuid);
}

#[tokio::test]
async fn default_template_keeps_chunks_apart() {
    let f = fixture(ChunkedConfig::default());
    let form = Form::new([Field::file("chunk", 64, f.storage.clone()).required()]);
    let alice = Identity::new("alice");
    let init = f.uploads.initialize(Some(&alice)).await.unwrap();

    let mut file_uuid = None;
    for (offset, content) in [(0, "abcd"), (1, "efgh")] {
        let req = chunk_request(&init, &init.upload_id, offset, 2, content);
        let receipt = f.uploads.receive_chunk(&form, Some(&alice), req, UploadContext::new()).await.unwrap();
        file_uuid = Some(receipt.chunk.file_uuid);
    }

    let file_uuid = file_uuid.unwrap();
    assert_eq!(f.storage.len(), 2);
    assert_eq!(f.storage.total_bytes(), 8);
    assert_eq!(f.storage.get(&format!("{file_uuid}/0")).unwrap(), "abcd");
    assert_eq!(f.storage.get(&format!("{file_uuid}/1")).unwrap(), "efgh");
}

#[tokio::test]
async fn template_without_offset_is_misconfigured() {
    let f = fixture(ChunkedConfig::default());
    let form = Form::new([Field::file("chunk", 64, f.storage.clone()).path_template("{fileuuid}")]);
    let alice = Identity::new("alice");
    let init = f.uploads.initialize(Some(&alice)).await.unwrap();

    let req = chunk_request(&init, &init.upload_id, 0, 2, "abcd");
    let rejection = f.uploads.receive_chunk(&form, Some(&alice), req, UploadContext::new()).await.unwrap_err();
    assert_eq!(rejection.error().code(), UploadErrorCode::Misconfigured);
    assert_eq!(f.storage.uploads(), 0);
}

#[tokio::test]
async fn upload_id_mismatch_never_reaches_storage() {
    let f = fixture(ChunkedConfig::default());
    let alice = Identity::new("alice");
    let init = f.uploads.initialize(Some(&alice)).await.unwrap();

    let req = chunk_request(&init, "not-the-upload-id", 0, 2, "abcd");
    let rejection = f.uploads.receive_chunk(&f.form, Some(&alice), req, UploadContext::new()).await.unwrap_err();
    assert_eq!(rejection.error().code(), UploadErrorCode::UploadIdMismatch);
    assert_eq!(rejection.error().status_code(), http::StatusCode::BAD_REQUEST);
    assert!(rejection.ledger().is_empty());
    assert_eq!(f.storage.uploads(), 0);
}

#[tokio::test]
async fn identity_required() {
    let f = fixture(ChunkedConfig::default());

    let err = f.uploads.initialize(None).await.unwrap_err();
    assert_eq!(err.code(), UploadErrorCode::Unauthenticated);
    assert_eq!(err.status_code(), http::StatusCode::UNAUTHORIZED);

    let init = f.uploads.initialize(Some(&Identity::new("alice"))).await.unwrap();

    let req = chunk_request(&init, &init.upload_id, 0, 2, "abcd");
    let rejection = f.uploads.receive_chunk(&f.form, None, req, UploadContext::new()).await.unwrap_err();
    assert_eq!(rejection.error().code(), UploadErrorCode::Unauthenticated);

    let req = chunk_request(&init, &init.upload_id, 0, 2, "abcd");
    let mallory = Identity::new("mallory");
    let rejection = f.uploads.receive_chunk(&f.form, Some(&mallory), req, UploadContext::new()).await.unwrap_err();
    assert_eq!(rejection.error().code(), UploadErrorCode::Unauthenticated);
    assert_eq!(f.storage.uploads(), 0);
}

#[tokio::test]
async fn chunk_header_errors() {
    let f = fixture(ChunkedConfig::default());
    let alice = Identity::new("alice");
    let init = f.uploads.initialize(Some(&alice)).await.unwrap();

    let mut req = chunk_request(&init, &init.upload_id, 0, 2, "abcd");
    req.headers_mut().remove("chunkstotal");
    let rejection = f.uploads.receive_chunk(&f.form, Some(&alice), req, UploadContext::new()).await.unwrap_err();
    assert_eq!(rejection.error().code(), UploadErrorCode::MissingChunkField);

    let req = chunk_request(&init, &init.upload_id, 2, 2, "abcd");
    let rejection = f.uploads.receive_chunk(&f.form, Some(&alice), req, UploadContext::new()).await.unwrap_err();
    assert_eq!(rejection.error().code(), UploadErrorCode::InvalidChunkField);

    let mut req = chunk_request(&init, &init.upload_id, 0, 2, "abcd");
    req.headers_mut().insert("uploadsession", http::HeaderValue::from_static("unknown"));
    let rejection = f.uploads.receive_chunk(&f.form, Some(&alice), req, UploadContext::new()).await.unwrap_err();
    assert_eq!(rejection.error().code(), UploadErrorCode::SessionNotFound);

    assert_eq!(f.storage.uploads(), 0);
}

#[tokio::test]
async fn oversized_chunk() {
    let f = fixture(ChunkedConfig::default());
    let alice = Identity::new("alice");
    let init = f.uploads.initialize(Some(&alice)).await.unwrap();

    let req = chunk_request(&init, &init.upload_id, 0, 2, &"x".repeat(65));
    let rejection = f.uploads.receive_chunk(&f.form, Some(&alice), req, UploadContext::new()).await.unwrap_err();
    assert_eq!(rejection.error().code(), UploadErrorCode::TooLarge);

    let err = rejection.rollback().await;
    assert_eq!(err.code(), UploadErrorCode::TooLarge);
    assert!(f.storage.is_empty());
}

#[tokio::test(start_paused = true)]
async fn expired_session() {
    let mut config = ChunkedConfig::default();
    config.session_max_age_secs = 60;
    let f = fixture(config);
    let alice = Identity::new("alice");
    let init = f.uploads.initialize(Some(&alice)).await.unwrap();

    tokio::time::advance(Duration::from_secs(59)).await;
    let req = chunk_request(&init, &init.upload_id, 0, 2, "abcd");
    f.uploads.receive_chunk(&f.form, Some(&alice), req, UploadContext::new()).await.unwrap();

    tokio::time::advance(Duration::from_secs(1)).await;
    let req = chunk_request(&init, &init.upload_id, 1, 2, "efgh");
    let rejection = f.uploads.receive_chunk(&f.form, Some(&alice), req, UploadContext::new()).await.unwrap_err();
    assert_eq!(rejection.error().code(), UploadErrorCode::SessionNotFound);
    assert_eq!(rejection.error().status_code(), http::StatusCode::UNAUTHORIZED);
    assert_eq!(f.storage.uploads(), 1);
}
