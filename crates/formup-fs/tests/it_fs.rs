use formup::encode::{FilePart, FormBody};
use formup::form::{Field, Form};
use formup::storage::{Rollback, Storage, UploadContext};
use formup::{FormParser, StdError, UploadErrorCode};
use formup_fs::FileSystem;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;

const FS_ROOT: &str = concat!(env!("CARGO_TARGET_TMPDIR"), "/formup-fs-tests");

fn setup_tracing() {
    use std::sync::Once;
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

fn file_system(dir: &str) -> Result<Arc<FileSystem>> {
    setup_tracing();
    let root = Path::new(FS_ROOT).join(dir);
    if root.exists() {
        fs::remove_dir_all(&root)?;
    }
    fs::create_dir_all(&root)?;
    let storage = FileSystem::new(root).map_err(|e| anyhow::anyhow!("{e:?}"))?;
    Ok(Arc::new(storage))
}

fn body_stream(body: Bytes) -> impl futures::Stream<Item = Result<Bytes, StdError>> + Send {
    futures::stream::iter([Ok(body)])
}

fn count_files(dir: &Path) -> Result<usize> {
    let mut n = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            n += count_files(&entry.path())?;
        } else {
            n += 1;
        }
    }
    Ok(n)
}

#[tokio::test]
async fn write_and_rollback() -> Result<()> {
    let storage = file_system("write_and_rollback")?;
    let form = Form::new([
        Field::file("report", 1024, storage.clone())
            .required()
            .path_template("reports/{uploaderid}/{filename}"),
        Field::files("scans", 1024, storage.clone()).path_template("scans/{fileuuid}"),
    ]);

    let mut body = FormBody::new();
    body.file("report", "q3.txt", Some("text/plain"), "all good").files(
        "scans",
        &[
            FilePart::new("1.bin", Some("application/octet-stream"), b"\x00\x01"),
            FilePart::new("2.bin", Some("application/octet-stream"), b"\x02\x03\x04"),
        ],
    );
    let content_type = body.content_type();
    let cx = UploadContext::new().with_uploader("alice");
    let parsed = FormParser::default()
        .parse_stream(&form, Some(content_type.as_str()), body_stream(body.finish()), &cx)
        .await?;

    let report = storage.root().join("reports/alice/q3.txt");
    assert_eq!(fs::read_to_string(&report)?, "all good");
    assert_eq!(parsed.form.files("scans").len(), 2);
    assert_eq!(count_files(storage.root())?, 3);

    for action in parsed.ledger.actions() {
        assert!(matches!(action, Rollback::DeletePath { path } if path.starts_with(storage.root())));
    }

    parsed.ledger.cancel().await?;
    assert_eq!(count_files(storage.root())?, 0);
    // idempotent
    parsed.ledger.cancel().await?;

    Ok(())
}

#[tokio::test]
async fn overflow_leaves_nothing() -> Result<()> {
    let storage = file_system("overflow_leaves_nothing")?;
    let form = Form::new([Field::file("doc", 8, storage.clone()).required()]);

    let mut body = FormBody::new();
    body.file("doc", "big.txt", Some("text/plain"), "123456789");
    let content_type = body.content_type();
    let rejection = FormParser::default()
        .parse_stream(&form, Some(content_type.as_str()), body_stream(body.finish()), &UploadContext::new())
        .await
        .unwrap_err();
    assert_eq!(rejection.error().code(), UploadErrorCode::TooLarge);
    assert_eq!(count_files(storage.root())?, 1);

    let err = rejection.rollback().await;
    assert_eq!(err.code(), UploadErrorCode::TooLarge);
    assert_eq!(count_files(storage.root())?, 0);

    Ok(())
}

#[tokio::test]
async fn escaping_paths_are_refused() -> Result<()> {
    let storage = file_system("escaping_paths_are_refused")?;

    assert!(storage.resolve("../outside").is_err());
    assert!(storage.resolve("a/../../outside").is_err());
    assert!(storage.resolve("/etc/passwd").is_err());
    assert!(storage.resolve("").is_err());
    assert!(storage.resolve("a/./b").is_ok());

    let form = Form::new([Field::file("doc", 64, storage.clone()).path_template("../{filename}")]);
    let mut body = FormBody::new();
    body.file("doc", "x.txt", Some("text/plain"), "nope");
    let content_type = body.content_type();
    let rejection = FormParser::default()
        .parse_stream(&form, Some(content_type.as_str()), body_stream(body.finish()), &UploadContext::new())
        .await
        .unwrap_err();
    assert_eq!(rejection.error().code(), UploadErrorCode::Storage);
    assert!(rejection.ledger().is_empty());

    let foreign = Rollback::DeletePath {
        path: Path::new(FS_ROOT).join("elsewhere"),
    };
    assert!(storage.rollback(&foreign).await.is_err());
    let handle = Rollback::DeleteHandle {
        backend: "memory".to_owned(),
        handle: "x".to_owned(),
    };
    assert!(storage.rollback(&handle).await.is_err());

    Ok(())
}
