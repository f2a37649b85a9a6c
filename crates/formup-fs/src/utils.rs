use crate::error::*;

use formup::storage::ObjectBody;

use futures::TryStreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Writes `body` to `file` and syncs it; returns the number of bytes written.
pub async fn write_body(mut body: ObjectBody<'_>, file: &mut File) -> Result<u64> {
    let mut nwritten: u64 = 0;
    while let Some(bytes) = body.try_next().await.map_err(Error::new)? {
        file.write_all(&bytes).await?;
        nwritten += bytes.len() as u64;
    }
    file.flush().await?;
    file.sync_data().await?;
    Ok(nwritten)
}
