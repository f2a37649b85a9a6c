//! Uploaded file descriptors

use mime::Mime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default destination path template
pub const DEFAULT_PATH_TEMPLATE: &str = "{fileuuid}";

/// Default destination path template of a chunk; chunks of one file share `{fileuuid}`
pub const DEFAULT_CHUNK_PATH_TEMPLATE: &str = "{fileuuid}/{chunkoffset}";

/// Per-chunk metadata of a chunked upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// Client-supplied upload id
    pub upload_id: String,
    /// Name of the whole file
    pub filename: String,
    /// Size of the whole file in bytes
    pub file_size: u64,
    /// Nominal chunk size in bytes
    pub chunk_size: u64,
    /// Zero-based index of this chunk
    pub chunk_offset: u64,
    /// Number of chunks in the upload
    pub chunks_total: u64,
    /// File identity bound to the upload session
    pub file_uuid: Uuid,
}

impl ChunkInfo {
    /// Whether this is the final chunk of the upload.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.chunk_offset.saturating_add(1) == self.chunks_total
    }
}

/// An uploaded file
///
/// Built by the parser for every file part and handed to the field's storage
/// backend together with the part's byte stream. `size` is the byte count the
/// backend reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// Name of the form field the file arrived in
    pub field: String,
    pub upload_id: Option<String>,
    pub uploader_id: Option<String>,
    pub size: u64,
    pub chunk_offset: Option<u64>,
    pub chunks_total: Option<u64>,
    pub filename: Option<String>,
    /// Server-generated identity; shared by all chunks of a chunked upload
    pub file_uuid: Uuid,
    pub path_template: String,
    pub content_type: Mime,
}

impl Object {
    /// Resolves the destination path template.
    ///
    /// Placeholders: `{uploadid}`, `{uploaderid}`, `{chunkoffset}`, `{chunkstotal}`,
    /// `{filename}` and `{fileuuid}`. Absent values resolve to an empty string,
    /// path separators in the filename become `_` and unknown placeholders are
    /// kept verbatim.
    ///
    /// ```
    /// # use formup::Object;
    /// # let object = Object {
    /// #     field: "doc".into(), upload_id: Some("u1".into()), uploader_id: None, size: 0,
    /// #     chunk_offset: Some(2), chunks_total: Some(3), filename: Some("../a.txt".into()),
    /// #     file_uuid: uuid::Uuid::nil(), path_template: String::new(), content_type: mime::TEXT_PLAIN,
    /// # };
    /// let mut object = object;
    /// object.path_template = "{uploadid}/{chunkoffset}-of-{chunkstotal}/{filename}{ext}".into();
    /// assert_eq!(object.path(), "u1/2-of-3/.._a.txt{ext}");
    /// ```
    #[must_use]
    pub fn path(&self) -> String {
        let mut out = String::with_capacity(self.path_template.len());
        let mut rest = self.path_template.as_str();
        while let Some(start) = rest.find('{') {
            let (head, tail) = rest.split_at(start);
            out.push_str(head);

            let Some(end) = tail.find('}') else {
                rest = tail;
                break;
            };
            let (placeholder, after) = tail.split_at(end.saturating_add(1));
            let key = tail.get(1..end).unwrap_or_default();
            if key.contains('{') {
                out.push('{');
                rest = tail.get(1..).unwrap_or_default();
                continue;
            }
            match self.placeholder(key) {
                Some(value) => out.push_str(&value),
                None => out.push_str(placeholder),
            }
            rest = after;
        }
        out.push_str(rest);
        out
    }

    fn placeholder(&self, key: &str) -> Option<String> {
        let opt_num = |n: Option<u64>| n.map(|n| n.to_string()).unwrap_or_default();
        Some(match key {
            "uploadid" => self.upload_id.clone().unwrap_or_default(),
            "uploaderid" => self.uploader_id.clone().unwrap_or_default(),
            "chunkoffset" => opt_num(self.chunk_offset),
            "chunkstotal" => opt_num(self.chunks_total),
            "filename" => self.filename.as_deref().unwrap_or_default().replace(['/', '\\'], "_"),
            "fileuuid" => self.file_uuid.to_string(),
            _ => return None,
        })
    }
}
