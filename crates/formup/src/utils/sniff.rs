//! Content type sniffing
//!
//! Used when a part declares no `Content-Type`. Recognises a handful of binary
//! signatures and markup prefixes, then falls back to `text/plain` for text and
//! `application/octet-stream` for anything else.

/// `(signature, mask, content type)`; a byte matches when `data & mask == signature`.
const MASKED: &[(&[u8], &[u8], &str)] = &[
    (b"%PDF-", b"\xFF\xFF\xFF\xFF\xFF", "application/pdf"),
    (b"%!PS-Adobe-", b"\xFF\xFF\xFF\xFF\xFF\xFF\xFF\xFF\xFF\xFF\xFF", "application/postscript"),
    (b"\xFE\xFF\x00\x00", b"\xFF\xFF\x00\x00", "text/plain; charset=utf-16be"),
    (b"\xFF\xFE\x00\x00", b"\xFF\xFF\x00\x00", "text/plain; charset=utf-16le"),
    (b"\xEF\xBB\xBF\x00", b"\xFF\xFF\xFF\x00", "text/plain; charset=utf-8"),
    (b"GIF87a", b"\xFF\xFF\xFF\xFF\xFF\xFF", "image/gif"),
    (b"GIF89a", b"\xFF\xFF\xFF\xFF\xFF\xFF", "image/gif"),
    (b"\x89PNG\x0D\x0A\x1A\x0A", b"\xFF\xFF\xFF\xFF\xFF\xFF\xFF\xFF", "image/png"),
    (b"\xFF\xD8\xFF", b"\xFF\xFF\xFF", "image/jpeg"),
    (b"BM", b"\xFF\xFF", "image/bmp"),
    (
        b"RIFF\x00\x00\x00\x00WEBPVP",
        b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF\xFF\xFF",
        "image/webp",
    ),
    (
        b"RIFF\x00\x00\x00\x00WAVE",
        b"\xFF\xFF\xFF\xFF\x00\x00\x00\x00\xFF\xFF\xFF\xFF",
        "audio/wave",
    ),
    (b"OggS\x00", b"\xFF\xFF\xFF\xFF\xFF", "application/ogg"),
    (b"\x00\x00\x00\x00ftyp", b"\x00\x00\x00\x00\xFF\xFF\xFF\xFF", "video/mp4"),
    (b"\x1F\x8B\x08", b"\xFF\xFF\xFF", "application/x-gzip"),
    (b"PK\x03\x04", b"\xFF\xFF\xFF\xFF", "application/zip"),
];

/// HTML tags recognised after leading whitespace, compared case-insensitively.
/// A tag must be followed by a space or `>`.
const HTML_TAGS: &[&[u8]] = &[
    b"<!DOCTYPE HTML",
    b"<HTML",
    b"<HEAD",
    b"<SCRIPT",
    b"<IFRAME",
    b"<H1",
    b"<DIV",
    b"<FONT",
    b"<TABLE",
    b"<A",
    b"<STYLE",
    b"<TITLE",
    b"<B",
    b"<BODY",
    b"<BR",
    b"<P",
    b"<!--",
];

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Returns the content type of `data`, judged from its leading bytes.
#[must_use]
pub fn sniff(data: &[u8]) -> &'static str {
    for &(signature, mask, content_type) in MASKED {
        if masked_match(data, signature, mask) {
            return content_type;
        }
    }

    let start = data.iter().position(|b| !is_whitespace(*b)).unwrap_or(data.len());
    #[allow(clippy::indexing_slicing)]
    let trimmed = &data[start..];

    if HTML_TAGS.iter().any(|tag| html_match(trimmed, tag)) {
        return "text/html; charset=utf-8";
    }
    if trimmed.starts_with(b"<?xml") {
        return "text/xml; charset=utf-8";
    }

    if data.iter().any(|b| is_binary(*b)) {
        return OCTET_STREAM;
    }
    TEXT_PLAIN
}

fn masked_match(data: &[u8], signature: &[u8], mask: &[u8]) -> bool {
    if data.len() < signature.len() {
        return false;
    }
    data.iter().zip(signature).zip(mask).all(|((d, s), m)| d & m == *s)
}

fn html_match(data: &[u8], tag: &[u8]) -> bool {
    let Some(head) = data.get(..tag.len()) else { return false };
    if !head.eq_ignore_ascii_case(tag) {
        return false;
    }
    matches!(data.get(tag.len()), Some(b' ' | b'>'))
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

fn is_binary(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F)
}
