//! A formup storage backend on a local directory
//!
//! [`FileSystem`] writes each uploaded file to `root/<object path>`, where the
//! object path is the field's resolved path template. Paths that would escape
//! the root are refused. Files are written to a temporary name first and
//! renamed into place once complete, so a failed upload leaves nothing behind.

#![allow(clippy::wildcard_imports)]

mod error;
mod fs;
mod utils;

pub use self::error::*;
pub use self::fs::FileSystem;
