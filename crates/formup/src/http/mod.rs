//! Wire-level helpers

pub mod content_type;

mod multipart;
pub(crate) use self::multipart::*;
pub use self::multipart::{MultipartError, PartHeaders};
