//! Upload configuration
//!
//! Two plain records with defaults and `serde` support:
//!
//! - [`ParserConfig`]: limits of the multipart parsing engine
//! - [`ChunkedConfig`]: settings of the chunked upload coordinator
//!
//! Both are validated once, when the component that owns them is constructed,
//! and never change afterwards.
//!
//! # Example
//! ```
//! use formup::config::{ChunkedConfig, ParserConfig};
//!
//! let mut parser = ParserConfig::default();
//! parser.max_parts = 16;
//! parser.validate().unwrap();
//!
//! let mut chunked = ChunkedConfig::default();
//! chunked.max_concurrency = Some(4);
//! chunked.validate().unwrap();
//! assert_eq!(chunked.session_max_age().as_secs(), 7 * 24 * 60 * 60);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("ConfigError: {0} must be greater than zero")]
    Zero(&'static str),
    #[error("ConfigError: sniff_len {0} exceeds max_boundary_buffer {1}")]
    SniffTooLarge(usize, usize),
    #[error("ConfigError: session_key must not be empty")]
    EmptySessionKey,
    #[error("ConfigError: max_concurrency is set but no ticket service is configured")]
    MissingTicketService,
}

/// Multipart parsing engine limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ParserConfig {
    /// Maximum number of parts in one body, parts nested in `multipart/mixed` included.
    ///
    /// Default: 1000
    pub max_parts: usize,

    /// Maximum size of the header block of one part in bytes.
    ///
    /// Default: 16 KB
    pub max_header_size: usize,

    /// Maximum bytes carried over while a delimiter spans two reads.
    ///
    /// Default: 64 KB
    pub max_boundary_buffer: usize,

    /// Number of leading bytes inspected when a part declares no content type.
    ///
    /// Default: 512
    pub sniff_len: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_parts: 1000,
            max_header_size: 16 * 1024,     // 16 KB
            max_boundary_buffer: 64 * 1024, // 64 KB
            sniff_len: 512,
        }
    }
}

impl ParserConfig {
    /// # Errors
    /// Returns an error if a limit is zero or the sniff window cannot be buffered.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parts == 0 {
            return Err(ConfigError::Zero("max_parts"));
        }
        if self.max_header_size == 0 {
            return Err(ConfigError::Zero("max_header_size"));
        }
        if self.max_boundary_buffer == 0 {
            return Err(ConfigError::Zero("max_boundary_buffer"));
        }
        if self.sniff_len == 0 {
            return Err(ConfigError::Zero("sniff_len"));
        }
        if self.sniff_len > self.max_boundary_buffer {
            return Err(ConfigError::SniffTooLarge(self.sniff_len, self.max_boundary_buffer));
        }
        Ok(())
    }
}

/// Chunked upload coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ChunkedConfig {
    /// Lifetime of an upload session in seconds.
    ///
    /// Sessions are never deleted on completion; they expire.
    ///
    /// Default: 7 days
    pub session_max_age_secs: u64,

    /// Key under which the upload session record is stored.
    ///
    /// Default: `"upload"`
    pub session_key: String,

    /// Concurrent uploads allowed per owner identity.
    ///
    /// `None` disables admission control.
    ///
    /// Default: `None`
    pub max_concurrency: Option<u32>,

    /// Lifetime of an admission ticket in seconds.
    ///
    /// A ticket is released when the last chunk is stored, or expires after this long.
    ///
    /// Default: 7 days
    pub ticket_ttl_secs: u64,
}

impl Default for ChunkedConfig {
    fn default() -> Self {
        Self {
            session_max_age_secs: 7 * 24 * 60 * 60, // 7 days
            session_key: String::from("upload"),
            max_concurrency: None,
            ticket_ttl_secs: 7 * 24 * 60 * 60, // 7 days
        }
    }
}

impl ChunkedConfig {
    #[must_use]
    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_secs)
    }

    #[must_use]
    pub fn ticket_ttl(&self) -> Duration {
        Duration::from_secs(self.ticket_ttl_secs)
    }

    /// # Errors
    /// Returns an error if a lifetime or the concurrency bound is zero, or the session key is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_max_age_secs == 0 {
            return Err(ConfigError::Zero("session_max_age_secs"));
        }
        if self.session_key.is_empty() {
            return Err(ConfigError::EmptySessionKey);
        }
        if self.max_concurrency == Some(0) {
            return Err(ConfigError::Zero("max_concurrency"));
        }
        if self.ticket_ttl_secs == 0 {
            return Err(ConfigError::Zero("ticket_ttl_secs"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ParserConfig::default();
        assert_eq!(config.max_parts, 1000);
        assert_eq!(config.max_header_size, 16 * 1024);
        assert_eq!(config.max_boundary_buffer, 64 * 1024);
        assert_eq!(config.sniff_len, 512);
        config.validate().unwrap();

        let config = ChunkedConfig::default();
        assert_eq!(config.session_max_age(), Duration::from_secs(604_800));
        assert_eq!(config.session_key, "upload");
        assert_eq!(config.max_concurrency, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero() {
        let config = ParserConfig {
            max_parts: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Zero("max_parts"))));

        let config = ParserConfig {
            sniff_len: 128 * 1024,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::SniffTooLarge(..))));

        let config = ChunkedConfig {
            max_concurrency: Some(0),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Zero("max_concurrency"))));

        let config = ChunkedConfig {
            session_key: String::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::EmptySessionKey)));
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = ChunkedConfig {
            session_max_age_secs: 3600,
            session_key: "chunks".to_owned(),
            max_concurrency: Some(3),
            ticket_ttl_secs: 600,
        };

        let json = serde_json::to_string(&config).expect("serialize failed");
        let deserialized: ChunkedConfig = serde_json::from_str(&json).expect("deserialize failed");

        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_serde_default_values() {
        let json = r#"{"max_parts": 8}"#;
        let config: ParserConfig = serde_json::from_str(json).expect("deserialize failed");

        assert_eq!(config.max_parts, 8);
        assert_eq!(config.sniff_len, 512);
        assert_eq!(config.max_header_size, 16 * 1024);
    }
}
