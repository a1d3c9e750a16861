//! Error types for tapeproxy

use std::io;
use thiserror::Error;

/// Result type for tapeproxy operations
pub type Result<T> = std::result::Result<T, TapeError>;

/// Errors that can occur in tapeproxy
#[derive(Debug, Error)]
pub enum TapeError {
    /// Unknown session id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Recording could not be located on playback start
    #[error("Recording not found: {0}")]
    NotFound(String),

    /// Malformed recording file or malformed JSON request body
    #[error("Parse error: {detail}. Raw content: {raw}")]
    ParseError {
        /// Parser message
        detail: String,
        /// The offending text, verbatim
        raw: String,
    },

    /// No recorded interaction answers the live request
    #[error("{}", no_match_message(.method, .uri, .remaining))]
    NoMatch {
        /// Method of the attempted request
        method: String,
        /// URI of the attempted request
        uri: String,
        /// `METHOD uri` of every interaction still available
        remaining: Vec<String>,
    },

    /// Body exceeds the capture ceiling
    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge {
        /// Observed size (at least)
        size: usize,
        /// Configured ceiling
        limit: usize,
    },

    /// Persistence failure on save or load
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Forwarding to the upstream failed
    #[error("Upstream error: {0}")]
    UpstreamError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid sanitizer definition
    #[error("Invalid sanitizer: {0}")]
    InvalidSanitizer(String),

    /// Invalid test name
    #[error("Invalid test name: {0}")]
    InvalidTestName(String),

    /// Session limit or other bad request
    #[error("{0}")]
    Other(String),
}

impl TapeError {
    /// Stable, machine-readable error kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "SessionNotFound",
            Self::NotFound(_) => "NotFound",
            Self::ParseError { .. } => "ParseError",
            Self::NoMatch { .. } => "NoMatch",
            Self::PayloadTooLarge { .. } => "PayloadTooLarge",
            Self::StorageError(_) => "StorageError",
            Self::UpstreamError(_) => "UpstreamError",
            Self::Io(_) => "Io",
            Self::ConfigError(_) => "ConfigError",
            Self::InvalidSanitizer(_) => "InvalidSanitizer",
            Self::InvalidTestName(_) => "InvalidTestName",
            Self::Other(_) => "Other",
        }
    }
}

fn no_match_message(method: &str, uri: &str, remaining: &[String]) -> String {
    if remaining.is_empty() {
        return format!(
            "Unable to find a record for the request {method} {uri}: no recorded entries remain"
        );
    }

    let mut message = format!(
        "Unable to find a record for the request {method} {uri}. Remaining entries:"
    );
    for entry in remaining {
        message.push_str("\n  ");
        message.push_str(entry);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_match_lists_remaining() {
        let error = TapeError::NoMatch {
            method: "GET".to_string(),
            uri: "http://example.com/b".to_string(),
            remaining: vec!["GET http://example.com/a".to_string()],
        };

        let message = error.to_string();
        assert!(message.contains("GET http://example.com/b"));
        assert!(message.contains("GET http://example.com/a"));
        assert_eq!(error.kind(), "NoMatch");
    }

    #[test]
    fn test_parse_error_carries_raw_text() {
        let error = TapeError::ParseError {
            detail: "expected value".to_string(),
            raw: "{\"key\": }".to_string(),
        };

        assert!(error.to_string().contains("{\"key\": }"));
    }
}
