use std::fmt;

use serde_json::error::Category;
use thiserror::Error;

/// Every failure the sync controller can surface to its listeners.
///
/// None of these are fatal: the controller stays usable after publishing any
/// of them and the next user action may retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("server returned an empty response body")]
    EmptyResponseBody,
    #[error("failed to decode page ({kind}): {message}")]
    Decode {
        kind: DecodeErrorKind,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("offline: showing cached contacts")]
    Offline,
}

impl SyncError {
    pub fn decode(err: &serde_json::Error) -> Self {
        SyncError::Decode {
            kind: DecodeErrorKind::classify(err),
            message: err.to_string(),
        }
    }

    /// Failures where the feed never produced a page; the cache is the only
    /// thing left to show.
    pub fn wants_cache_fallback(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::EmptyResponseBody)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    MissingField,
    TypeMismatch,
    MissingValue,
    CorruptedPayload,
    Unknown,
}

impl DecodeErrorKind {
    /// serde_json only exposes a coarse category, the finer kinds come from
    /// the message prefixes serde's `de::Error` constructors produce.
    pub fn classify(err: &serde_json::Error) -> Self {
        match err.classify() {
            Category::Syntax | Category::Eof => DecodeErrorKind::CorruptedPayload,
            Category::Io => DecodeErrorKind::Unknown,
            Category::Data => {
                let message = err.to_string();
                if message.starts_with("missing field") {
                    DecodeErrorKind::MissingField
                } else if message.starts_with("invalid type: null") {
                    DecodeErrorKind::MissingValue
                } else if message.starts_with("invalid type")
                    || message.starts_with("invalid value")
                    || message.starts_with("invalid length")
                {
                    DecodeErrorKind::TypeMismatch
                } else {
                    DecodeErrorKind::Unknown
                }
            }
        }
    }
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DecodeErrorKind::MissingField => "missing field",
            DecodeErrorKind::TypeMismatch => "type mismatch",
            DecodeErrorKind::MissingValue => "missing value",
            DecodeErrorKind::CorruptedPayload => "corrupted payload",
            DecodeErrorKind::Unknown => "unknown",
        };
        f.write_str(label)
    }
}
