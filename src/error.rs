//! Error types for the import pipeline
//!
//! Per-message persistence failures are not errors: they are reported as data in
//! `BatchReport` so a page can still commit its successful writes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether a provider failure is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderErrorKind {
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum ImportError {
    #[error("Provider error ({kind:?}): {message}")]
    Provider {
        kind: ProviderErrorKind,
        message: String,
    },

    #[error("Blocklist lookup failed: {0}")]
    Lookup(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Message channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Run rejected for channel {channel_id}: {reason}")]
    RunRejected { channel_id: String, reason: String },

    #[error("Channel {0} is held by another run")]
    Fenced(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl ImportError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Provider {
            kind: ProviderErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Provider {
            kind: ProviderErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Errors that abort the current page but may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { kind, .. } => *kind == ProviderErrorKind::Transient,
            Self::Lookup(_) | Self::Persistence(_) | Self::Database(_) => true,
            _ => false,
        }
    }

    /// Provider told us the account needs to be reconnected.
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            Self::Provider {
                kind: ProviderErrorKind::Permanent,
                ..
            }
        )
    }
}

impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Database(err.to_string())
    }
}

impl From<r2d2::Error> for ImportError {
    fn from(err: r2d2::Error) -> Self {
        ImportError::Database(err.to_string())
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for ImportError {
    fn from(err: toml::de::Error) -> Self {
        ImportError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ImportError::transient("timeout").is_retryable());
        assert!(!ImportError::permanent("token revoked").is_retryable());
        assert!(ImportError::Lookup("unavailable".into()).is_retryable());
        assert!(ImportError::Persistence("pool exhausted".into()).is_retryable());
        assert!(!ImportError::Fenced("c1".into()).is_retryable());
        assert!(!ImportError::Cancelled.is_retryable());
    }

    #[test]
    fn test_requires_reconnect() {
        assert!(ImportError::permanent("invalid grant").requires_reconnect());
        assert!(!ImportError::transient("503").requires_reconnect());
    }

    #[test]
    fn test_serializes_with_type_tag() {
        let json = serde_json::to_string(&ImportError::Lookup("down".into())).unwrap();
        assert_eq!(json, r#"{"type":"Lookup","message":"down"}"#);
    }
}
