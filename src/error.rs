// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the access engine.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Escapes the engine |
//! |------------|-----------|--------------------|
//! | `Configuration` | No | Yes, immediately |
//! | `TierMiss` | No | Never (the engine falls through to the next tier) |
//! | `Transport` | Connection failures, 408, 429, 5xx | Yes, and queues the request when it is queuable |
//! | `Storage` | No | Yes |
//! | `Serialization` | No | Yes |
//! | `Io` | No | Yes |
//! | `RetryExhausted` | No | Never (logged by the redelivery scheduler) |
//! | `Cancelled` | No | Yes |
//!
//! The enum is `Clone` because a single outcome is replayed to every
//! subscriber of a shared in-flight request.

use thiserror::Error;

use crate::storage::TierKind;

/// Result type alias for access-engine operations.
pub type Result<T> = std::result::Result<T, AccessError>;

/// Errors produced by tiers, the engine and the redelivery queue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccessError {
    /// Missing type binding, invalid configuration or malformed request.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Expected miss in a local tier (cache empty, row absent).
    #[error("{tier} miss: {reason}")]
    TierMiss { tier: TierKind, reason: String },

    /// Remote service failure.
    #[error("Transport error{}: {message}", status_suffix(.status))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// Local store failure (SQLite, job queue).
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON encoding/decoding or mapper failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Local file I/O failure during a transfer.
    #[error("I/O error: {0}")]
    Io(String),

    /// A queued job reached its attempt ceiling.
    #[error("Job {job_id} abandoned after {attempts} attempts")]
    RetryExhausted { job_id: String, attempts: u32 },

    /// The producer was aborted or the result channel closed.
    #[error("Request cancelled")]
    Cancelled,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl AccessError {
    pub fn miss(tier: TierKind, reason: impl Into<String>) -> Self {
        Self::TierMiss {
            tier,
            reason: reason.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Whether another redelivery of the same request could succeed.
    ///
    /// Only transport failures qualify, and of those only the ones the
    /// server did not explicitly reject (no status, 408, 429, 5xx). The
    /// scheduler drops a job whose attempt fails with anything else.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { status: None, .. } => true,
            Self::Transport { status: Some(code), .. } => matches!(*code, 408 | 429 | 500..=599),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::TierMiss { .. })
    }
}

impl From<sqlx::Error> for AccessError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AccessError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AccessError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for AccessError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(AccessError::transport("connection reset").is_retryable());
        let unavailable = AccessError::Transport { status: Some(503), message: String::new() };
        assert!(unavailable.is_retryable());
        let rejected = AccessError::Transport { status: Some(422), message: String::new() };
        assert!(!rejected.is_retryable());
        assert!(!AccessError::Configuration("x".into()).is_retryable());
        assert!(!AccessError::Storage("locked".into()).is_retryable());
        assert!(!AccessError::miss(TierKind::Memory, "empty").is_retryable());
    }

    #[test]
    fn test_transport_display_includes_status() {
        let err = AccessError::Transport {
            status: Some(503),
            message: "unavailable".into(),
        };
        assert_eq!(err.to_string(), "Transport error (HTTP 503): unavailable");

        let err = AccessError::transport("dns failure");
        assert_eq!(err.to_string(), "Transport error: dns failure");
    }

    #[test]
    fn test_miss_display() {
        let err = AccessError::miss(TierKind::Disk, "no rows for user");
        assert!(err.is_miss());
        assert_eq!(err.to_string(), "disk miss: no rows for user");
    }
}
