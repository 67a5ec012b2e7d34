//! Error types for caresync-core.
//!
//! Every failure carries a stable [`ErrorClass`] so callers can make retry
//! and surfacing decisions without matching on concrete variants:
//!
//! - `Capture` — the durable store could not record data locally. Surfaced
//!   immediately to the caller, never silently dropped.
//! - `Sync` — network or server rejection while talking to the backend.
//!   Recovered automatically via backoff; UI collaborators only ever see an
//!   aggregate "pending sync" status. Subscription failures share this class:
//!   they are retryable and leave no partial state behind.
//! - `Permission` — a platform capability is denied or absent. Terminal; only
//!   a fresh explicit user action may re-attempt.
//! - `Config` — invalid configuration. Terminal until fixed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable classification for caresync errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Local durable capture failed; the caller decides whether to hold the
    /// record in memory or warn the user that data may be lost on reload.
    Capture,
    /// Network-facing failure; retryable via backoff, never thrown to UI.
    Sync,
    /// Platform permission denied or capability unsupported; terminal.
    Permission,
    /// Invalid configuration; terminal until fixed.
    Config,
}

/// Error type for all caresync-core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The platform offers no durable storage at all.
    #[error("durable store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// On-disk schema written by a newer build than this one.
    #[error("store schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    /// Server answered with a non-2xx status. Retryable.
    #[error("server rejected {endpoint}: HTTP {status}")]
    ServerStatus { endpoint: String, status: u16 },

    /// Request never completed (DNS, connect, timeout). Retryable; a timeout
    /// imposed by the HTTP client is indistinguishable from any other
    /// transport failure on purpose.
    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Notification permission refused by the user. Never re-prompted
    /// automatically.
    #[error("notification permission denied")]
    PermissionDenied,

    /// A platform capability probe reported no support.
    #[error("platform capability not supported: {capability}")]
    Unsupported { capability: &'static str },

    #[error("invalid config: {0}")]
    Config(String),
}

impl Error {
    /// Stable error-class mapping for retry and surfacing policy.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::StoreUnavailable { .. }
            | Self::Store(_)
            | Self::Json(_)
            | Self::Io(_)
            | Self::SchemaTooNew { .. } => ErrorClass::Capture,
            Self::ServerStatus { .. } | Self::Transport { .. } => ErrorClass::Sync,
            Self::PermissionDenied | Self::Unsupported { .. } => ErrorClass::Permission,
            Self::Config(_) => ErrorClass::Config,
        }
    }

    /// Whether automatic retry with backoff is appropriate.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Sync
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_class_covers_local_storage() {
        let err = Error::StoreUnavailable {
            reason: "no backend".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Capture);
        assert!(!err.is_retryable());

        let err = Error::SchemaTooNew {
            found: 9,
            supported: 2,
        };
        assert_eq!(err.class(), ErrorClass::Capture);
    }

    #[test]
    fn server_rejection_is_retryable() {
        let err = Error::ServerStatus {
            endpoint: "/records/symptom".to_string(),
            status: 503,
        };
        assert_eq!(err.class(), ErrorClass::Sync);
        assert!(err.is_retryable());
    }

    #[test]
    fn permission_is_terminal() {
        assert_eq!(Error::PermissionDenied.class(), ErrorClass::Permission);
        assert!(!Error::PermissionDenied.is_retryable());
        let err = Error::Unsupported {
            capability: "push",
        };
        assert_eq!(err.class(), ErrorClass::Permission);
    }

    #[test]
    fn display_is_actionable() {
        let err = Error::ServerStatus {
            endpoint: "https://api.example.com/records/journal".to_string(),
            status: 500,
        };
        let msg = err.to_string();
        assert!(msg.contains("500"));
        assert!(msg.contains("/records/journal"));
    }
}
