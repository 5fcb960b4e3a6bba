//! Error taxonomy for sync operations
//!
//! Only configuration, authentication, range and top-level storage failures
//! abort an operation. Everything else is recovered locally and reported
//! through counts and the log stream.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::storage::is_quota_exceeded;

/// The provider rejected the credential (HTTP 401/403)
#[derive(Debug, thiserror::Error)]
#[error("Access token rejected by the mail provider")]
pub struct AuthRejectedError;

/// The provider throttled the request (HTTP 429)
#[derive(Debug, thiserror::Error)]
#[error("Rate limited by the mail provider")]
pub struct RateLimitedError;

/// Fatal error for a whole sync, export, or migration operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Legacy archive must be migrated before Smart Fetch can run")]
    MigrationRequired,

    #[error("Authentication failed: {message}. Sign in again.")]
    Authentication { message: String },

    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl SyncError {
    pub fn no_session() -> Self {
        SyncError::Configuration {
            message: "No active session. Sign in again".to_string(),
        }
    }

    /// Map a provider error onto the fatal taxonomy
    ///
    /// Auth rejections become `Authentication`; anything else at a top-level
    /// step is treated as a storage/remote failure of that step.
    pub fn from_remote(e: &anyhow::Error) -> Self {
        if e.downcast_ref::<AuthRejectedError>().is_some() {
            SyncError::Authentication {
                message: e.to_string(),
            }
        } else {
            SyncError::Storage {
                message: format!("{:#}", e),
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Configuration { .. }
            | SyncError::MigrationRequired
            | SyncError::InvalidRange { .. } => ErrorKind::Configuration,
            SyncError::Authentication { .. } => ErrorKind::Authentication,
            SyncError::Storage { .. } => ErrorKind::Transient,
        }
    }
}

/// Classification of any failure seen during an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Configuration,
    Authentication,
    /// A single item or week failed; skipped
    Transient,
    /// Local cache write exceeded the storage quota
    Quota,
    /// An item had no resolvable date
    DataShape,
    /// One month's merge write failed
    Partial,
}

impl ErrorKind {
    /// Classify a remote error
    pub fn of_remote(e: &anyhow::Error) -> Self {
        if e.downcast_ref::<AuthRejectedError>().is_some() {
            ErrorKind::Authentication
        } else {
            ErrorKind::Transient
        }
    }

    /// Classify a local storage error
    pub fn of_local(e: &anyhow::Error) -> Self {
        if is_quota_exceeded(e) {
            ErrorKind::Quota
        } else {
            ErrorKind::Transient
        }
    }

    /// Whether errors of this kind abort the whole operation
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::Configuration | ErrorKind::Authentication)
    }
}

/// A recovered failure of one unit, kept for the operation's report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub kind: ErrorKind,
    /// What failed: a message id or a month key
    pub subject: String,
    pub message: String,
}

impl Issue {
    pub fn new(kind: ErrorKind, subject: impl ToString, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_rejection_classifies_as_fatal() {
        let err = anyhow::Error::new(AuthRejectedError).context("Failed to list messages");
        assert_eq!(ErrorKind::of_remote(&err), ErrorKind::Authentication);
        assert!(ErrorKind::of_remote(&err).is_fatal());
        assert!(matches!(
            SyncError::from_remote(&err),
            SyncError::Authentication { .. }
        ));
    }

    #[test]
    fn test_rate_limit_is_transient() {
        let err = anyhow::Error::new(RateLimitedError);
        assert_eq!(ErrorKind::of_remote(&err), ErrorKind::Transient);
        assert!(!ErrorKind::Transient.is_fatal());
    }

    #[test]
    fn test_local_quota_errors_classify_as_quota() {
        let quota: anyhow::Error = crate::storage::LocalStoreError::QuotaExceeded {
            needed: 10,
            available: 5,
        }
        .into();
        assert_eq!(ErrorKind::of_local(&quota), ErrorKind::Quota);
        assert_eq!(ErrorKind::of_local(&anyhow::anyhow!("disk")), ErrorKind::Transient);
    }

    #[test]
    fn test_sync_error_kinds() {
        assert_eq!(SyncError::MigrationRequired.kind(), ErrorKind::Configuration);
        assert_eq!(SyncError::no_session().kind(), ErrorKind::Configuration);
        assert_eq!(
            SyncError::Storage {
                message: "down".to_string()
            }
            .kind(),
            ErrorKind::Transient
        );
        assert_eq!(serde_json::to_value(ErrorKind::DataShape).unwrap(), "datashape");
    }

    #[test]
    fn test_authentication_message_is_actionable() {
        let err = SyncError::Authentication {
            message: "token expired".to_string(),
        };
        assert!(err.to_string().contains("Sign in again"));
    }
}
