//! Error taxonomy for the sync core.
//!
//! Every failure a cycle can hit falls into one of two buckets:
//! * **Transient**: the cycle can be retried later with backoff (network trouble, timeouts).
//! * **Fatal**: automatic operation must stop until an operator acts
//!   (missing or rejected credential, durable state that cannot be written or read).
//!
//! Per-record validation failures are not part of this enum; they are absorbed
//! at the record level (see [`crate::sync::domain::record::RecordError`]).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::sync::source::SourceError;

/// How the scheduler must react to a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Safe to retry after a delay.
    Transient,
    /// Stop automatic scheduling; operator action required.
    Fatal,
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// No bootstrap credential was ever stored.
    #[error("no session token stored yet; import one with `set-token`")]
    NotInitialized,

    /// The remote source could not be reached or answered with a server-side failure.
    #[error("network error: {0}")]
    Network(String),

    /// The fetch did not complete inside the configured ceiling.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The remote source no longer accepts the credential.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The current token was rejected by an earlier cycle and has not been replaced.
    #[error("session token for {subject_id} was invalidated at {invalidated_at}; supply a fresh credential")]
    Halted {
        subject_id: String,
        invalidated_at: chrono::DateTime<chrono::Utc>,
    },

    /// A durable write or read failed. Previous durable state is unchanged.
    #[error("persistence error on {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A durable file exists but cannot be decoded.
    #[error("corrupt state file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// Settings that cannot produce a working setup.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Persistence {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        SyncError::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            SyncError::Network(_) | SyncError::Timeout(_) => Severity::Transient,
            SyncError::NotInitialized
            | SyncError::Auth(_)
            | SyncError::Halted { .. }
            | SyncError::Persistence { .. }
            | SyncError::Corrupt { .. }
            | SyncError::Config(_) => Severity::Fatal,
        }
    }

    /// True for the credential-class failures that put the engine into `Halted`.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_) | SyncError::Halted { .. })
    }
}

impl From<SourceError> for SyncError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Network { reason, .. } => SyncError::Network(reason),
            SourceError::Auth(msg) => SyncError::Auth(msg),
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
