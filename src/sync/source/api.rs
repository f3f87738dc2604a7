use std::future::Future;

use thiserror::Error;

use crate::sync::domain::{RawRecord, SessionToken};

/// The two failure shapes a fetch can have. They must never be confused:
/// a network failure says nothing about the credential, an auth failure condemns it.
///
/// The portal can rotate the credential on a response it then fails to serve, so a
/// network failure carries any credential that response handed out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("{reason}")]
    Network {
        reason: String,
        renewed_credential: Option<String>,
    },
    #[error("{0}")]
    Auth(String),
}

impl SourceError {
    pub fn network(reason: impl Into<String>) -> Self {
        SourceError::Network {
            reason: reason.into(),
            renewed_credential: None,
        }
    }

    /// Attaches a credential rotated by the failed response. Auth failures keep none.
    pub fn with_renewed_credential(self, credential: Option<String>) -> Self {
        match self {
            SourceError::Network { reason, .. } => SourceError::Network {
                reason,
                renewed_credential: credential,
            },
            auth => auth,
        }
    }

    pub fn renewed_credential(&self) -> Option<&str> {
        match self {
            SourceError::Network {
                renewed_credential, ..
            } => renewed_credential.as_deref(),
            SourceError::Auth(_) => None,
        }
    }
}

/// Everything one successful fetch returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    pub records: Vec<RawRecord>,
    /// Set when the portal rotated the credential on this response.
    pub renewed_credential: Option<String>,
}

/// Minimal remote interface used by the engine.
///
/// One call is one authenticated request window; implementations must not retry
/// internally on auth failures.
pub trait RecordSource {
    fn fetch(
        &mut self,
        token: &SessionToken,
    ) -> impl Future<Output = Result<FetchOutcome, SourceError>> + Send;
}
