use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The pair required on every authenticated request: a stable account id and the
/// credential the portal rotates underneath it.
///
/// Tokens are replaced, never edited in place. The on-disk shape also accepts the
/// capture app's field names (`userId`, `ult`, `lastUpdated`).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    #[serde(alias = "userId")]
    pub subject_id: String,
    #[serde(alias = "ult")]
    pub credential: String,
    #[serde(default = "Utc::now", alias = "lastUpdated")]
    pub issued_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub last_validated_at: DateTime<Utc>,
    /// Set once the portal rejected this credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl SessionToken {
    pub fn new(subject_id: impl Into<String>, credential: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            subject_id: subject_id.into(),
            credential: credential.into(),
            issued_at: now,
            last_validated_at: now,
            invalidated_at: None,
        }
    }

    /// The token that follows this one after the portal handed out a new credential.
    pub fn rotated(&self, credential: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(self.subject_id.clone(), credential, now)
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated_at.is_some()
    }

    /// `abcd1234...wxyz`, safe to log.
    pub fn redacted_credential(&self) -> String {
        redact(&self.credential)
    }
}

// Keep credentials out of `{:?}` output.
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("subject_id", &self.subject_id)
            .field("credential", &self.redacted_credential())
            .field("issued_at", &self.issued_at)
            .field("last_validated_at", &self.last_validated_at)
            .field("invalidated_at", &self.invalidated_at)
            .finish()
    }
}

pub fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
