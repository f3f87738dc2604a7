use std::fmt;

use crate::error::{Severity, SyncError};

/// Counts produced by one `HistoryStore::merge` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeResult {
    /// Records appended for the first time.
    pub added: usize,
    /// Records already known; only their `last_seen_at` moved.
    pub seen: usize,
}

/// Where the engine is inside (or between) cycles.
///
/// `Idle -> Fetching -> Merging -> Rotating -> Idle`, with `Fetching -> Idle` on a
/// transient failure and `Fetching -> Halted` when the portal rejects the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Merging,
    Rotating,
    Halted,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Fetching => "fetching",
            CyclePhase::Merging => "merging",
            CyclePhase::Rotating => "rotating",
            CyclePhase::Halted => "halted",
        };
        f.write_str(name)
    }
}

/// Result of one `SyncEngine::run_once` call.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub added: usize,
    pub seen: usize,
    /// Raw records rejected by validation.
    pub dropped: usize,
    pub token_rotated: bool,
    pub error: Option<SyncError>,
}

impl CycleOutcome {
    pub fn failed(error: SyncError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// `None` on success.
    pub fn severity(&self) -> Option<Severity> {
        self.error.as_ref().map(SyncError::severity)
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => write!(
                f,
                "added={} seen={} dropped={} token_rotated={}",
                self.added, self.seen, self.dropped, self.token_rotated
            ),
            Some(err) => write!(f, "failed: {err}"),
        }
    }
}
