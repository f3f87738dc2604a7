use crate::sync::domain::{PlayRecord, RawRecord, RecordError};
use crate::sync::types::CyclePhase;

/// What moved the engine between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    Started,
    Fetched,
    Merged,
    Rotated,
    /// Network trouble, timeouts, or a failed write. The token is still good.
    Failed,
    /// The portal rejected the credential.
    AuthRejected,
    /// An operator supplied a fresh credential.
    TokenReplaced,
}

pub fn advance(phase: CyclePhase, event: PhaseEvent) -> CyclePhase {
    use CyclePhase::*;
    use PhaseEvent::*;

    match (phase, event) {
        (_, AuthRejected) => Halted,
        (Halted, TokenReplaced) => Idle,
        (Halted, _) => Halted,
        (Idle, Started) => Fetching,
        (Fetching, Fetched) => Merging,
        (Merging, Merged) => Rotating,
        (Rotating, Rotated) => Idle,
        (_, Failed) => Idle,
        (current, _) => {
            log::warn!("[ENGINE] ignoring {:?} while {}", event, current);
            current
        }
    }
}

/// A fetched page after per-record validation.
#[derive(Debug, Default)]
pub struct ValidatedBatch {
    pub valid: Vec<PlayRecord>,
    /// Position in the fetched page and the reason it was rejected.
    pub dropped: Vec<(usize, RecordError)>,
}

/// Validates every raw record on its own; one bad record never rejects the batch.
pub fn validate_batch(raw: Vec<RawRecord>) -> ValidatedBatch {
    let mut batch = ValidatedBatch::default();
    for (pos, record) in raw.into_iter().enumerate() {
        match PlayRecord::try_from(record) {
            Ok(valid) => batch.valid.push(valid),
            Err(reason) => batch.dropped.push((pos, reason)),
        }
    }
    batch
}
