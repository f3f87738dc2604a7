//! Sync cycle engine.
//!
//! One call to [`SyncEngine::run_once`] is one complete cycle:
//!
//! 1. read the current token (refuse to run on an invalidated one),
//! 2. fetch under a hard timeout,
//! 3. validate each raw record, dropping and logging the bad ones,
//! 4. merge the valid ones into the history and count the cycle, in one write,
//! 5. persist a renewed credential, strictly after the merge is durable.
//!
//! # Architecture guarantees
//! * **Single await point**: only the fetch awaits. Validation, merge and rotation are
//!   synchronous, so dropping the future (shutdown) can only cancel an in-flight fetch.
//! * **Auth never retries**: a rejected credential is durably marked and the engine
//!   stays `Halted` across restarts until [`SyncEngine::replace_token`] is called.
//! * **No rotation without merge**: if the merge write fails, the renewed credential
//!   is discarded along with the cycle. A transient fetch failure merges nothing,
//!   so a credential rotated by that response is persisted before the error returns.

mod logic;

#[cfg(test)]
mod tests;

pub use logic::{advance, validate_batch, PhaseEvent, ValidatedBatch};

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Result, SyncError};
use crate::sync::domain::SessionToken;
use crate::sync::source::RecordSource;
use crate::sync::store::{HistoryStore, TokenStore};
use crate::sync::types::{CycleOutcome, CyclePhase};

type Clock = Box<dyn FnMut() -> DateTime<Utc> + Send>;

pub struct SyncEngine<S> {
    tokens: TokenStore,
    history: HistoryStore,
    source: S,
    fetch_timeout: Duration,
    phase: CyclePhase,
    clock: Clock,
}

impl<S: RecordSource> SyncEngine<S> {
    /// Starts `Halted` when the stored token was already rejected in an earlier run.
    pub fn new(tokens: TokenStore, history: HistoryStore, source: S, fetch_timeout: Duration) -> Self {
        let phase = match tokens.current() {
            Ok(token) if token.is_invalidated() => CyclePhase::Halted,
            _ => CyclePhase::Idle,
        };

        Self {
            tokens,
            history,
            source,
            fetch_timeout,
            phase,
            clock: Box::new(Utc::now),
        }
    }

    /// Replaces the wall clock used for observation and rotation timestamps.
    pub fn with_clock(mut self, clock: impl FnMut() -> DateTime<Utc> + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    #[cfg(test)]
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Returns the engine to `Idle` after an in-flight fetch was dropped.
    pub fn abandon_cycle(&mut self) {
        if self.phase == CyclePhase::Fetching {
            self.phase = advance(self.phase, PhaseEvent::Failed);
        }
    }

    /// Operator recovery: store a fresh credential and leave `Halted`.
    pub fn replace_token(&mut self, token: SessionToken) -> Result<bool> {
        let wrote = self.tokens.replace(token)?;
        self.phase = advance(self.phase, PhaseEvent::TokenReplaced);
        Ok(wrote)
    }

    /// Runs one cycle. Never panics on remote or disk failures; they come back in the outcome.
    pub async fn run_once(&mut self) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();

        if let Err(err) = self.cycle(&mut outcome).await {
            self.on_failure(&err);
            log::error!("[ENGINE] cycle failed ({}): {}", self.phase, err);
            outcome.error = Some(err);
        }

        outcome
    }

    async fn cycle(&mut self, outcome: &mut CycleOutcome) -> Result<()> {
        // 1) Token
        let token = self.tokens.current()?;
        if let Some(invalidated_at) = token.invalidated_at {
            self.phase = CyclePhase::Halted;
            return Err(SyncError::Halted {
                subject_id: token.subject_id.clone(),
                invalidated_at,
            });
        }

        self.phase = advance(self.phase, PhaseEvent::Started);
        log::info!(
            "[ENGINE] cycle start: subject {} credential {}",
            token.subject_id,
            token.redacted_credential()
        );

        // 2) Fetch
        let fetched = match tokio::time::timeout(self.fetch_timeout, self.source.fetch(&token)).await {
            Ok(Ok(fetched)) => fetched,
            Ok(Err(err)) => {
                // The failed response may still have rotated the credential.
                if let Some(credential) = err.renewed_credential().filter(|c| *c != token.credential) {
                    log::warn!("[ENGINE] fetch failed after the credential rotated: {}", err);
                    let now = (self.clock)();
                    outcome.token_rotated =
                        self.tokens.replace(token.rotated(credential.to_string(), now))?;
                }
                return Err(err.into());
            }
            Err(_) => return Err(SyncError::Timeout(self.fetch_timeout)),
        };
        let now = (self.clock)();

        // 3) Validate
        let batch = validate_batch(fetched.records);
        for (pos, reason) in &batch.dropped {
            log::warn!("[ENGINE] dropped record #{}: {}", pos, reason);
        }
        outcome.dropped = batch.dropped.len();
        self.phase = advance(self.phase, PhaseEvent::Fetched);

        // 4) Merge, counting the cycle in the same write
        let merged = self.history.commit_cycle(batch.valid, now)?;
        outcome.added = merged.added;
        outcome.seen = merged.seen;
        self.phase = advance(self.phase, PhaseEvent::Merged);

        // 5) Rotate, only once the merge is durable
        if let Some(credential) = fetched
            .renewed_credential
            .filter(|c| *c != token.credential)
        {
            outcome.token_rotated = self.tokens.replace(token.rotated(credential, now))?;
        }
        self.phase = advance(self.phase, PhaseEvent::Rotated);

        log::info!("[ENGINE] cycle #{} done: {}", self.history.cycle_count(), outcome);
        Ok(())
    }

    fn on_failure(&mut self, err: &SyncError) {
        match err {
            SyncError::Auth(_) => {
                let now = (self.clock)();
                if let Err(persist_err) = self.tokens.invalidate(now) {
                    log::error!("[ENGINE] could not record token invalidation: {}", persist_err);
                }
                self.phase = advance(self.phase, PhaseEvent::AuthRejected);
            }
            SyncError::Halted { .. } => {}
            _ => self.phase = advance(self.phase, PhaseEvent::Failed),
        }
    }
}
