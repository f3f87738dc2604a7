//! Keeps a local, append-only copy of a maimai portal play history in sync.
//!
//! The portal only shows a rolling window of recent plays, authenticated by a
//! credential it rotates on every response. Each sync cycle fetches that window,
//! merges new records into a durable history file, and persists the rotated
//! credential so the next cycle can authenticate.

pub mod config;
pub mod error;
pub mod persistence;
pub mod report;
pub mod sync;

pub use config::{ConfigOverrides, SyncConfig};
pub use error::{Result, Severity, SyncError};
pub use sync::domain::{PlayRecord, SessionToken, StoredRecord};
pub use sync::engine::SyncEngine;
pub use sync::runtime::{RunStatus, Scheduler, SchedulerExit};
pub use sync::source::{PortalSource, RecordSource};
pub use sync::store::{HistoryStore, TokenStore};
pub use sync::types::{CycleOutcome, CyclePhase};

/// Opens both stores and wires an engine over the given source.
///
/// The engine owns the state files, so this is also where leftovers of writes
/// interrupted by a crash are swept. Read-only commands open the stores directly.
pub fn open_engine<S: RecordSource>(config: &SyncConfig, source: S) -> Result<SyncEngine<S>> {
    persistence::discard_leftovers(&config.token_path());
    persistence::discard_leftovers(&config.history_path());

    let tokens = TokenStore::open(config.token_path())?;
    let history = HistoryStore::open(config.history_path())?;
    Ok(SyncEngine::new(tokens, history, source, config.fetch_timeout()))
}
