use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::persistence;
use crate::sync::domain::{identity_of, DifficultyTier, IdentityKey, PlayRecord, StoredRecord};
use crate::sync::types::MergeResult;

const FORMAT_VERSION: u32 = 1;

/// On-disk layout of the history file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryFile {
    version: u32,
    cycle_count: u64,
    #[serde(default)]
    last_sync_at: Option<DateTime<Utc>>,
    records: Vec<StoredRecord>,
}

impl Default for HistoryFile {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            cycle_count: 0,
            last_sync_at: None,
            records: Vec::new(),
        }
    }
}

/// Append-only, insertion-ordered set of stored records, unique by identity key.
///
/// Mutations are staged on a copy of the state, written with the atomic
/// temp-then-rename discipline, and only then swapped in. A failed write leaves
/// both the file and the in-memory view at the pre-call state.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    state: HistoryFile,
    /// identity key -> position in `state.records`
    index: HashMap<IdentityKey, usize>,
}

impl HistoryStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let state: HistoryFile = persistence::load_json(&path)?.unwrap_or_default();
        if state.version != FORMAT_VERSION {
            return Err(SyncError::corrupt(
                &path,
                format!("unsupported history format version {}", state.version),
            ));
        }

        let mut index = HashMap::with_capacity(state.records.len());
        for (pos, stored) in state.records.iter().enumerate() {
            if index.insert(stored.identity_key.clone(), pos).is_some() {
                return Err(SyncError::corrupt(
                    &path,
                    format!("duplicate identity key {}", stored.identity_key),
                ));
            }
        }

        log::info!(
            "[HISTORY] opened {} ({} records, {} cycles)",
            path.display(),
            state.records.len(),
            state.cycle_count
        );

        Ok(Self { path, state, index })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends unknown records and refreshes `last_seen_at` of known ones, then persists.
    ///
    /// Existing records are never reordered, removed, or rewritten beyond `last_seen_at`.
    pub fn merge<I>(&mut self, records: I, observed_at: DateTime<Utc>) -> Result<MergeResult>
    where
        I: IntoIterator<Item = PlayRecord>,
    {
        let mut next = self.state.clone();
        let mut index = self.index.clone();
        let result = merge_into(&mut next, &mut index, records, observed_at);

        if result.added == 0 && result.seen == 0 {
            return Ok(result);
        }

        self.commit(next, index)?;
        log::debug!(
            "[HISTORY] merged: {} added, {} seen, {} total",
            result.added,
            result.seen,
            self.state.records.len()
        );
        Ok(result)
    }

    /// Merges one cycle's records and counts the cycle in a single durable write.
    ///
    /// Either the records and the counters land together or neither does.
    pub fn commit_cycle<I>(&mut self, records: I, at: DateTime<Utc>) -> Result<MergeResult>
    where
        I: IntoIterator<Item = PlayRecord>,
    {
        let mut next = self.state.clone();
        let mut index = self.index.clone();
        let result = merge_into(&mut next, &mut index, records, at);
        next.cycle_count += 1;
        next.last_sync_at = Some(at);

        self.commit(next, index)?;
        log::debug!(
            "[HISTORY] cycle {}: {} added, {} seen, {} total",
            self.state.cycle_count,
            result.added,
            result.seen,
            self.state.records.len()
        );
        Ok(result)
    }

    fn commit(&mut self, next: HistoryFile, index: HashMap<IdentityKey, usize>) -> Result<()> {
        persistence::write_json_atomic(&self.path, &next)?;
        self.state = next;
        self.index = index;
        Ok(())
    }

    // ================================
    // Projections
    // ================================

    pub fn all(&self) -> &[StoredRecord] {
        &self.state.records
    }

    pub fn count(&self) -> usize {
        self.state.records.len()
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&StoredRecord> {
        self.index.get(key).map(|&pos| &self.state.records[pos])
    }

    pub fn filter_by_difficulty(&self, tier: DifficultyTier) -> impl Iterator<Item = &StoredRecord> {
        self.state
            .records
            .iter()
            .filter(move |stored| stored.record.difficulty == tier)
    }

    pub fn cycle_count(&self) -> u64 {
        self.state.cycle_count
    }

    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        self.state.last_sync_at
    }
}

fn merge_into<I>(
    state: &mut HistoryFile,
    index: &mut HashMap<IdentityKey, usize>,
    records: I,
    observed_at: DateTime<Utc>,
) -> MergeResult
where
    I: IntoIterator<Item = PlayRecord>,
{
    let mut result = MergeResult::default();
    for record in records {
        let key = identity_of(&record);
        match index.get(&key) {
            Some(&pos) => {
                let stored = &mut state.records[pos];
                stored.last_seen_at = stored.last_seen_at.max(observed_at);
                result.seen += 1;
            }
            None => {
                log::debug!("[HISTORY] new record {} ({})", key, record.title);
                index.insert(key.clone(), state.records.len());
                state.records.push(StoredRecord {
                    identity_key: key,
                    record,
                    first_seen_at: observed_at,
                    last_seen_at: observed_at,
                });
                result.added += 1;
            }
        }
    }
    result
}
