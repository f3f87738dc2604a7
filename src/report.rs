//! Read-only views over the stored history.
//!
//! Everything here reads the last durable state; nothing writes to the history.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::persistence;
use crate::sync::domain::{Achievement, DifficultyTier, StoredRecord};
use crate::sync::store::HistoryStore;

const NONE_LABEL: &str = "-";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub total_records: usize,
    /// Distinct (title, difficulty) pairs.
    pub distinct_charts: usize,
    pub average_achievement: Option<Achievement>,
    pub best_achievement: Option<Achievement>,
    pub cycle_count: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
}

pub fn overview(store: &HistoryStore) -> Overview {
    let records = store.all();

    let distinct_charts = records
        .iter()
        .map(|s| (s.record.title.as_str(), s.record.difficulty))
        .collect::<HashSet<_>>()
        .len();

    let average_achievement = if records.is_empty() {
        None
    } else {
        let sum: u64 = records.iter().map(|s| u64::from(s.record.achievement.raw())).sum();
        u32::try_from(sum / records.len() as u64)
            .ok()
            .and_then(Achievement::from_raw)
    };

    Overview {
        total_records: records.len(),
        distinct_charts,
        average_achievement,
        best_achievement: records.iter().map(|s| s.record.achievement).max(),
        cycle_count: store.cycle_count(),
        last_sync_at: store.last_sync_at(),
    }
}

/// The `limit` most recently discovered records, newest first.
pub fn recent(store: &HistoryStore, limit: usize) -> Vec<&StoredRecord> {
    let mut records: Vec<_> = store.all().iter().collect();
    // Stable sort keeps insertion order among equal timestamps; reverse makes newest first.
    records.sort_by_key(|s| s.first_seen_at);
    records.into_iter().rev().take(limit).collect()
}

/// Highest achievement per chart, best first.
pub fn best(store: &HistoryStore, limit: usize) -> Vec<&StoredRecord> {
    let mut per_chart: HashMap<(&str, DifficultyTier), &StoredRecord> = HashMap::new();
    for stored in store.all() {
        let chart = (stored.record.title.as_str(), stored.record.difficulty);
        per_chart
            .entry(chart)
            .and_modify(|current| {
                if stored.record.achievement > current.record.achievement {
                    *current = stored;
                }
            })
            .or_insert(stored);
    }

    let mut best: Vec<_> = per_chart.into_values().collect();
    best.sort_by(|a, b| {
        b.record
            .achievement
            .cmp(&a.record.achievement)
            .then_with(|| a.record.title.cmp(&b.record.title))
            .then_with(|| a.record.difficulty.cmp(&b.record.difficulty))
    });
    best.truncate(limit);
    best
}

/// Case-insensitive substring match on the title.
pub fn search<'a>(store: &'a HistoryStore, needle: &str) -> Vec<&'a StoredRecord> {
    let needle = needle.to_lowercase();
    store
        .all()
        .iter()
        .filter(|s| s.record.title.to_lowercase().contains(&needle))
        .collect()
}

/// Record count for every tier, including empty ones.
pub fn difficulty_distribution(store: &HistoryStore) -> Vec<(DifficultyTier, usize)> {
    DifficultyTier::ALL
        .iter()
        .map(|&tier| (tier, store.filter_by_difficulty(tier).count()))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LampDistribution {
    pub full_combo: BTreeMap<String, usize>,
    pub full_sync: BTreeMap<String, usize>,
}

/// Full-combo and full-sync lamp counts; `-` counts records without a lamp.
pub fn lamp_distribution(store: &HistoryStore) -> LampDistribution {
    let mut dist = LampDistribution::default();
    for stored in store.all() {
        let fc = stored.record.full_combo.map_or(NONE_LABEL, |l| l.label());
        let fs = stored.record.full_sync.map_or(NONE_LABEL, |l| l.label());
        *dist.full_combo.entry(fc.to_string()).or_default() += 1;
        *dist.full_sync.entry(fs.to_string()).or_default() += 1;
    }
    dist
}

#[derive(Debug, Serialize)]
struct Export<'a> {
    exported_at: DateTime<Utc>,
    cycle_count: u64,
    last_sync_at: Option<DateTime<Utc>>,
    record_count: usize,
    records: &'a [StoredRecord],
}

/// Writes every stored record to `out` as one JSON document. Returns the record count.
pub fn export_json(store: &HistoryStore, out: &Path, now: DateTime<Utc>) -> Result<usize> {
    let export = Export {
        exported_at: now,
        cycle_count: store.cycle_count(),
        last_sync_at: store.last_sync_at(),
        record_count: store.count(),
        records: store.all(),
    };
    persistence::write_json_atomic(out, &export)?;
    log::info!("[REPORT] exported {} records to {}", export.record_count, out.display());
    Ok(export.record_count)
}
