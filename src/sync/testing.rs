//! Builders shared by the unit tests.

use chrono::{DateTime, TimeZone, Utc};

use crate::sync::domain::{DifficultyTier, PlayRecord, RawRecord};

pub fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap()
}

pub fn raw(remote_id: &str, title: &str, achievement: &str) -> RawRecord {
    RawRecord {
        remote_id: Some(remote_id.into()),
        title: Some(title.into()),
        difficulty: Some("master".into()),
        level: Some("13".into()),
        achievement: Some(achievement.into()),
        dx_score: Some("1800".into()),
        ..Default::default()
    }
}

/// Five distinct, valid records.
pub fn raw_batch() -> Vec<RawRecord> {
    vec![
        raw("101", "Oshama Scramble!", "100.5123"),
        raw("102", "Garakuta Doll Play", "99.0000"),
        raw("103", "Link", "97.4400"),
        raw("104", "Panopticon", "100.0000"),
        raw("105", "Sweets Time", "80.0001"),
    ]
}

pub fn play(remote_id: Option<&str>, title: &str, tier: DifficultyTier, achievement: &str) -> PlayRecord {
    let mut r = raw(remote_id.unwrap_or_default(), title, achievement);
    if remote_id.is_none() {
        r.remote_id = None;
    }
    r.difficulty = Some(tier.slug().into());
    PlayRecord::try_from(r).unwrap()
}
