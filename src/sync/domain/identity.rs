//! Record identity: the deduplication key for play records.
//!
//! Policy:
//! 1. **Remote id present** -> `id:<difficulty>:<remote id>`. The portal reuses one id per
//!    chart across difficulties, so the id alone is not unique.
//! 2. **Remote id absent** -> `digest:<sha256 hex>` over title, difficulty, achievement and
//!    DX score.
//!
//! The fallback is best effort. The portal exposes no play time precise enough to tell two
//! distinct plays apart, so two plays of the same chart with an identical score collapse
//! into one stored record. Sighting time (`observed_at`) is never part of the key.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::sync::domain::record::PlayRecord;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the key came from the digest fallback rather than a remote id.
    pub fn is_fallback(&self) -> bool {
        self.0.starts_with("digest:")
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Field separator for the digest input; cannot occur in scraped text.
const SEP: [u8; 1] = [0x1f];

pub fn identity_of(record: &PlayRecord) -> IdentityKey {
    if let Some(remote_id) = &record.remote_id {
        return IdentityKey(format!("id:{}:{}", record.difficulty.slug(), remote_id));
    }

    let mut hasher = Sha256::new();
    hasher.update(record.title.as_bytes());
    hasher.update(SEP);
    hasher.update(record.difficulty.slug().as_bytes());
    hasher.update(SEP);
    hasher.update(record.achievement.raw().to_be_bytes());
    hasher.update(SEP);
    match record.dx_score {
        Some(score) => hasher.update(score.to_be_bytes()),
        None => hasher.update(b"-"),
    }

    IdentityKey(format!("digest:{}", hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::domain::record::{DifficultyTier, FullCombo, Rank};

    fn record(remote_id: Option<&str>) -> PlayRecord {
        PlayRecord {
            remote_id: remote_id.map(str::to_string),
            title: "BREaK! BREaK! BREaK!".into(),
            difficulty: DifficultyTier::Master,
            level: Some("13+".into()),
            achievement: "99.7012".parse().unwrap(),
            rank: Rank::SSPlus,
            dx_score: Some(2011),
            dx_score_max: Some(2361),
            full_combo: None,
            full_sync: None,
            is_alternate_chart: true,
            is_personal_best: false,
        }
    }

    #[test]
    fn remote_id_key_ignores_other_fields() {
        let a = record(Some("834"));
        let mut b = record(Some("834"));
        b.achievement = "100.1000".parse().unwrap();
        b.full_combo = Some(FullCombo::Ap);
        b.title = "renamed".into();

        assert_eq!(identity_of(&a), identity_of(&b));
        assert_eq!(identity_of(&a).as_str(), "id:master:834");
        assert!(!identity_of(&a).is_fallback());
    }

    #[test]
    fn remote_id_is_scoped_by_difficulty() {
        let a = record(Some("834"));
        let mut b = record(Some("834"));
        b.difficulty = DifficultyTier::ReMaster;
        assert_ne!(identity_of(&a), identity_of(&b));
    }

    #[test]
    fn fallback_digest_is_deterministic() {
        let a = record(None);
        let b = record(None);
        let key = identity_of(&a);
        assert_eq!(key, identity_of(&b));
        assert!(key.is_fallback());
        assert_eq!(key.as_str().len(), "digest:".len() + 64);
    }

    #[test]
    fn fallback_digest_separates_scores_and_charts() {
        let base = identity_of(&record(None));

        let mut other_score = record(None);
        other_score.achievement = "99.7013".parse().unwrap();
        assert_ne!(base, identity_of(&other_score));

        let mut no_dx = record(None);
        no_dx.dx_score = None;
        assert_ne!(base, identity_of(&no_dx));

        let mut other_tier = record(None);
        other_tier.difficulty = DifficultyTier::Expert;
        assert_ne!(base, identity_of(&other_tier));
    }

    #[test]
    fn fallback_ignores_presentation_fields() {
        let mut lamps = record(None);
        lamps.full_combo = Some(FullCombo::Fc);
        lamps.is_personal_best = true;
        lamps.level = None;
        assert_eq!(identity_of(&record(None)), identity_of(&lamps));
    }
}
