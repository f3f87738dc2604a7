//! Play records.
//!
//! Two shapes exist:
//! - [`RawRecord`]: what a record source hands over. Every field is optional and
//!   loosely typed because the remote page is scraped and partial corruption is normal.
//! - [`PlayRecord`]: a record that passed structural validation, with typed fields.
//!
//! [`StoredRecord`] wraps a `PlayRecord` with its identity and sighting timestamps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::sync::domain::identity::IdentityKey;

// =====================================================================
// Enumerations
// =====================================================================

/// Chart difficulty, ordered from easiest to hardest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyTier {
    Basic,
    Advanced,
    Expert,
    Master,
    #[serde(rename = "remaster")]
    ReMaster,
}

impl DifficultyTier {
    pub const ALL: [DifficultyTier; 5] = [
        DifficultyTier::Basic,
        DifficultyTier::Advanced,
        DifficultyTier::Expert,
        DifficultyTier::Master,
        DifficultyTier::ReMaster,
    ];

    /// Stable lowercase token, used in identity keys and on disk.
    pub fn slug(self) -> &'static str {
        match self {
            DifficultyTier::Basic => "basic",
            DifficultyTier::Advanced => "advanced",
            DifficultyTier::Expert => "expert",
            DifficultyTier::Master => "master",
            DifficultyTier::ReMaster => "remaster",
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for DifficultyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DifficultyTier::Basic => "Basic",
            DifficultyTier::Advanced => "Advanced",
            DifficultyTier::Expert => "Expert",
            DifficultyTier::Master => "Master",
            DifficultyTier::ReMaster => "Re:Master",
        };
        f.write_str(label)
    }
}

impl FromStr for DifficultyTier {
    type Err = ();

    /// Accepts labels (`Re:Master`), slugs (`remaster`), portal icon names (`diff_master`)
    /// and positional indices (`0`..=`4`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .trim_start_matches("diff_")
            .chars()
            .filter(|c| !matches!(c, ':' | ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();

        if let Ok(index) = normalized.parse::<usize>() {
            return Self::from_index(index).ok_or(());
        }

        Self::ALL
            .into_iter()
            .find(|tier| tier.slug() == normalized)
            .ok_or(())
    }
}

/// Grade tier, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rank {
    D,
    C,
    B,
    BB,
    BBB,
    A,
    AA,
    AAA,
    S,
    #[serde(rename = "S+")]
    SPlus,
    SS,
    #[serde(rename = "SS+")]
    SSPlus,
    SSS,
    #[serde(rename = "SSS+")]
    SSSPlus,
}

impl Rank {
    const ALL: [Rank; 14] = [
        Rank::D,
        Rank::C,
        Rank::B,
        Rank::BB,
        Rank::BBB,
        Rank::A,
        Rank::AA,
        Rank::AAA,
        Rank::S,
        Rank::SPlus,
        Rank::SS,
        Rank::SSPlus,
        Rank::SSS,
        Rank::SSSPlus,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Rank::D => "D",
            Rank::C => "C",
            Rank::B => "B",
            Rank::BB => "BB",
            Rank::BBB => "BBB",
            Rank::A => "A",
            Rank::AA => "AA",
            Rank::AAA => "AAA",
            Rank::S => "S",
            Rank::SPlus => "S+",
            Rank::SS => "SS",
            Rank::SSPlus => "SS+",
            Rank::SSS => "SSS",
            Rank::SSSPlus => "SSS+",
        }
    }

    /// The grade the game awards for an achievement rate.
    pub fn from_achievement(achievement: Achievement) -> Self {
        const THRESHOLDS: [(u32, Rank); 13] = [
            (1_005_000, Rank::SSSPlus),
            (1_000_000, Rank::SSS),
            (995_000, Rank::SSPlus),
            (990_000, Rank::SS),
            (980_000, Rank::SPlus),
            (970_000, Rank::S),
            (940_000, Rank::AAA),
            (900_000, Rank::AA),
            (800_000, Rank::A),
            (750_000, Rank::BBB),
            (700_000, Rank::BB),
            (600_000, Rank::B),
            (500_000, Rank::C),
        ];

        THRESHOLDS
            .iter()
            .find(|(min, _)| achievement.0 >= *min)
            .map(|(_, rank)| *rank)
            .unwrap_or(Rank::D)
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Rank {
    type Err = ();

    /// Accepts `SSS+` as well as the portal icon spelling `sssp`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().trim_start_matches("music_icon_").to_ascii_uppercase();
        let label = match upper.strip_suffix('P') {
            Some(base) if base.starts_with('S') => format!("{base}+"),
            _ => upper,
        };
        Self::ALL
            .into_iter()
            .find(|rank| rank.label() == label)
            .ok_or(())
    }
}

/// Full-combo lamp. Absence means not achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FullCombo {
    #[serde(rename = "FC")]
    Fc,
    #[serde(rename = "FC+")]
    FcPlus,
    #[serde(rename = "AP")]
    Ap,
    #[serde(rename = "AP+")]
    ApPlus,
}

impl FullCombo {
    pub fn label(self) -> &'static str {
        match self {
            FullCombo::Fc => "FC",
            FullCombo::FcPlus => "FC+",
            FullCombo::Ap => "AP",
            FullCombo::ApPlus => "AP+",
        }
    }
}

impl FromStr for FullCombo {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches("fc_").to_ascii_lowercase().as_str() {
            "fc" => Ok(FullCombo::Fc),
            "fc+" | "fcp" => Ok(FullCombo::FcPlus),
            "ap" => Ok(FullCombo::Ap),
            "ap+" | "app" => Ok(FullCombo::ApPlus),
            _ => Err(()),
        }
    }
}

/// Full-sync lamp. Absence means not achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FullSync {
    #[serde(rename = "SYNC")]
    Sync,
    #[serde(rename = "FS")]
    Fs,
    #[serde(rename = "FS+")]
    FsPlus,
    #[serde(rename = "FDX")]
    Fdx,
    #[serde(rename = "FDX+")]
    FdxPlus,
}

impl FullSync {
    pub fn label(self) -> &'static str {
        match self {
            FullSync::Sync => "SYNC",
            FullSync::Fs => "FS",
            FullSync::FsPlus => "FS+",
            FullSync::Fdx => "FDX",
            FullSync::FdxPlus => "FDX+",
        }
    }
}

impl FromStr for FullSync {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let token = lowered
            .strip_prefix("fs_")
            .or_else(|| lowered.strip_prefix("sync_"))
            .unwrap_or(&lowered);
        match token {
            "sync" | "sp" => Ok(FullSync::Sync),
            "fs" => Ok(FullSync::Fs),
            "fs+" | "fsp" => Ok(FullSync::FsPlus),
            "fdx" | "fsd" => Ok(FullSync::Fdx),
            "fdx+" | "fdxp" | "fsdp" => Ok(FullSync::FdxPlus),
            _ => Err(()),
        }
    }
}

// =====================================================================
// Achievement
// =====================================================================

/// Achievement rate as fixed-point ten-thousandths of a percent (`100.5000%` = `1_005_000`).
///
/// Valid range is `[0, 101)`. Values of 100% and above are legitimate and are kept as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Achievement(u32);

impl Achievement {
    pub const SCALE: u32 = 10_000;
    pub const MAX_EXCLUSIVE: u32 = 101 * Self::SCALE;

    pub fn from_raw(units: u32) -> Option<Self> {
        (units < Self::MAX_EXCLUSIVE).then_some(Achievement(units))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn percent(self) -> f64 {
        f64::from(self.0) / f64::from(Self::SCALE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AchievementParseError {
    Malformed,
    OutOfRange,
}

impl FromStr for Achievement {
    type Err = AchievementParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim().trim_end_matches('%').trim();
        let (int_part, frac_part) = text.split_once('.').unwrap_or((text, ""));

        let digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
        if int_part.is_empty() || !digits(int_part) || !digits(frac_part) || frac_part.len() > 4 {
            return Err(AchievementParseError::Malformed);
        }

        let whole: u32 = int_part
            .parse()
            .map_err(|_| AchievementParseError::OutOfRange)?;
        let frac: u32 = format!("{frac_part:0<4}")
            .parse()
            .map_err(|_| AchievementParseError::Malformed)?;

        whole
            .checked_mul(Self::SCALE)
            .and_then(|w| w.checked_add(frac))
            .and_then(Self::from_raw)
            .ok_or(AchievementParseError::OutOfRange)
    }
}

impl fmt::Display for Achievement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:04}", self.0 / Self::SCALE, self.0 % Self::SCALE)
    }
}

impl Serialize for Achievement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Achievement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid achievement {text:?}")))
    }
}

// =====================================================================
// Raw (wire) record
// =====================================================================

/// A record exactly as a source produced it.
///
/// Field aliases cover the names used by the capture scripts' JSON dumps.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawRecord {
    #[serde(default, alias = "trackId", alias = "track_id", alias = "idx", deserialize_with = "lenient_text")]
    pub remote_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: Option<String>,
    #[serde(default, alias = "diff", alias = "level_index", deserialize_with = "lenient_text")]
    pub difficulty: Option<String>,
    #[serde(default, alias = "level_label", deserialize_with = "lenient_text")]
    pub level: Option<String>,
    #[serde(default, alias = "percentage", alias = "achievements", deserialize_with = "lenient_text")]
    pub achievement: Option<String>,
    #[serde(default, alias = "rate", deserialize_with = "lenient_text")]
    pub rank: Option<String>,
    #[serde(default, alias = "dxscore", alias = "dxScore", deserialize_with = "lenient_text")]
    pub dx_score: Option<String>,
    #[serde(default, alias = "dxScoreMax", deserialize_with = "lenient_text")]
    pub dx_score_max: Option<String>,
    #[serde(default, alias = "fc", deserialize_with = "lenient_text")]
    pub full_combo: Option<String>,
    #[serde(default, alias = "fs", deserialize_with = "lenient_text")]
    pub full_sync: Option<String>,
    #[serde(default, alias = "dx", deserialize_with = "lenient_flag")]
    pub alternate_chart: bool,
    #[serde(default, alias = "new_record", alias = "isNewRecord", deserialize_with = "lenient_flag")]
    pub personal_best: bool,
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    use serde_json::Value;

    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(other) => Some(other.to_string()),
    })
}

fn lenient_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    use serde_json::Value;

    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => {
            let s = s.trim().to_ascii_lowercase();
            !(s.is_empty() || s == "false" || s == "0" || s == "standard")
        }
        Some(_) => true,
    })
}

// =====================================================================
// Validated record
// =====================================================================

/// Why a raw record was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing title")]
    MissingTitle,
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("{field}: cannot parse {value:?}")]
    Unparseable { field: &'static str, value: String },
    #[error("{field}: {value} is out of range")]
    OutOfRange { field: &'static str, value: String },
}

fn unparseable(field: &'static str, value: &str) -> RecordError {
    RecordError::Unparseable {
        field,
        value: value.to_string(),
    }
}

/// Trims and maps blank strings to `None`.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub title: String,
    pub difficulty: DifficultyTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    pub achievement: Achievement,
    pub rank: Rank,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dx_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dx_score_max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_combo: Option<FullCombo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_sync: Option<FullSync>,
    #[serde(default)]
    pub is_alternate_chart: bool,
    #[serde(default)]
    pub is_personal_best: bool,
}

impl TryFrom<RawRecord> for PlayRecord {
    type Error = RecordError;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        let title = present(&raw.title).ok_or(RecordError::MissingTitle)?.to_string();

        let difficulty_text = present(&raw.difficulty).ok_or(RecordError::MissingField("difficulty"))?;
        let difficulty = difficulty_text
            .parse::<DifficultyTier>()
            .map_err(|_| unparseable("difficulty", difficulty_text))?;

        let achievement_text =
            present(&raw.achievement).ok_or(RecordError::MissingField("achievement"))?;
        let achievement = achievement_text
            .parse::<Achievement>()
            .map_err(|e| match e {
                AchievementParseError::Malformed => unparseable("achievement", achievement_text),
                AchievementParseError::OutOfRange => RecordError::OutOfRange {
                    field: "achievement",
                    value: achievement_text.to_string(),
                },
            })?;

        let rank = match present(&raw.rank) {
            Some(text) => text.parse::<Rank>().map_err(|_| unparseable("rank", text))?,
            None => Rank::from_achievement(achievement),
        };

        let (dx_score, embedded_max) = match present(&raw.dx_score) {
            Some(text) => {
                let (score, max) = parse_dx_score(text).ok_or_else(|| unparseable("dx_score", text))?;
                (Some(score), max)
            }
            None => (None, None),
        };

        let dx_score_max = match present(&raw.dx_score_max) {
            Some(text) => Some(parse_count(text).ok_or_else(|| unparseable("dx_score_max", text))?),
            None => embedded_max,
        };

        let full_combo = present(&raw.full_combo)
            .map(|text| text.parse::<FullCombo>().map_err(|_| unparseable("full_combo", text)))
            .transpose()?;

        let full_sync = present(&raw.full_sync)
            .map(|text| text.parse::<FullSync>().map_err(|_| unparseable("full_sync", text)))
            .transpose()?;

        Ok(PlayRecord {
            remote_id: present(&raw.remote_id).map(str::to_string),
            title,
            difficulty,
            level: present(&raw.level).map(str::to_string),
            achievement,
            rank,
            dx_score,
            dx_score_max,
            full_combo,
            full_sync,
            is_alternate_chart: raw.alternate_chart,
            is_personal_best: raw.personal_best,
        })
    }
}

/// `"1,234"` or `"1234 / 2000"`.
fn parse_dx_score(text: &str) -> Option<(u32, Option<u32>)> {
    match text.split_once('/') {
        Some((score, max)) => Some((parse_count(score)?, Some(parse_count(max)?))),
        None => Some((parse_count(text)?, None)),
    }
}

fn parse_count(text: &str) -> Option<u32> {
    let cleaned: String = text.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    cleaned.parse().ok()
}

// =====================================================================
// Stored record
// =====================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub identity_key: IdentityKey,
    pub record: PlayRecord,
    /// Set once when the record is first merged.
    pub first_seen_at: DateTime<Utc>,
    /// Bumped on every later sighting.
    pub last_seen_at: DateTime<Utc>,
}
