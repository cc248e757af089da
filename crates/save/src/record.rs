//! The persisted player record and its on-disk JSON shape.
//!
//! [`SaveRecord`] is the in-memory form used by the store. [`SaveFile`] is
//! the wire form written to `slot_<n>/savegame.json`; it carries the checksum
//! and stores upgrades as a list of `{ "type", "level" }` entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::IntegrityError;

/// Schema version written by this crate.
pub const CURRENT_VERSION: u32 = 1;

/// Language used by fresh and reset records.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Purchasable upgrade tracks.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
pub enum UpgradeKind {
    Magnet,
    Shield,
    DoubleCoins,
    ExtraLife,
    SpeedBoost,
}

/// One player's progress and settings for a single slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRecord {
    pub version: u32,
    pub coins: u64,
    pub high_score: u64,
    /// Absent key means level 0; level 0 is never stored.
    pub upgrades: BTreeMap<UpgradeKind, u32>,
    pub music_volume: f32,
    pub effects_volume: f32,
    pub language: String,
    pub hardcore_mode: bool,
}

impl Default for SaveRecord {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            coins: 0,
            high_score: 0,
            upgrades: BTreeMap::new(),
            music_volume: 1.0,
            effects_volume: 1.0,
            language: DEFAULT_LANGUAGE.to_string(),
            hardcore_mode: false,
        }
    }
}

impl SaveRecord {
    pub fn upgrade_level(&self, kind: UpgradeKind) -> u32 {
        self.upgrades.get(&kind).copied().unwrap_or(0)
    }

    pub fn set_upgrade_level(&mut self, kind: UpgradeKind, level: u32) {
        if level == 0 {
            self.upgrades.remove(&kind);
        } else {
            self.upgrades.insert(kind, level);
        }
    }

    /// Build the wire form, stamping it with `checksum`.
    pub(crate) fn to_file(&self, checksum: String) -> SaveFile {
        SaveFile {
            version: Some(self.version),
            coins: self.coins,
            high_score: self.high_score,
            upgrades: self
                .upgrades
                .iter()
                .map(|(&kind, &level)| UpgradeEntry { kind, level })
                .collect(),
            music_volume: self.music_volume,
            effects_volume: self.effects_volume,
            language: self.language.clone(),
            hardcore_mode: self.hardcore_mode,
            checksum,
        }
    }
}

/// Clamp a volume into `[0, 1]`, mapping NaN to silence.
pub fn clamp_volume(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A single upgrade entry as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeEntry {
    #[serde(rename = "type")]
    pub kind: UpgradeKind,
    pub level: u32,
}

/// On-disk representation of a slot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveFile {
    /// Optional only so a missing version can be reported as an integrity
    /// failure instead of a generic parse error.
    #[serde(default)]
    pub version: Option<u32>,
    pub coins: u64,
    pub high_score: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub upgrades: Vec<UpgradeEntry>,
    pub music_volume: f32,
    pub effects_volume: f32,
    pub language: String,
    pub hardcore_mode: bool,
    #[serde(default)]
    pub checksum: String,
}

impl SaveFile {
    /// Validate every field and convert into the in-memory record.
    ///
    /// Does not look at the checksum; that is the integrity guard's job.
    pub fn into_record(self) -> Result<SaveRecord, IntegrityError> {
        let version = self.version.ok_or(IntegrityError::InvalidField {
            field: "version",
            reason: "missing".to_string(),
        })?;
        if version == 0 {
            return Err(IntegrityError::InvalidField {
                field: "version",
                reason: "must be positive".to_string(),
            });
        }

        check_volume("musicVolume", self.music_volume)?;
        check_volume("effectsVolume", self.effects_volume)?;

        if self.language.trim().is_empty() {
            return Err(IntegrityError::InvalidField {
                field: "language",
                reason: "empty".to_string(),
            });
        }

        let mut upgrades = BTreeMap::new();
        for entry in self.upgrades {
            if upgrades.insert(entry.kind, entry.level).is_some() {
                return Err(IntegrityError::InvalidField {
                    field: "upgrades",
                    reason: format!("duplicate entry for {}", entry.kind),
                });
            }
        }
        upgrades.retain(|_, level| *level > 0);

        Ok(SaveRecord {
            version,
            coins: self.coins,
            high_score: self.high_score,
            upgrades,
            music_volume: self.music_volume,
            effects_volume: self.effects_volume,
            language: self.language,
            hardcore_mode: self.hardcore_mode,
        })
    }
}

fn check_volume(field: &'static str, value: f32) -> Result<(), IntegrityError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(IntegrityError::InvalidField {
            field,
            reason: format!("{value} is outside [0, 1]"),
        })
    }
}

/// Treat `null` the same as an absent list.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}
