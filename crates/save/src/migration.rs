//! Import of progress kept in the legacy flat key-value preference store.
//!
//! Older builds stored a handful of integers under fixed keys:
//! `TotalCoins`, `HighScore` and one `Upgrade_<Kind>` per upgrade track.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use strum::IntoEnumIterator;
use tracing::{info, warn};

use crate::record::{SaveRecord, UpgradeKind};
use crate::writer::temp_path;

pub const COINS_KEY: &str = "TotalCoins";
pub const HIGH_SCORE_KEY: &str = "HighScore";
/// Set once legacy progress has been imported into a slot.
pub const MIGRATED_KEY: &str = "SaveMigrated";

pub fn upgrade_key(kind: UpgradeKind) -> String {
    format!("Upgrade_{}", kind)
}

/// Legacy flat key-value preference store.
pub trait LegacyPreferences: Send + Sync {
    fn get_int(&self, key: &str) -> Option<i64>;

    fn set_int(&self, key: &str, value: i64);
}

/// In-memory preference store for tests and hosts without legacy data.
#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    values: RwLock<HashMap<String, i64>>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        Self {
            values: RwLock::new(values.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }
}

impl LegacyPreferences for InMemoryPreferences {
    fn get_int(&self, key: &str) -> Option<i64> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    fn set_int(&self, key: &str, value: i64) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }
}

/// Preferences stored as a flat JSON object of integers.
///
/// A missing or unreadable file behaves as an empty store.
pub struct FilePreferences {
    path: PathBuf,
    values: InMemoryPreferences,
}

impl FilePreferences {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, i64>>(&bytes) {
                Ok(map) => InMemoryPreferences::with_values(map),
                Err(e) => {
                    warn!("Ignoring unreadable legacy preferences {}: {}", path.display(), e);
                    InMemoryPreferences::new()
                }
            },
            Err(_) => InMemoryPreferences::new(),
        };
        Self { path, values }
    }

    fn persist(&self) -> std::io::Result<()> {
        let snapshot = self
            .values
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let temp = temp_path(&self.path);
        fs::write(&temp, json)?;
        fs::rename(&temp, &self.path)
    }
}

impl LegacyPreferences for FilePreferences {
    fn get_int(&self, key: &str) -> Option<i64> {
        self.values.get_int(key)
    }

    fn set_int(&self, key: &str, value: i64) {
        self.values.set_int(key, value);
        if let Err(e) = self.persist() {
            warn!("Failed to persist legacy preferences {}: {}", self.path.display(), e);
        }
    }
}

/// Builds a [`SaveRecord`] from legacy preferences.
pub struct MigrationAdapter;

impl MigrationAdapter {
    /// Import legacy progress if any known key is present.
    ///
    /// Returns `None` when there is nothing to import or the import already
    /// happened for another slot.
    pub fn migrate(prefs: &dyn LegacyPreferences) -> Option<SaveRecord> {
        if prefs.get_int(MIGRATED_KEY).unwrap_or(0) != 0 {
            return None;
        }

        let mut found = false;
        let mut read = |key: &str| {
            let value = prefs.get_int(key);
            found |= value.is_some();
            value.unwrap_or(0).max(0)
        };

        let mut record = SaveRecord {
            coins: read(COINS_KEY) as u64,
            high_score: read(HIGH_SCORE_KEY) as u64,
            ..SaveRecord::default()
        };
        for kind in UpgradeKind::iter() {
            let level = read(&upgrade_key(kind)).min(i64::from(u32::MAX)) as u32;
            record.set_upgrade_level(kind, level);
        }

        if !found {
            return None;
        }

        info!(
            "Migrated legacy progress: coins={}, high_score={}, upgrades={}",
            record.coins,
            record.high_score,
            record.upgrades.len()
        );
        Some(record)
    }

    /// Record that legacy progress now lives in a slot file.
    pub fn mark_migrated(prefs: &dyn LegacyPreferences) {
        prefs.set_int(MIGRATED_KEY, 1);
    }
}
