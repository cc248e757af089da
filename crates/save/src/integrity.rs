//! Tamper detection for slot payloads.
//!
//! The checksum is a SHA-256 digest over a canonical JSON rendering of every
//! record field except the checksum itself. Field order is fixed by the
//! [`Canonical`] struct and upgrades are ordered by kind, so equal records
//! always hash to the same value.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::IntegrityError;
use crate::record::{SaveFile, SaveRecord, UpgradeEntry};

#[derive(Serialize)]
struct Canonical<'a> {
    version: u32,
    coins: u64,
    high_score: u64,
    upgrades: Vec<UpgradeEntry>,
    music_volume: f32,
    effects_volume: f32,
    language: &'a str,
    hardcore_mode: bool,
}

/// Computes and verifies record checksums.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityGuard;

impl IntegrityGuard {
    /// Hex-encoded SHA-256 over the canonical plaintext form of `record`.
    pub fn compute_checksum(record: &SaveRecord) -> String {
        let canonical = Canonical {
            version: record.version,
            coins: record.coins,
            high_score: record.high_score,
            upgrades: record
                .upgrades
                .iter()
                .map(|(&kind, &level)| UpgradeEntry { kind, level })
                .collect(),
            music_volume: record.music_volume,
            effects_volume: record.effects_volume,
            language: &record.language,
            hardcore_mode: record.hardcore_mode,
        };

        // Infallible: string keys and plain values only.
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Whether the stored checksum matches `record`.
    pub fn verify(record: &SaveRecord, stored: &str) -> bool {
        Self::compute_checksum(record) == stored
    }

    /// Validate a parsed slot file and return its record.
    pub fn check(file: SaveFile) -> Result<SaveRecord, IntegrityError> {
        let stored = file.checksum.clone();
        let record = file.into_record()?;

        let computed = Self::compute_checksum(&record);
        if computed != stored {
            return Err(IntegrityError::ChecksumMismatch { stored, computed });
        }
        Ok(record)
    }
}
