//! Persistent, tamper-evident player save storage.
//!
//! The crate keeps a player's progress and settings in memory and mirrors
//! them to one JSON file per save slot:
//!
//! - [`SaveDataStore`] - typed getters/setters, slot switching, bounded flush
//! - [`WriteScheduler`] - debounced, coalescing background writes with retry
//! - [`IntegrityGuard`] - SHA-256 checksum over the canonical record
//! - [`EncryptionProvider`] - optional AES-256-CBC envelope
//! - [`AtomicFileWriter`] - temp-file-then-rename persistence
//! - [`MigrationAdapter`] - one-time import from legacy preferences
//!
//! Setters never block on disk I/O. Writes run on the blocking pool and at
//! most one is in flight per store.
pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod integrity;
pub mod migration;
pub mod record;
pub mod scheduler;
pub mod services;
pub mod slot;
pub mod store;
pub mod writer;

pub use codec::{Decoded, SaveCodec};
pub use config::{DEFAULT_FILE_NAME, SaveConfig, default_data_dir};
pub use crypto::EncryptionProvider;
pub use error::{IntegrityError, Result, SaveError};
pub use integrity::IntegrityGuard;
pub use migration::{FilePreferences, InMemoryPreferences, LegacyPreferences, MigrationAdapter};
pub use record::{SaveFile, SaveRecord, UpgradeKind};
pub use scheduler::{FlushOutcome, SchedulerState, WriteScheduler};
pub use services::{Clock, Localization, NoopLocalization, TokioClock};
pub use slot::SlotManager;
pub use store::{LoadOrigin, SaveDataStore, SaveDataStoreBuilder};
pub use writer::{AtomicFileWriter, FileWriter};
