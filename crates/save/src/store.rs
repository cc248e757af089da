//! The player save store.
//!
//! [`SaveDataStore`] owns the in-memory record of the active slot and exposes
//! typed getters and setters. Setters update memory and poke the
//! [`WriteScheduler`]; they never touch the disk. The store is a cheap
//! cloneable handle: construct it once in the composition root and pass it to
//! every consumer.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::codec::SaveCodec;
use crate::config::{DEFAULT_FILE_NAME, SaveConfig};
use crate::error::{Result, SaveError};
use crate::migration::{InMemoryPreferences, LegacyPreferences, MigrationAdapter};
use crate::record::{DEFAULT_LANGUAGE, SaveRecord, UpgradeKind, clamp_volume};
use crate::scheduler::{
    FlushOutcome, PendingWrite, SchedulerConfig, SchedulerState, SnapshotSource, WriteScheduler,
};
use crate::services::{Clock, Localization, NoopLocalization, TokioClock};
use crate::slot::{SlotManager, validate_file_name};
use crate::writer::{AtomicFileWriter, FileWriter};

/// Where the record of a freshly loaded slot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOrigin {
    /// Valid slot file.
    Existing,
    /// No file and nothing to migrate.
    Fresh,
    /// No file; imported from legacy preferences.
    Migrated,
    /// File failed the integrity check and was replaced by defaults.
    Reset,
    /// File exists but could not be read; defaults in memory only.
    Unreadable,
}

struct LoadedSlot {
    index: u8,
    path: PathBuf,
    record: SaveRecord,
    origin: LoadOrigin,
    needs_write: bool,
}

struct SlotState {
    index: u8,
    path: PathBuf,
    record: SaveRecord,
}

/// The active slot's record; snapshot source for the scheduler.
struct ActiveSlot {
    state: RwLock<SlotState>,
    codec: SaveCodec,
}

impl ActiveSlot {
    fn read(&self) -> RwLockReadGuard<'_, SlotState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SlotState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotSource for ActiveSlot {
    fn snapshot(&self) -> Result<PendingWrite> {
        let (slot, path, record) = {
            let state = self.read();
            (state.index, state.path.clone(), state.record.clone())
        };
        let bytes = self.codec.encode(&record)?;
        Ok(PendingWrite { slot, path, bytes })
    }
}

/// Everything the read pipeline needs, cheap to move onto the blocking pool.
#[derive(Clone)]
struct SlotLoader {
    slots: SlotManager,
    file_name: String,
    codec: SaveCodec,
    writer: Arc<dyn FileWriter>,
    legacy: Arc<dyn LegacyPreferences>,
}

impl SlotLoader {
    /// file -> decrypt -> verify, falling back to migration or defaults.
    fn load(&self, index: u8) -> Result<LoadedSlot> {
        let path = self.slots.resolve_path(index, &self.file_name)?;

        let (record, origin, needs_write) = match self.writer.read(&path) {
            Ok(Some(bytes)) => match self.codec.decode(&bytes) {
                Ok(decoded) => (decoded.record, LoadOrigin::Existing, decoded.needs_rewrite),
                Err(e) => {
                    warn!(
                        "Save slot {} failed integrity check ({}); resetting to defaults",
                        index, e
                    );
                    (SaveRecord::default(), LoadOrigin::Reset, true)
                }
            },
            Ok(None) => match MigrationAdapter::migrate(self.legacy.as_ref()) {
                Some(record) => (record, LoadOrigin::Migrated, true),
                None => (SaveRecord::default(), LoadOrigin::Fresh, false),
            },
            Err(e) => {
                warn!(
                    "Cannot read save slot {} at {} ({}); using defaults",
                    index,
                    path.display(),
                    e
                );
                (SaveRecord::default(), LoadOrigin::Unreadable, false)
            }
        };

        debug!("Loaded slot {} ({:?}) from {}", index, origin, path.display());

        Ok(LoadedSlot {
            index,
            path,
            record,
            origin,
            needs_write,
        })
    }

    async fn load_async(&self, index: u8) -> Result<LoadedSlot> {
        let loader = self.clone();
        tokio::task::spawn_blocking(move || loader.load(index))
            .await
            .map_err(SaveError::WorkerJoin)?
    }
}

struct StoreInner {
    active: Arc<ActiveSlot>,
    scheduler: WriteScheduler,
    loader: SlotLoader,
    localization: Arc<dyn Localization>,
    flush_timeout: Duration,
    /// Serializes slot switches.
    switch_gate: tokio::sync::Mutex<()>,
    autosave: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Some(task) = self
            .autosave
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

/// Persistent store for one player's progress and settings.
#[derive(Clone)]
pub struct SaveDataStore {
    inner: Arc<StoreInner>,
}

impl SaveDataStore {
    pub fn builder(config: SaveConfig) -> SaveDataStoreBuilder {
        SaveDataStoreBuilder::new(config)
    }

    // ------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------

    fn read<T>(&self, f: impl FnOnce(&SaveRecord) -> T) -> T {
        f(&self.inner.active.read().record)
    }

    pub fn coins(&self) -> u64 {
        self.read(|r| r.coins)
    }

    pub fn high_score(&self) -> u64 {
        self.read(|r| r.high_score)
    }

    pub fn upgrade_level(&self, kind: UpgradeKind) -> u32 {
        self.read(|r| r.upgrade_level(kind))
    }

    pub fn music_volume(&self) -> f32 {
        self.read(|r| r.music_volume)
    }

    pub fn effects_volume(&self) -> f32 {
        self.read(|r| r.effects_volume)
    }

    pub fn language(&self) -> String {
        self.read(|r| r.language.clone())
    }

    pub fn hardcore_mode(&self) -> bool {
        self.read(|r| r.hardcore_mode)
    }

    /// Copy of the whole active record.
    pub fn snapshot(&self) -> SaveRecord {
        self.read(SaveRecord::clone)
    }

    pub fn active_slot(&self) -> u8 {
        self.inner.active.read().index
    }

    /// Path the active slot is written to.
    pub fn active_path(&self) -> PathBuf {
        self.inner.active.read().path.clone()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.inner.scheduler.state()
    }

    // ------------------------------------------------------------------
    // Setters
    // ------------------------------------------------------------------

    /// Apply `f` and mark dirty when it reports a change.
    ///
    /// The dirty flag is raised while the record lock is still held, so a
    /// concurrent slot switch never observes a changed but clean record.
    fn mutate<T>(&self, f: impl FnOnce(&mut SaveRecord) -> (T, bool)) -> T {
        let mut state = self.inner.active.write();
        let (out, changed) = f(&mut state.record);
        if changed {
            self.inner.scheduler.mark_dirty();
        }
        out
    }

    pub fn set_coins(&self, coins: u64) {
        self.mutate(|r| {
            r.coins = coins;
            ((), true)
        });
    }

    /// Add coins, saturating at `u64::MAX`.
    pub fn add_coins(&self, amount: u64) -> u64 {
        self.mutate(|r| {
            r.coins = r.coins.saturating_add(amount);
            (r.coins, true)
        })
    }

    /// Deduct `amount` if affordable. Returns whether the purchase happened.
    pub fn spend_coins(&self, amount: u64) -> bool {
        self.mutate(|r| match r.coins.checked_sub(amount) {
            Some(remaining) => {
                r.coins = remaining;
                (true, true)
            }
            None => (false, false),
        })
    }

    pub fn set_high_score(&self, score: u64) {
        self.mutate(|r| {
            r.high_score = score;
            ((), true)
        });
    }

    /// Raise the high score if `score` beats it. Returns whether it did.
    pub fn submit_score(&self, score: u64) -> bool {
        self.mutate(|r| {
            let improved = score > r.high_score;
            if improved {
                r.high_score = score;
            }
            (improved, improved)
        })
    }

    pub fn set_upgrade_level(&self, kind: UpgradeKind, level: u32) {
        self.mutate(|r| {
            r.set_upgrade_level(kind, level);
            ((), true)
        });
    }

    /// Set music volume, clamped to `[0, 1]`.
    pub fn set_music_volume(&self, volume: f32) {
        self.mutate(|r| {
            r.music_volume = clamp_volume(volume);
            ((), true)
        });
    }

    /// Set effects volume, clamped to `[0, 1]`.
    pub fn set_effects_volume(&self, volume: f32) {
        self.mutate(|r| {
            r.effects_volume = clamp_volume(volume);
            ((), true)
        });
    }

    /// Set the ISO language code. Blank codes are ignored.
    pub fn set_language(&self, code: &str) {
        let code = code.trim();
        if code.is_empty() {
            warn!("Ignoring empty language code");
            return;
        }
        self.mutate(|r| {
            r.language = code.to_string();
            ((), true)
        });
    }

    pub fn set_hardcore_mode(&self, enabled: bool) {
        self.mutate(|r| {
            r.hardcore_mode = enabled;
            ((), true)
        });
    }

    // ------------------------------------------------------------------
    // Persistence control
    // ------------------------------------------------------------------

    /// Write pending changes and wait at most `timeout` for them.
    ///
    /// Also logs warnings deferred by background writes.
    pub async fn flush(&self, timeout: Duration) -> FlushOutcome {
        let outcome = self.inner.scheduler.flush(timeout).await;
        for warning in self.inner.loader.writer.take_warnings() {
            warn!("Deferred save warning: {}", warning);
        }
        outcome
    }

    /// Drain warnings deferred by background writes.
    pub fn take_warnings(&self) -> Vec<String> {
        self.inner.loader.writer.take_warnings()
    }

    /// Switch to slot `index`.
    ///
    /// Waits for every pending or in-flight write of the current slot before
    /// the new slot's file is read, then replaces the in-memory record.
    pub async fn change_slot(&self, index: u8) -> Result<()> {
        let inner = &self.inner;
        inner.loader.slots.check_slot(index)?;

        let _gate = inner.switch_gate.lock().await;
        let current = self.active_slot();
        if current == index {
            return Ok(());
        }

        self.settle_current(current).await;
        let loaded = inner.loader.load_async(index).await?;

        // A setter may race in between settling and swapping; settle again
        // until the swap happens with nothing unsaved.
        while !self.try_install(&loaded) {
            self.settle_current(current).await;
        }

        info!("Switched from slot {} to slot {}", current, index);
        self.finish_load(loaded.origin, loaded.needs_write).await;
        Ok(())
    }

    /// Stop background tasks and flush within the configured bound.
    pub async fn dispose(&self) -> FlushOutcome {
        let ticker = self
            .inner
            .autosave
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = ticker {
            task.abort();
        }

        let outcome = self.flush(self.inner.flush_timeout).await;
        info!("Save store disposed ({:?})", outcome);
        outcome
    }

    /// Write the current slot's pending changes, retrying on the backoff
    /// schedule. Changes are dropped only once the retry budget is spent.
    async fn settle_current(&self, slot: u8) {
        if let FlushOutcome::Failed(e) = self.inner.scheduler.settle().await {
            error!(
                "Pending save for slot {} still failing after retries ({}); unsaved changes dropped before switching slots",
                slot, e
            );
            self.inner.scheduler.discard_pending();
        }
    }

    fn try_install(&self, loaded: &LoadedSlot) -> bool {
        let mut state = self.inner.active.write();
        if !self.inner.scheduler.is_idle() {
            return false;
        }
        *state = SlotState {
            index: loaded.index,
            path: loaded.path.clone(),
            record: loaded.record.clone(),
        };
        true
    }

    /// Side effects of a load: integrity reset and baseline writes.
    async fn finish_load(&self, origin: LoadOrigin, needs_write: bool) {
        let inner = &self.inner;

        if origin == LoadOrigin::Reset {
            inner.localization.set_language(DEFAULT_LANGUAGE);
        }

        if !needs_write {
            return;
        }

        inner.scheduler.save_now();
        let outcome = self.flush(inner.flush_timeout).await;

        if origin == LoadOrigin::Migrated && outcome == FlushOutcome::Flushed {
            let legacy = Arc::clone(&inner.loader.legacy);
            let marked =
                tokio::task::spawn_blocking(move || MigrationAdapter::mark_migrated(legacy.as_ref()))
                    .await;
            if let Err(e) = marked {
                warn!("Failed to mark legacy preferences as migrated: {}", e);
            }
        }
    }
}

/// Builder for [`SaveDataStore`]; `build()` is the store's `init()`.
pub struct SaveDataStoreBuilder {
    config: SaveConfig,
    writer: Option<Arc<dyn FileWriter>>,
    clock: Option<Arc<dyn Clock>>,
    legacy: Option<Arc<dyn LegacyPreferences>>,
    localization: Option<Arc<dyn Localization>>,
}

impl SaveDataStoreBuilder {
    fn new(config: SaveConfig) -> Self {
        Self {
            config,
            writer: None,
            clock: None,
            legacy: None,
            localization: None,
        }
    }

    /// Override the file writer (default: [`AtomicFileWriter`]).
    pub fn writer(mut self, writer: Arc<dyn FileWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Override the debounce clock (default: [`TokioClock`]).
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Legacy preference store to migrate from (default: empty).
    pub fn legacy_preferences(mut self, legacy: Arc<dyn LegacyPreferences>) -> Self {
        self.legacy = Some(legacy);
        self
    }

    /// Localization notified on integrity resets (default: no-op).
    pub fn localization(mut self, localization: Arc<dyn Localization>) -> Self {
        self.localization = Some(localization);
        self
    }

    /// Load the initial slot and start the scheduler.
    ///
    /// Returns once the store is ready: a migrated or reset slot has already
    /// been written (or the flush bound elapsed).
    pub async fn build(self) -> Result<SaveDataStore> {
        let config = self.config;

        let file_name = match validate_file_name(&config.file_name) {
            Ok(()) => config.file_name.clone(),
            Err(e) => {
                warn!("{}; using {}", e, DEFAULT_FILE_NAME);
                DEFAULT_FILE_NAME.to_string()
            }
        };

        let slots = SlotManager::new(&config.base_dir, config.max_slots);
        let initial_slot = match slots.check_slot(config.initial_slot) {
            Ok(()) => config.initial_slot,
            Err(e) => {
                warn!("{}; starting in slot 0", e);
                0
            }
        };

        let loader = SlotLoader {
            slots,
            file_name,
            codec: SaveCodec::new(config.encryption()),
            writer: self
                .writer
                .unwrap_or_else(|| Arc::new(AtomicFileWriter::new())),
            legacy: self
                .legacy
                .unwrap_or_else(|| Arc::new(InMemoryPreferences::new())),
        };

        let loaded = loader.load_async(initial_slot).await?;

        let active = Arc::new(ActiveSlot {
            state: RwLock::new(SlotState {
                index: loaded.index,
                path: loaded.path.clone(),
                record: loaded.record.clone(),
            }),
            codec: loader.codec.clone(),
        });

        let scheduler = WriteScheduler::new(
            Arc::clone(&active) as Arc<dyn SnapshotSource>,
            Arc::clone(&loader.writer),
            self.clock.unwrap_or_else(|| Arc::new(TokioClock)),
            SchedulerConfig {
                debounce: config.debounce,
                retry_base_delay: config.retry_base_delay,
                max_attempts: config.max_write_attempts,
            },
            Handle::current(),
        );

        let autosave = config.autosave_interval.map(|interval| {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                // The first tick completes immediately.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    scheduler.retry_pending();
                }
            })
        });

        let store = SaveDataStore {
            inner: Arc::new(StoreInner {
                active,
                scheduler,
                loader,
                localization: self
                    .localization
                    .unwrap_or_else(|| Arc::new(NoopLocalization)),
                flush_timeout: config.flush_timeout,
                switch_gate: tokio::sync::Mutex::new(()),
                autosave: Mutex::new(autosave),
            }),
        };

        info!(
            "Save store ready: slot={}, origin={:?}, encrypted={}, dir={}",
            loaded.index,
            loaded.origin,
            store.inner.loader.codec.is_encrypted(),
            config.base_dir.display()
        );

        store.finish_load(loaded.origin, loaded.needs_write).await;
        Ok(store)
    }
}
