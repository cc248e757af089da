use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use save_engine::migration::{COINS_KEY, HIGH_SCORE_KEY, MIGRATED_KEY, upgrade_key};
use save_engine::{
    AtomicFileWriter, FileWriter, FlushOutcome, InMemoryPreferences, IntegrityGuard,
    LegacyPreferences, Localization, SaveCodec, SaveConfig, SaveDataStore, SaveError, SaveFile,
    SchedulerState, UpgradeKind,
};
use tempfile::TempDir;

// 32 bytes of 'A' and 16 bytes of 'B'.
const KEY: &str = "QUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUFBQUE=";
const IV: &str = "QkJCQkJCQkJCQkJCQkJCQg==";

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn test_config(dir: &Path) -> SaveConfig {
    SaveConfig::new(dir)
        .with_debounce(ms(50))
        .with_retry(ms(10), 3)
        .with_flush_timeout(Duration::from_secs(2))
}

fn slot_file(dir: &Path, slot: u8) -> PathBuf {
    dir.join(format!("slot_{}", slot)).join("savegame.json")
}

fn read_plain(path: &Path) -> SaveFile {
    let bytes = fs::read(path).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Delegates to the real writer, counting and optionally delaying writes.
struct InstrumentedWriter {
    inner: AtomicFileWriter,
    delay: Duration,
    fail_first: AtomicUsize,
    writes: AtomicUsize,
}

impl InstrumentedWriter {
    fn new() -> Self {
        Self {
            inner: AtomicFileWriter::new(),
            delay: Duration::ZERO,
            fail_first: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    fn failing(count: usize) -> Self {
        Self {
            fail_first: AtomicUsize::new(count),
            ..Self::new()
        }
    }

    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl FileWriter for InstrumentedWriter {
    fn write(&self, path: &Path, bytes: &[u8]) -> save_engine::Result<()> {
        std::thread::sleep(self.delay);
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(SaveError::Io(std::io::Error::other("disk full")));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(path, bytes)
    }

    fn read(&self, path: &Path) -> save_engine::Result<Option<Vec<u8>>> {
        self.inner.read(path)
    }
}

#[derive(Default)]
struct RecordingLocalization {
    calls: Mutex<Vec<String>>,
}

impl Localization for RecordingLocalization {
    fn set_language(&self, code: &str) {
        self.calls.lock().unwrap().push(code.to_string());
    }
}

/// Records `read-start` and `write-done` events per slot directory.
struct EventLogWriter {
    inner: AtomicFileWriter,
    write_delay: Duration,
    events: Mutex<Vec<String>>,
}

impl EventLogWriter {
    fn new(write_delay: Duration) -> Self {
        Self {
            inner: AtomicFileWriter::new(),
            write_delay,
            events: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, event: &str, path: &Path) {
        let slot = path
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.events.lock().unwrap().push(format!("{} {}", event, slot));
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl FileWriter for EventLogWriter {
    fn write(&self, path: &Path, bytes: &[u8]) -> save_engine::Result<()> {
        std::thread::sleep(self.write_delay);
        self.inner.write(path, bytes)?;
        self.record("write-done", path);
        Ok(())
    }

    fn read(&self, path: &Path) -> save_engine::Result<Option<Vec<u8>>> {
        self.record("read-start", path);
        self.inner.read(path)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fresh_environment_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let writer = Arc::new(InstrumentedWriter::new());

    let store = SaveDataStore::builder(test_config(temp_dir.path()))
        .writer(writer.clone())
        .build()
        .await
        .unwrap();

    assert_eq!(store.coins(), 0);
    assert_eq!(store.high_score(), 0);
    assert_eq!(store.language(), "en");
    assert_eq!(store.music_volume(), 1.0);
    assert!(!store.hardcore_mode());
    assert_eq!(store.active_slot(), 0);
    assert_eq!(store.scheduler_state(), SchedulerState::Idle);

    // Nothing to persist until something changes.
    assert_eq!(writer.writes(), 0);
    assert!(!slot_file(temp_dir.path(), 0).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_legacy_preferences_are_migrated_once() {
    let temp_dir = TempDir::new().unwrap();
    let legacy = Arc::new(InMemoryPreferences::with_values([
        (COINS_KEY.to_string(), 3),
        (HIGH_SCORE_KEY.to_string(), 4),
        (upgrade_key(UpgradeKind::Magnet), 1),
    ]));

    let store = SaveDataStore::builder(test_config(temp_dir.path()))
        .legacy_preferences(legacy.clone())
        .build()
        .await
        .unwrap();

    assert_eq!(store.coins(), 3);
    assert_eq!(store.high_score(), 4);
    assert_eq!(store.upgrade_level(UpgradeKind::Magnet), 1);

    let file = read_plain(&slot_file(temp_dir.path(), 0));
    assert_eq!(file.coins, 3);
    assert_eq!(legacy.get_int(MIGRATED_KEY), Some(1));

    // A second empty slot does not import the same progress again.
    store.change_slot(1).await.unwrap();
    assert_eq!(store.coins(), 0);
    assert_eq!(store.upgrade_level(UpgradeKind::Magnet), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_values_survive_restart() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = SaveDataStore::builder(test_config(temp_dir.path()))
            .build()
            .await
            .unwrap();
        store.set_coins(7);
        store.set_high_score(12);
        store.set_upgrade_level(UpgradeKind::Shield, 2);
        store.set_music_volume(0.25);
        store.set_effects_volume(0.5);
        store.set_language("fr");
        store.set_hardcore_mode(true);

        assert_eq!(store.flush(Duration::from_secs(2)).await, FlushOutcome::Flushed);
    }

    let store = SaveDataStore::builder(test_config(temp_dir.path()))
        .build()
        .await
        .unwrap();
    assert_eq!(store.coins(), 7);
    assert_eq!(store.high_score(), 12);
    assert_eq!(store.upgrade_level(UpgradeKind::Shield), 2);
    assert_eq!(store.music_volume(), 0.25);
    assert_eq!(store.effects_volume(), 0.5);
    assert_eq!(store.language(), "fr");
    assert!(store.hardcore_mode());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_file_resets_and_rewrites() {
    let temp_dir = TempDir::new().unwrap();
    let path = slot_file(temp_dir.path(), 0);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"{ this is not json").unwrap();

    let localization = Arc::new(RecordingLocalization::default());
    let store = SaveDataStore::builder(test_config(temp_dir.path()))
        .localization(localization.clone())
        .build()
        .await
        .unwrap();

    assert_eq!(store.coins(), 0);
    assert_eq!(store.language(), "en");
    assert_eq!(*localization.calls.lock().unwrap(), vec!["en".to_string()]);

    let file = read_plain(&path);
    assert!(!file.checksum.is_empty());
    let record = file.into_record().unwrap();
    assert_eq!(
        IntegrityGuard::compute_checksum(&record),
        read_plain(&path).checksum
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bounded_flush_times_out_without_cancelling_write() {
    let temp_dir = TempDir::new().unwrap();
    let writer = Arc::new(InstrumentedWriter::slow(ms(500)));
    let config = test_config(temp_dir.path()).with_debounce(Duration::from_secs(30));

    let store = SaveDataStore::builder(config.clone())
        .writer(writer.clone())
        .build()
        .await
        .unwrap();
    store.set_coins(42);

    let started = Instant::now();
    assert_eq!(store.flush(ms(100)).await, FlushOutcome::TimedOut);
    assert!(started.elapsed() < ms(400));
    assert_eq!(store.scheduler_state(), SchedulerState::Writing);

    assert_eq!(store.flush(Duration::from_secs(5)).await, FlushOutcome::Flushed);
    assert_eq!(writer.writes(), 1);

    let reopened = SaveDataStore::builder(config).build().await.unwrap();
    assert_eq!(reopened.coins(), 42);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_burst_of_changes_is_one_write() {
    let temp_dir = TempDir::new().unwrap();
    let writer = Arc::new(InstrumentedWriter::new());
    let store = SaveDataStore::builder(test_config(temp_dir.path()).with_debounce(ms(100)))
        .writer(writer.clone())
        .build()
        .await
        .unwrap();

    for coins in 1..=20 {
        store.set_coins(coins);
    }
    assert_eq!(store.scheduler_state(), SchedulerState::Scheduled);

    tokio::time::sleep(ms(500)).await;
    assert_eq!(writer.writes(), 1);
    assert_eq!(read_plain(&slot_file(temp_dir.path(), 0)).coins, 20);
    assert_eq!(store.scheduler_state(), SchedulerState::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flush_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let writer = Arc::new(InstrumentedWriter::new());
    let store = SaveDataStore::builder(test_config(temp_dir.path()))
        .writer(writer.clone())
        .build()
        .await
        .unwrap();

    assert_eq!(store.flush(ms(500)).await, FlushOutcome::Flushed);

    store.add_coins(5);
    assert_eq!(store.flush(ms(500)).await, FlushOutcome::Flushed);
    assert_eq!(store.flush(ms(500)).await, FlushOutcome::Flushed);
    assert_eq!(writer.writes(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tampered_field_is_detected() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = SaveDataStore::builder(test_config(temp_dir.path()))
            .build()
            .await
            .unwrap();
        store.set_coins(10);
        store.flush(Duration::from_secs(2)).await;
    }

    let path = slot_file(temp_dir.path(), 0);
    let mut json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    json["coins"] = serde_json::json!(999_999);
    fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

    let store = SaveDataStore::builder(test_config(temp_dir.path()))
        .build()
        .await
        .unwrap();
    assert_eq!(store.coins(), 0);
    assert_eq!(read_plain(&path).coins, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tampered_checksum_is_detected() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = SaveDataStore::builder(test_config(temp_dir.path()))
            .build()
            .await
            .unwrap();
        store.set_high_score(50);
        store.flush(Duration::from_secs(2)).await;
    }

    let path = slot_file(temp_dir.path(), 0);
    let mut json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    json["checksum"] = serde_json::json!("0".repeat(64));
    fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

    let store = SaveDataStore::builder(test_config(temp_dir.path()))
        .build()
        .await
        .unwrap();
    assert_eq!(store.high_score(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_recased_checksum_is_detected() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = SaveDataStore::builder(test_config(temp_dir.path()))
            .build()
            .await
            .unwrap();
        store.set_coins(10);
        store.flush(Duration::from_secs(2)).await;
    }

    let path = slot_file(temp_dir.path(), 0);
    let mut json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    let upper = json["checksum"].as_str().unwrap().to_uppercase();
    json["checksum"] = serde_json::json!(upper);
    fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

    let store = SaveDataStore::builder(test_config(temp_dir.path()))
        .build()
        .await
        .unwrap();
    assert_eq!(store.coins(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_slots_are_isolated() {
    let temp_dir = TempDir::new().unwrap();
    let store = SaveDataStore::builder(test_config(temp_dir.path()))
        .build()
        .await
        .unwrap();

    store.set_coins(5);
    store.change_slot(1).await.unwrap();
    assert_eq!(store.active_slot(), 1);
    assert_eq!(store.coins(), 0);

    store.set_coins(9);
    store.change_slot(0).await.unwrap();
    assert_eq!(store.coins(), 5);

    store.change_slot(1).await.unwrap();
    assert_eq!(store.coins(), 9);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_change_slot_persists_pending_write_first() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path()).with_debounce(Duration::from_secs(30));
    let store = SaveDataStore::builder(config)
        .writer(Arc::new(InstrumentedWriter::slow(ms(200))))
        .build()
        .await
        .unwrap();

    store.set_coins(77);
    store.change_slot(2).await.unwrap();

    // The debounce window never elapsed; the switch wrote slot 0 itself.
    assert_eq!(read_plain(&slot_file(temp_dir.path(), 0)).coins, 77);
    assert!(!slot_file(temp_dir.path(), 2).exists());
    assert_eq!(store.coins(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_change_slot_reads_new_slot_after_write_lands() {
    let temp_dir = TempDir::new().unwrap();
    let writer = Arc::new(EventLogWriter::new(ms(150)));
    let config = test_config(temp_dir.path()).with_debounce(Duration::from_secs(30));
    let store = SaveDataStore::builder(config)
        .writer(writer.clone())
        .build()
        .await
        .unwrap();

    store.set_coins(5);
    store.change_slot(1).await.unwrap();

    assert_eq!(
        writer.events(),
        vec!["read-start slot_0", "write-done slot_0", "read-start slot_1"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_change_slot_retries_transient_failure() {
    let temp_dir = TempDir::new().unwrap();
    let writer = Arc::new(InstrumentedWriter::failing(1));
    let config = test_config(temp_dir.path()).with_debounce(Duration::from_secs(30));
    let store = SaveDataStore::builder(config)
        .writer(writer.clone())
        .build()
        .await
        .unwrap();

    store.set_coins(77);
    store.change_slot(1).await.unwrap();
    assert_eq!(writer.writes(), 1);
    assert_eq!(read_plain(&slot_file(temp_dir.path(), 0)).coins, 77);

    store.change_slot(0).await.unwrap();
    assert_eq!(store.coins(), 77);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_change_slot_drops_changes_after_retry_budget() {
    let temp_dir = TempDir::new().unwrap();
    let writer = Arc::new(InstrumentedWriter::failing(3));
    let config = test_config(temp_dir.path()).with_debounce(Duration::from_secs(30));
    let store = SaveDataStore::builder(config)
        .writer(writer.clone())
        .build()
        .await
        .unwrap();

    store.set_coins(12);
    store.change_slot(1).await.unwrap();

    assert_eq!(store.active_slot(), 1);
    assert_eq!(store.coins(), 0);
    assert_eq!(store.scheduler_state(), SchedulerState::Idle);
    assert!(!slot_file(temp_dir.path(), 0).exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_change_slot_rejects_out_of_range() {
    let temp_dir = TempDir::new().unwrap();
    let store = SaveDataStore::builder(test_config(temp_dir.path()).with_max_slots(2))
        .build()
        .await
        .unwrap();

    let err = store.change_slot(2).await.unwrap_err();
    assert!(matches!(
        err,
        SaveError::InvalidSlot {
            index: 2,
            max_slots: 2
        }
    ));
    assert_eq!(store.active_slot(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_startup_settings_fall_back() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path())
        .with_file_name("../escape.json")
        .with_initial_slot(9);

    let store = SaveDataStore::builder(config).build().await.unwrap();
    store.set_coins(1);
    store.flush(Duration::from_secs(2)).await;

    assert_eq!(store.active_slot(), 0);
    assert!(slot_file(temp_dir.path(), 0).exists());
    assert!(!temp_dir.path().parent().unwrap().join("escape.json").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_encrypted_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path()).with_encryption(KEY, IV);
    {
        let store = SaveDataStore::builder(config.clone()).build().await.unwrap();
        store.set_coins(123);
        store.flush(Duration::from_secs(2)).await;
    }

    let raw = fs::read(slot_file(temp_dir.path(), 0)).unwrap();
    assert!(!String::from_utf8_lossy(&raw).contains("coins"));

    let store = SaveDataStore::builder(config).build().await.unwrap();
    assert_eq!(store.coins(), 123);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_plaintext_file_is_upgraded_when_encryption_enabled() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = SaveDataStore::builder(test_config(temp_dir.path()))
            .build()
            .await
            .unwrap();
        store.set_coins(8);
        store.flush(Duration::from_secs(2)).await;
    }

    let config = test_config(temp_dir.path()).with_encryption(KEY, IV);
    let store = SaveDataStore::builder(config.clone()).build().await.unwrap();
    assert_eq!(store.coins(), 8);

    let raw = fs::read(slot_file(temp_dir.path(), 0)).unwrap();
    let codec = SaveCodec::new(config.encryption());
    let decoded = codec.decode(&raw).unwrap();
    assert!(!decoded.needs_rewrite);
    assert_eq!(decoded.record.coins, 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_writes_are_retried() {
    let temp_dir = TempDir::new().unwrap();
    let writer = Arc::new(InstrumentedWriter::failing(2));
    let store = SaveDataStore::builder(test_config(temp_dir.path()))
        .writer(writer.clone())
        .build()
        .await
        .unwrap();

    store.set_coins(31);
    tokio::time::sleep(ms(600)).await;

    assert_eq!(writer.writes(), 1);
    assert_eq!(read_plain(&slot_file(temp_dir.path(), 0)).coins, 31);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_autosave_tick_retries_after_budget_exhausted() {
    let temp_dir = TempDir::new().unwrap();
    let writer = Arc::new(InstrumentedWriter::failing(2));
    let config = test_config(temp_dir.path())
        .with_retry(ms(10), 1)
        .with_autosave(ms(150));
    let store = SaveDataStore::builder(config)
        .writer(writer.clone())
        .build()
        .await
        .unwrap();

    store.set_coins(4);
    tokio::time::sleep(ms(200)).await;
    assert_eq!(writer.writes(), 0);
    assert_eq!(store.scheduler_state(), SchedulerState::Dirty);

    tokio::time::sleep(ms(600)).await;
    assert_eq!(writer.writes(), 1);
    assert_eq!(store.scheduler_state(), SchedulerState::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_coin_and_score_helpers() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path()).with_debounce(Duration::from_secs(30));
    let store = SaveDataStore::builder(config).build().await.unwrap();

    assert!(!store.spend_coins(1));
    assert!(!store.submit_score(0));
    assert_eq!(store.scheduler_state(), SchedulerState::Idle);

    assert_eq!(store.add_coins(10), 10);
    assert!(store.spend_coins(4));
    assert_eq!(store.coins(), 6);
    assert!(store.submit_score(100));
    assert!(!store.submit_score(50));
    assert_eq!(store.high_score(), 100);

    store.set_coins(u64::MAX);
    assert_eq!(store.add_coins(1), u64::MAX);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_setters_clamp_and_ignore_invalid_input() {
    let temp_dir = TempDir::new().unwrap();
    let store = SaveDataStore::builder(test_config(temp_dir.path()))
        .build()
        .await
        .unwrap();

    store.set_music_volume(1.5);
    store.set_effects_volume(f32::NAN);
    store.set_language("   ");
    store.set_upgrade_level(UpgradeKind::DoubleCoins, 3);
    store.set_upgrade_level(UpgradeKind::DoubleCoins, 0);

    assert_eq!(store.music_volume(), 1.0);
    assert_eq!(store.effects_volume(), 0.0);
    assert_eq!(store.language(), "en");
    assert!(store.snapshot().upgrades.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dispose_flushes_pending_changes() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path()).with_debounce(Duration::from_secs(30));
    let store = SaveDataStore::builder(config).build().await.unwrap();

    store.set_hardcore_mode(true);
    assert_eq!(store.dispose().await, FlushOutcome::Flushed);
    assert!(read_plain(&slot_file(temp_dir.path(), 0)).hardcore_mode);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_setters_from_plain_threads() {
    let temp_dir = TempDir::new().unwrap();
    let store = SaveDataStore::builder(test_config(temp_dir.path()))
        .build()
        .await
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..25 {
                    store.add_coins(1);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.flush(Duration::from_secs(2)).await, FlushOutcome::Flushed);
    assert_eq!(read_plain(&slot_file(temp_dir.path(), 0)).coins, 100);
}
