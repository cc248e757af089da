//! Save engine configuration and environment loading.
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::crypto::EncryptionProvider;

pub const DEFAULT_FILE_NAME: &str = "savegame.json";

/// Configuration for a [`SaveDataStore`](crate::SaveDataStore).
#[derive(Clone)]
pub struct SaveConfig {
    /// Directory holding the `slot_<n>` directories.
    pub base_dir: PathBuf,
    pub file_name: String,
    pub max_slots: u8,
    /// Slot loaded by `build()`.
    pub initial_slot: u8,
    /// Quiet period after the last mutation before a write starts.
    pub debounce: Duration,
    /// Delay before the first retry of a failed write; doubles per failure.
    pub retry_base_delay: Duration,
    /// Consecutive failed writes before retries wait for the next mutation
    /// or autosave tick.
    pub max_write_attempts: u32,
    /// Bound used for the baseline write in `build()` and by `dispose()`.
    pub flush_timeout: Duration,
    /// Periodic re-arm of the scheduler while unsaved data remains.
    pub autosave_interval: Option<Duration>,
    /// Base64 AES-256 key.
    pub encryption_key: Option<String>,
    /// Base64 16-byte IV.
    pub encryption_iv: Option<String>,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            base_dir: default_data_dir(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            max_slots: 3,
            initial_slot: 0,
            debounce: Duration::from_secs(2),
            retry_base_delay: Duration::from_millis(500),
            max_write_attempts: 5,
            flush_timeout: Duration::from_secs(3),
            autosave_interval: None,
            encryption_key: None,
            encryption_iv: None,
        }
    }
}

impl std::fmt::Debug for SaveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |secret: &Option<String>| secret.as_ref().map(|_| "<redacted>");
        f.debug_struct("SaveConfig")
            .field("base_dir", &self.base_dir)
            .field("file_name", &self.file_name)
            .field("max_slots", &self.max_slots)
            .field("initial_slot", &self.initial_slot)
            .field("debounce", &self.debounce)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("max_write_attempts", &self.max_write_attempts)
            .field("flush_timeout", &self.flush_timeout)
            .field("autosave_interval", &self.autosave_interval)
            .field("encryption_key", &redact(&self.encryption_key))
            .field("encryption_iv", &redact(&self.encryption_iv))
            .finish()
    }
}

impl SaveConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Construct configuration from process environment variables.
    ///
    /// Environment variables:
    /// - `SAVE_DATA_DIR` - Base directory for slots (default: platform data dir)
    /// - `SAVE_FILE_NAME` - Slot file name (default: savegame.json)
    /// - `SAVE_MAX_SLOTS` - Number of slots (default: 3)
    /// - `SAVE_SLOT` - Slot loaded at startup (default: 0)
    /// - `SAVE_DEBOUNCE_MS` - Debounce interval (default: 2000)
    /// - `SAVE_FLUSH_TIMEOUT_MS` - Bounded flush on shutdown (default: 3000)
    /// - `SAVE_AUTOSAVE_SECS` - Autosave retry tick (default: off)
    /// - `SAVE_ENCRYPTION_KEY` / `SAVE_ENCRYPTION_IV` - Base64 secrets
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("SAVE_DATA_DIR") {
            config.base_dir = PathBuf::from(dir);
        }
        if let Ok(name) = env::var("SAVE_FILE_NAME") {
            config.file_name = name;
        }
        if let Some(slots) = read_env::<u8>("SAVE_MAX_SLOTS") {
            config.max_slots = slots.max(1);
        }
        if let Some(slot) = read_env::<u8>("SAVE_SLOT") {
            config.initial_slot = slot;
        }
        if let Some(ms) = read_env::<u64>("SAVE_DEBOUNCE_MS") {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = read_env::<u64>("SAVE_FLUSH_TIMEOUT_MS") {
            config.flush_timeout = Duration::from_millis(ms);
        }
        config.autosave_interval = read_env::<u64>("SAVE_AUTOSAVE_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        config.encryption_key = env::var("SAVE_ENCRYPTION_KEY").ok();
        config.encryption_iv = env::var("SAVE_ENCRYPTION_IV").ok();

        config
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn with_max_slots(mut self, max_slots: u8) -> Self {
        self.max_slots = max_slots.max(1);
        self
    }

    pub fn with_initial_slot(mut self, slot: u8) -> Self {
        self.initial_slot = slot;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_retry(mut self, base_delay: Duration, max_attempts: u32) -> Self {
        self.retry_base_delay = base_delay;
        self.max_write_attempts = max_attempts.max(1);
        self
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn with_autosave(mut self, interval: Duration) -> Self {
        self.autosave_interval = Some(interval);
        self
    }

    pub fn with_encryption(mut self, key: impl Into<String>, iv: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self.encryption_iv = Some(iv.into());
        self
    }

    /// Encryption provider for the configured secrets (disabled if unset).
    pub fn encryption(&self) -> EncryptionProvider {
        EncryptionProvider::from_secrets(
            self.encryption_key.as_deref(),
            self.encryption_iv.as_deref(),
        )
    }
}

/// Platform data directory for save slots.
///
/// - macOS: `~/Library/Application Support/savegame`
/// - Linux: `~/.local/share/savegame` (or `$XDG_DATA_HOME/savegame`)
/// - Windows: `%APPDATA%\savegame`
/// - Fallback: `./save_data`
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "savegame")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./save_data"))
}

fn read_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok()?.parse().ok()
}
