//! Platform-specific directory utilities

use std::path::{Path, PathBuf};

/// Platform-specific log directory
///
/// - macOS: `~/Library/Caches/savegame/logs`
/// - Linux: `~/.cache/savegame/logs` (or `$XDG_CACHE_HOME/savegame/logs`)
/// - Windows: `%LOCALAPPDATA%\savegame\logs`
/// - Fallback: `<tmp>/savegame/logs`
pub fn log_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "savegame")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("savegame"))
        .join("logs")
}

/// Legacy preference file kept next to the slot directories.
pub fn legacy_preferences_path(base_dir: &Path) -> PathBuf {
    base_dir.join("legacy_prefs.json")
}
