//! Slot directory layout.
//!
//! ```text
//! {base_dir}/
//!   ├── slot_0/savegame.json
//!   ├── slot_1/savegame.json
//!   └── savegame.json          (fallback when a slot dir cannot be created)
//! ```

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::error::{Result, SaveError};

/// Resolves slot-relative save paths under a base directory.
#[derive(Debug, Clone)]
pub struct SlotManager {
    base_dir: PathBuf,
    max_slots: u8,
}

impl SlotManager {
    pub fn new(base_dir: impl AsRef<Path>, max_slots: u8) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            max_slots: max_slots.max(1),
        }
    }

    pub fn check_slot(&self, index: u8) -> Result<()> {
        if index < self.max_slots {
            Ok(())
        } else {
            Err(SaveError::InvalidSlot {
                index,
                max_slots: self.max_slots,
            })
        }
    }

    /// Directory holding a slot's files.
    pub fn slot_dir(&self, index: u8) -> PathBuf {
        self.base_dir.join(format!("slot_{}", index))
    }

    /// Resolve the path of `file_name` inside slot `index`, creating the slot
    /// directory on first use.
    ///
    /// If the slot directory cannot be created the file is placed directly
    /// under the base directory instead.
    pub fn resolve_path(&self, index: u8, file_name: &str) -> Result<PathBuf> {
        validate_file_name(file_name)?;
        self.check_slot(index)?;

        let dir = self.slot_dir(index);
        match fs::create_dir_all(&dir) {
            Ok(()) => Ok(dir.join(file_name)),
            Err(e) => {
                warn!(
                    "Cannot create slot directory {} ({}); falling back to {}",
                    dir.display(),
                    e,
                    self.base_dir.display()
                );
                Ok(self.base_dir.join(file_name))
            }
        }
    }
}

/// Reject names that are empty, blank, or escape the slot directory.
pub fn validate_file_name(file_name: &str) -> Result<()> {
    let invalid = || SaveError::InvalidFileName(file_name.to_string());

    if file_name.trim().is_empty() || file_name.contains(['/', '\\']) {
        return Err(invalid());
    }

    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid()),
    }
}
