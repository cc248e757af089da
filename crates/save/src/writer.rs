//! Durable slot file I/O.
//!
//! [`AtomicFileWriter`] writes `path.tmp`, syncs it, then renames it over the
//! final path so the slot file is always either the old or the new payload.
//! Writers are synchronous; the scheduler runs them on the blocking pool.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::Result;

/// Storage seam used by the scheduler and the load pipeline.
///
/// Substituted in tests to count, delay, or fail writes.
pub trait FileWriter: Send + Sync {
    /// Persist `bytes` at `path`, replacing any previous content.
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()>;

    /// Read `path`; `Ok(None)` if it does not exist.
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    /// Warnings deferred from background writes, drained on each call.
    fn take_warnings(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Temp path used while `path` is being written.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Shared queue of warnings produced off the caller's thread.
#[derive(Debug, Clone, Default)]
pub struct WarningQueue {
    inner: Arc<Mutex<Vec<String>>>,
}

impl WarningQueue {
    pub fn push(&self, warning: String) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(warning);
    }

    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Temp-file-then-rename writer for the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct AtomicFileWriter {
    warnings: WarningQueue,
}

impl AtomicFileWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn remove_stale_temp(&self, temp: &Path) {
        match fs::remove_file(temp) {
            Ok(()) => debug!("Removed stale temp file {}", temp.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => self.warnings.push(format!(
                "could not remove temp file {}: {}",
                temp.display(),
                e
            )),
        }
    }

    /// fsync `path` (file or directory), deferring a failure as a warning.
    fn sync_or_warn(&self, path: &Path) {
        if let Err(e) = File::open(path).and_then(|file| file.sync_all()) {
            self.warnings
                .push(format!("could not sync {}: {}", path.display(), e));
        }
    }

    fn write_temp(temp: &Path, bytes: &[u8]) -> io::Result<()> {
        let mut file = File::create(temp)?;
        file.write_all(bytes)?;
        file.sync_all()
    }

    /// Move `temp` over `path`, copying when a rename is not possible.
    fn swap_into_place(&self, temp: &Path, path: &Path) -> io::Result<()> {
        if let Err(rename_err) = fs::rename(temp, path) {
            debug!(
                "Rename {} -> {} failed ({}), copying instead",
                temp.display(),
                path.display(),
                rename_err
            );
            fs::copy(temp, path)?;
            self.warnings.push(format!(
                "{} replaced by copy, not rename; a crash during the copy could truncate it",
                path.display()
            ));
            self.sync_or_warn(path);
            self.remove_stale_temp(temp);
        }
        Ok(())
    }
}

impl FileWriter for AtomicFileWriter {
    fn write(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warn!(
                "Cannot create save directory {}: {}",
                parent.display(),
                e
            );
            return Err(e.into());
        }

        let temp = temp_path(path);
        self.remove_stale_temp(&temp);

        if let Err(e) = Self::write_temp(&temp, bytes) {
            warn!("Failed to write {}: {}", temp.display(), e);
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        if let Err(e) = self.swap_into_place(&temp, path) {
            warn!("Failed to replace {}: {}", path.display(), e);
            return Err(e.into());
        }

        #[cfg(unix)]
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            self.sync_or_warn(parent);
        }

        debug!("Saved {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn take_warnings(&self) -> Vec<String> {
        self.warnings.drain()
    }
}
