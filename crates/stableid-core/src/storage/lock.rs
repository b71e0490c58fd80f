//! Exclusive session lock.
//!
//! The registry assumes one editing session writes at a time. Front ends that
//! open a registry file take this lock first so a second process fails fast
//! instead of interleaving writes.

use crate::{RegistryError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held for the lifetime of a session; released on drop.
#[derive(Debug)]
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    /// Try to take the lock at `path`, creating the file if needed.
    ///
    /// Returns [`RegistryError::Locked`] if another session holds it.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| RegistryError::io_with_path(e, parent))?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| RegistryError::io_with_path(e, &path))?;

        file.try_lock_exclusive()
            .map_err(|_| RegistryError::Locked(path.clone()))?;

        debug!("Acquired session lock {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!("Released session lock {}", self.path.display());
    }
}
