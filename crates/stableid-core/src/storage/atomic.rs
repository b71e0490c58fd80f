//! Crash-safe JSON files.
//!
//! A write never touches the target until the new contents are on disk: the
//! document goes to a sibling temp file (named after the writing process and
//! thread), is synced, and then renamed over the target. The rename is the
//! commit point, so readers see either the old or the new file.

use crate::{RegistryError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

fn io_error(action: &str, path: &Path, source: io::Error) -> RegistryError {
    RegistryError::Io {
        message: format!("{} {}", action, path.display()),
        path: Some(path.to_path_buf()),
        source: Some(source),
    }
}

/// Parse the JSON file at `path`, or `None` if there is no such file.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error("Failed to read", path, e)),
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| RegistryError::Json {
            message: format!("Failed to parse {}: {}", path.display(), e),
            source: Some(e),
        })
}

/// Replace `path` with `data` as pretty-printed JSON.
///
/// Output is deterministic for equal input (trailing newline included), so
/// rewriting unchanged data leaves the file byte-identical. With
/// `keep_backup` the previous contents are copied to `<name>.bak` first.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T, keep_backup: bool) -> Result<()> {
    let mut serialized = serde_json::to_string_pretty(data)?;
    serialized.push('\n');

    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent)
                .map_err(|e| io_error("Failed to create directory", parent, e))?;
        }
        _ => {}
    }

    let temp_path = temp_path_for(path);
    if let Err(e) = write_synced(&temp_path, serialized.as_bytes()) {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    if keep_backup && path.exists() {
        let backup = backup_path_for(path);
        match fs::copy(path, &backup) {
            Ok(_) => debug!("Backed up {} to {}", path.display(), backup.display()),
            // Not fatal: the write itself can still succeed
            Err(e) => warn!("Could not back up {}: {}", path.display(), e),
        }
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        io_error("Failed to replace", path, e)
    })?;

    debug!("Wrote {}", path.display());
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| io_error("Failed to create", path, e))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|e| io_error("Failed to write", path, e))
}

/// `registry.json` -> `registry.json.<pid>.<tid>.tmp`
fn temp_path_for(path: &Path) -> PathBuf {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);

    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.{}.tmp", std::process::id(), hasher.finish()));
    path.with_file_name(name)
}

/// `registry.json` -> `registry.json.bak`
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}
