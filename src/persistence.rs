//! Durable JSON files.
//!
//! Every state file is replaced with the same discipline:
//! 1. serialize into a uniquely named `.<file>.XXXXXX.tmp` next to the target,
//! 2. `fsync` the temporary file,
//! 3. `rename` it over the target (atomic on the same filesystem),
//! 4. `fsync` the parent directory so the rename itself is durable.
//!
//! A crash anywhere before step 3 leaves the previous file untouched. Opening a
//! file never touches temporaries; only the process that owns the files sweeps
//! crash leftovers, through [`discard_leftovers`].

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{Result, SyncError};

const TMP_SUFFIX: &str = ".tmp";

/// `play_history.json` -> `.play_history.json.`
fn tmp_prefix(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(".{name}.")
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Reads and decodes a JSON state file. A missing file is `Ok(None)`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(SyncError::persistence(path, e)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| SyncError::corrupt(path, e))
}

/// A fully written and synced temporary file that has not replaced its target yet.
///
/// Dropping it without calling [`StagedFile::commit`] removes the temporary.
#[derive(Debug)]
#[must_use = "a staged file does nothing until committed"]
pub struct StagedFile {
    file: NamedTempFile,
    target: PathBuf,
}

impl StagedFile {
    pub fn tmp_path(&self) -> &Path {
        self.file.path()
    }

    /// Atomically moves the staged content over the target.
    ///
    /// Once the rename has happened the new content is what readers see, so a
    /// failed directory sync afterwards is only logged.
    pub fn commit(self) -> Result<()> {
        let StagedFile { file, target } = self;
        file.persist(&target)
            .map_err(|e| SyncError::persistence(&target, e.error))?;
        tolerate_unsynced_dir(&target, sync_parent_dir(&target));
        Ok(())
    }

    /// Leaves the temporary on disk the way a crash between write and rename would.
    #[cfg(test)]
    pub(crate) fn abandon(self) -> PathBuf {
        let (_, path) = self.file.keep().expect("keep staged temporary");
        path
    }
}

/// Serializes `value` into a fresh temporary next to `path` and syncs it.
///
/// Each call gets its own temporary, so concurrent writers never share one.
pub fn stage_json<T: Serialize>(path: &Path, value: &T) -> Result<StagedFile> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir).map_err(|e| SyncError::persistence(dir, e))?;

    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| SyncError::persistence(path, io::Error::other(e)))?;

    let mut file = tempfile::Builder::new()
        .prefix(&tmp_prefix(path))
        .suffix(TMP_SUFFIX)
        .tempfile_in(dir)
        .map_err(|e| SyncError::persistence(dir, e))?;

    let written = (|| -> io::Result<()> {
        file.write_all(&bytes)?;
        file.flush()?;
        file.as_file().sync_all()
    })();
    // On error `file` is dropped here, which removes the temporary.
    written.map_err(|e| SyncError::persistence(file.path(), e))?;

    Ok(StagedFile {
        file,
        target: path.to_path_buf(),
    })
}

/// Stage + commit in one step.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    stage_json(path, value)?.commit()
}

/// Removes temporaries that interrupted writes of `path` left behind.
/// Returns how many were removed.
///
/// Only the process that owns `path` may call this: a temporary it removes
/// could belong to a write another process has in flight.
pub fn discard_leftovers(path: &Path) -> usize {
    let prefix = tmp_prefix(path);
    let entries = match fs::read_dir(parent_dir(path)) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with(&prefix) || !name.ends_with(TMP_SUFFIX) {
            continue;
        }
        let leftover = entry.path();
        match fs::remove_file(&leftover) {
            Ok(()) => {
                log::warn!(
                    "[PERSIST] discarded interrupted write {}; {} is authoritative",
                    leftover.display(),
                    path.display()
                );
                removed += 1;
            }
            Err(e) => log::warn!("[PERSIST] could not remove {}: {}", leftover.display(), e),
        }
    }
    removed
}

/// Returns whether the directory sync succeeded.
fn tolerate_unsynced_dir(target: &Path, synced: io::Result<()>) -> bool {
    match synced {
        Ok(()) => true,
        Err(e) => {
            log::warn!(
                "[PERSIST] {} replaced but its directory could not be synced: {}",
                target.display(),
                e
            );
            false
        }
    }
}

fn sync_parent_dir(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    File::open(parent_dir(path))?.sync_all()?;
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
