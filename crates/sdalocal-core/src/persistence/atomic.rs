//! Atomic replacement of the data file.
//!
//! # Atomic Write Strategy
//!
//! 1. Write to `{name}.tmp` in the same directory and fsync it
//! 2. Rename to `{name}` (atomic on the same filesystem)
//!
//! A reader therefore sees either the old document or the new one, never a
//! half-written file.
//!
//! # Unreadable Files
//!
//! When startup could not read the existing file, the first write moves it
//! aside to `{name}.corrupt-{timestamp}` before anything is written, so the
//! damaged bytes stay on disk for manual recovery.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;

use super::controller::PersistError;

/// The on-disk target of a controller, shared with its flush worker.
#[derive(Debug)]
pub struct StoreFile {
    path: PathBuf,
    preserve_pending: AtomicBool,
}

impl StoreFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            preserve_pending: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The current file could not be read; set it aside before the next write.
    pub fn mark_unreadable(&self) {
        self.preserve_pending.store(true, Ordering::Release);
    }

    pub fn preserve_pending(&self) -> bool {
        self.preserve_pending.load(Ordering::Acquire)
    }

    /// Atomically replace the file with `bytes`.
    pub fn write(&self, bytes: &[u8]) -> Result<(), PersistError> {
        if self.preserve_pending() {
            match preserve_unreadable(&self.path) {
                Ok(Some(backup)) => log::warn!(
                    "Moved unreadable data file {} to {}",
                    self.path.display(),
                    backup.display()
                ),
                Ok(None) => {}
                Err(source) => {
                    return Err(PersistError::Io {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
            self.preserve_pending.store(false, Ordering::Release);
        }

        write_atomic(&self.path, bytes).map_err(|source| PersistError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// `{target}.tmp`, next to the target.
pub fn temp_path(target: &Path) -> PathBuf {
    sibling(target, "tmp")
}

/// Write `bytes` to `target` through a temp file and a rename.
///
/// Creates the parent directory if needed. On failure the temp file is
/// removed and `target` is untouched.
pub fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(dir) = target.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir)?;
        }
    }

    let temp = temp_path(target);
    let result = write_synced(&temp, bytes).and_then(|()| fs::rename(&temp, target));

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

/// Move `target` to `{target}.corrupt-{UTC stamp}` if it exists.
pub fn preserve_unreadable(target: &Path) -> io::Result<Option<PathBuf>> {
    if !target.exists() {
        return Ok(None);
    }

    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let mut backup = sibling(target, &format!("corrupt-{stamp}"));
    let mut attempt = 1;
    while backup.exists() {
        backup = sibling(target, &format!("corrupt-{stamp}-{attempt}"));
        attempt += 1;
    }

    fs::rename(target, &backup)?;
    Ok(Some(backup))
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn sibling(target: &Path, suffix: &str) -> PathBuf {
    let mut name = target
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    target.with_file_name(name)
}

// ============================================================================
// TESTS
// ============================================================================
