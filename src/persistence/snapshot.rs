//! Atomic JSON snapshot files.
//!
//! Snapshots are written to a temporary file in the target directory and
//! renamed over the destination via `tempfile::NamedTempFile::persist()`, so
//! a crash mid-write leaves the previous snapshot intact.

use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::{AppError, Result};

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// # Errors
///
/// Returns `AppError::Store` on serialization or I/O failures.
pub fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| AppError::Store("snapshot path has no parent directory".into()))?;

    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::Store(format!(
            "failed to create snapshot directory {}: {err}",
            parent.display()
        ))
    })?;

    let bytes = serde_json::to_vec_pretty(value)?;

    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::Store(format!("failed to create temporary file: {err}")))?;
    tmp.write_all(&bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|err| AppError::Store(format!("failed to write temporary file: {err}")))?;

    tmp.persist(path).map_err(|err| {
        AppError::Store(format!(
            "failed to persist snapshot to {}: {err}",
            path.display()
        ))
    })?;

    Ok(())
}

/// Load a snapshot, returning `T::default()` when the file does not exist.
///
/// # Errors
///
/// Returns `AppError::Store` if the file exists but cannot be read or parsed.
pub fn read_snapshot<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(AppError::Store(format!(
            "failed to read snapshot {}: {err}",
            path.display()
        ))),
    }
}
