//! Atomic file replacement.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::PersistError;

/// Writes `content` to `target` so readers see either the old or the new file.
///
/// The bytes go to a temp file in the target's directory, are fsynced, and the
/// temp file is renamed over `target`. Missing parent directories are created.
///
/// # Errors
///
/// Returns [`PersistError::Io`] on any filesystem failure; `target` is left
/// untouched in that case.
pub fn write_atomic(target: &Path, content: &[u8]) -> Result<(), PersistError> {
    let dir = parent_dir(target);
    fs::create_dir_all(&dir).map_err(|e| PersistError::io(&dir, e))?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| PersistError::io(&dir, e))?;
    tmp.write_all(content)
        .map_err(|e| PersistError::io(tmp.path(), e))?;
    tmp.flush().map_err(|e| PersistError::io(tmp.path(), e))?;
    tmp.as_file_mut()
        .sync_all()
        .map_err(|e| PersistError::io(tmp.path(), e))?;

    tmp.persist(target)
        .map_err(|e| PersistError::io(target, e.error))?;
    Ok(())
}

fn parent_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
