//! Filesystem operations used by the stages.
//!
//! All functions are synchronous and wrap failures in [`BuildError::Io`] with the
//! offending path attached.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::BuildError;

/// Empty a directory, creating it if it does not exist.
///
/// The directory itself is kept; only its children are removed.
pub fn empty_dir(dir: &Path) -> Result<(), BuildError> {
    if !dir.exists() {
        return fs::create_dir_all(dir).map_err(|e| BuildError::io("create", dir, e));
    }

    let entries = fs::read_dir(dir).map_err(|e| BuildError::io("read", dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| BuildError::io("read", dir, e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| BuildError::io("inspect", &path, e))?;

        if file_type.is_dir() {
            fs::remove_dir_all(&path).map_err(|e| BuildError::io("remove", &path, e))?;
        } else {
            fs::remove_file(&path).map_err(|e| BuildError::io("remove", &path, e))?;
        }
    }

    Ok(())
}

/// Create a directory and all of its parents.
pub fn ensure_dir(dir: &Path) -> Result<(), BuildError> {
    fs::create_dir_all(dir).map_err(|e| BuildError::io("create", dir, e))
}

/// Write a file, creating parent directories as needed.
pub fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<(), BuildError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, contents).map_err(|e| BuildError::io("write", path, e))?;
    tracing::debug!("Wrote {}", path.display());
    Ok(())
}

pub fn read_file(path: &Path) -> Result<String, BuildError> {
    fs::read_to_string(path).map_err(|e| BuildError::io("read", path, e))
}

/// Copy a file or a directory tree, overwriting existing files.
///
/// Returns the number of files copied.
pub fn copy_path(source: &Path, destination: &Path) -> Result<usize, BuildError> {
    if !source.is_dir() {
        if let Some(parent) = destination.parent() {
            ensure_dir(parent)?;
        }
        fs::copy(source, destination).map_err(|e| BuildError::io("copy", source, e))?;
        return Ok(1);
    }

    let mut copied = 0;
    for entry in WalkDir::new(source).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            BuildError::io("walk", path, e.into())
        })?;

        let relative = entry
            .path()
            .strip_prefix(source)
            .unwrap_or(entry.path());
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| BuildError::io("copy", entry.path(), e))?;
            copied += 1;
        }
    }

    Ok(copied)
}
