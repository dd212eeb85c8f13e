//! Asset copying.
//!
//! Copies prebuilt vendor files, upstream build output and static assets into
//! the output tree, in the order they are declared.

use std::path::PathBuf;

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::fs::copy_path;
use crate::orchestrator::StageTask;

/// A file or directory to copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyEntry {
    pub source: PathBuf,
    pub destination: PathBuf,

    /// Missing optional sources are skipped; missing required ones abort
    pub required: bool,
}

/// Stage copying a list of entries.
#[derive(Debug, Clone)]
pub struct AssetStage {
    entries: Vec<CopyEntry>,
}

impl AssetStage {
    pub fn new(entries: Vec<CopyEntry>) -> Self {
        Self { entries }
    }

    /// Copy every entry, returning the number of files written.
    ///
    /// Stops at the first missing required source. Files copied by earlier
    /// entries are left in place.
    pub fn copy_all(&self) -> Result<usize, BuildError> {
        let mut copied = 0;

        for entry in &self.entries {
            if !entry.source.exists() {
                if entry.required {
                    return Err(BuildError::MissingAsset(entry.source.clone()));
                }
                tracing::warn!(
                    "Skipping optional asset, not found: {}",
                    entry.source.display()
                );
                continue;
            }

            let count = copy_path(&entry.source, &entry.destination)?;
            tracing::info!(
                "Copied {} -> {} ({} files)",
                entry.source.display(),
                entry.destination.display(),
                count
            );
            copied += count;
        }

        Ok(copied)
    }
}

impl StageTask for AssetStage {
    fn run(&self, _ctx: &BuildContext) -> Result<usize, BuildError> {
        self.copy_all()
    }
}
