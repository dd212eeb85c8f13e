//! Helpers shared by unit tests.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use crate::config::{PackageConfig, PackageKind, WorkspaceConfig};
use crate::context::BuildContext;

/// Build a context for `target`, creating every package directory first.
pub fn context_for(root: &Path, packages: Vec<PackageConfig>, target: &str) -> BuildContext {
    for package in &packages {
        fs::create_dir_all(root.join(&package.path).join(&package.source)).unwrap();
    }
    let config = WorkspaceConfig {
        packages,
        ..Default::default()
    };
    BuildContext::new(root, &config, target).unwrap()
}

/// A context for stages that never look at it.
pub fn bare_context() -> (TempDir, BuildContext) {
    let temp = tempfile::tempdir().unwrap();
    let ctx = context_for(
        temp.path(),
        vec![PackageConfig::new("pkg", "pkg", PackageKind::Library)],
        "pkg",
    );
    (temp, ctx)
}
