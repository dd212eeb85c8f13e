//! Build pipeline for a design-system workspace.
//!
//! A workspace holds a component library, the prebuilt design system it
//! extends and a review site showing the components. Building a package runs
//! its stages as a dependency graph:
//!
//! - stylesheet compilation with lightningcss
//! - script concatenation and minification with oxc
//! - copying vendor and upstream output into the package's output tree
//! - rendering page templates with minijinja
//!
//! Packages that depend on another package's output trigger that package's
//! build first, as a subprocess.

pub mod assets;
pub mod config;
pub mod context;
pub mod error;
pub mod fs;
pub mod layout;
pub mod orchestrator;
pub mod pipeline;
pub mod scripts;
pub mod styles;
pub mod templates;
pub mod upstream;

#[cfg(test)]
mod test_support;

pub use config::{PackageConfig, PackageKind, WorkspaceConfig, CONFIG_FILE};
pub use context::BuildContext;
pub use error::BuildError;
pub use layout::{PackageLayout, PathRef, Workspace};
pub use orchestrator::{BuildResult, Orchestrator, RunState, Stage, StageState, StageTask};
