//! Locating and loading the workspace configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use kiln_pipeline::{BuildContext, WorkspaceConfig, CONFIG_FILE};

/// A loaded workspace: its root directory and parsed configuration.
#[derive(Debug)]
pub struct Project {
    pub root: PathBuf,
    pub config: WorkspaceConfig,
}

impl Project {
    /// Load `kiln.toml` from `root`, or from the nearest ancestor of the
    /// current directory that has one.
    pub fn load(root: Option<&Path>) -> Result<Self> {
        let root = match root {
            Some(root) => root.to_path_buf(),
            None => {
                let cwd = std::env::current_dir().context("Failed to read current directory")?;
                find_root(&cwd).with_context(|| {
                    format!("No {} found in {} or any parent", CONFIG_FILE, cwd.display())
                })?
            }
        };

        let root = root
            .canonicalize()
            .with_context(|| format!("Workspace root not found: {}", root.display()))?;

        let path = root.join(CONFIG_FILE);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: WorkspaceConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        tracing::debug!("Loaded config from {}", path.display());

        Ok(Self { root, config })
    }

    /// Name of the package to operate on.
    pub fn target(&self, package: Option<String>) -> Result<String> {
        if let Some(package) = package {
            return Ok(package);
        }

        match self.config.default_target() {
            Some(name) => Ok(name.to_string()),
            None => bail!("Several packages could be built; choose one with --package"),
        }
    }

    /// Resolve the workspace for a build of `target`.
    pub fn context(&self, target: &str) -> Result<BuildContext> {
        Ok(BuildContext::new(&self.root, &self.config, target)?)
    }
}

/// Nearest directory, starting at `start`, that contains the config file.
pub fn find_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(CONFIG_FILE).is_file())
        .map(Path::to_path_buf)
}
