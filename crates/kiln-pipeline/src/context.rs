//! Read-only state shared by every stage of one build.

use std::collections::BTreeMap;
use std::path::Path;

use crate::config::{SiteConfig, WorkspaceConfig};
use crate::error::BuildError;
use crate::layout::{PackageLayout, Workspace};

/// Everything a stage may read about the build it belongs to.
///
/// Constructed once before the orchestrator starts and handed to stages by
/// shared reference; nothing in a build mutates it.
#[derive(Debug, Clone)]
pub struct BuildContext {
    workspace: Workspace,
    target: PackageLayout,
    site: SiteConfig,
}

impl BuildContext {
    /// Resolve the workspace and select the package being built.
    pub fn new(
        root: &Path,
        config: &WorkspaceConfig,
        target: impl Into<String>,
    ) -> Result<Self, BuildError> {
        let workspace = Workspace::resolve(root, &config.packages)?;
        let target: String = target.into();
        let target = workspace.package(&target)?.clone();

        Ok(Self {
            workspace,
            target,
            site: config.site.clone(),
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Name of the package being built.
    pub fn target_name(&self) -> &str {
        &self.target.name
    }

    /// Layout of the package being built.
    pub fn target(&self) -> &PackageLayout {
        &self.target
    }

    pub fn site_title(&self) -> &str {
        &self.site.title
    }

    /// Base context every page is rendered with.
    pub fn base_context(&self) -> BTreeMap<String, serde_json::Value> {
        let mut context = self.site.context.clone();
        context.insert(
            "title".to_string(),
            serde_json::Value::String(self.site.title.clone()),
        );
        context
    }

    /// Output roots the orchestrator empties before the first stage runs.
    pub fn owned_outputs(&self) -> Vec<&Path> {
        if self.target.is_owned() {
            vec![self.target.output_root.as_path()]
        } else {
            Vec::new()
        }
    }
}
