//! Empty a package's output directory without building.

use std::sync::Arc;

use anyhow::Result;
use kiln_pipeline::Orchestrator;

use crate::config::Project;

/// Run the clean command.
pub fn run(project: &Project, package: Option<String>) -> Result<()> {
    let target = project.target(package)?;
    let ctx = project.context(&target)?;

    if ctx.owned_outputs().is_empty() {
        tracing::warn!("{} is a vendor package; nothing to clean", target);
        return Ok(());
    }

    Orchestrator::new(Arc::new(ctx), Vec::new()).clean()?;
    Ok(())
}
