//! Print the stage waves of a build.

use std::sync::Arc;

use anyhow::Result;
use kiln_pipeline::{pipeline, Orchestrator};

use crate::config::Project;

/// Run the plan command.
pub fn run(project: &Project, package: Option<String>) -> Result<()> {
    let target = project.target(package)?;
    let ctx = project.context(&target)?;
    let stages = pipeline::plan(&ctx, &project.config)?;

    let orchestrator = Orchestrator::new(Arc::new(ctx), stages);
    let waves = orchestrator.plan()?;

    println!("{target}");
    for (idx, wave) in waves.iter().enumerate() {
        println!("  wave {}: {}", idx + 1, wave.join(", "));
    }
    Ok(())
}
