//! Full clean build of one package.

use std::sync::Arc;

use anyhow::Result;
use kiln_pipeline::{pipeline, BuildResult, Orchestrator, StageState};

use crate::config::Project;

/// Run the build command.
///
/// Configuration problems are returned as errors; stage failures are reported
/// in the returned result.
pub async fn run(
    project: &Project,
    package: Option<String>,
    jobs: Option<usize>,
) -> Result<BuildResult> {
    let target = project.target(package)?;
    let ctx = project.context(&target)?;
    let stages = pipeline::plan(&ctx, &project.config)?;
    let jobs = jobs.unwrap_or(project.config.build.jobs);
    let output_root = ctx.target().output_root.clone();

    tracing::info!("Building {} with up to {} jobs...", target, jobs);

    let mut orchestrator = Orchestrator::new(Arc::new(ctx), stages).with_jobs(jobs);
    let result = orchestrator.run().await;

    if let Some(cause) = &result.cause {
        let stage = result.failed_stage.as_deref().unwrap_or("setup");
        tracing::error!("{} failed in {} [{}]: {}", target, stage, cause.kind(), cause);

        let skipped = result
            .stages
            .iter()
            .filter(|(_, state)| *state == StageState::Pending)
            .count();
        if skipped > 0 {
            tracing::error!("{} stages did not run", skipped);
        }
    } else {
        tracing::info!(
            "Built {} stages ({} files) in {}ms",
            result.succeeded_stages.len(),
            result.files,
            result.duration_ms
        );
        tracing::info!("Output: {}", output_root.display());
    }

    Ok(result)
}
