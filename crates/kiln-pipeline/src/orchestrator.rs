//! Stage DAG and build orchestration.
//!
//! The orchestrator:
//! 1. Validates the stage graph (unknown dependencies, cycles)
//! 2. Empties every output root the build owns
//! 3. Executes stages wave by wave, independent stages concurrently
//! 4. Stops starting new stages after the first failure

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::fs::empty_dir;

/// The work a stage performs.
///
/// Returns the number of files written.
pub trait StageTask: Send + Sync {
    fn run(&self, ctx: &BuildContext) -> Result<usize, BuildError>;
}

impl<F> StageTask for F
where
    F: Fn(&BuildContext) -> Result<usize, BuildError> + Send + Sync,
{
    fn run(&self, ctx: &BuildContext) -> Result<usize, BuildError> {
        self(ctx)
    }
}

/// A named unit of pipeline work with declared dependencies.
#[derive(Clone)]
pub struct Stage {
    name: String,
    depends_on: Vec<String>,
    task: Arc<dyn StageTask>,
}

impl Stage {
    pub fn new(name: impl Into<String>, task: impl StageTask + 'static) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            task: Arc::new(task),
        }
    }

    /// Declare stages that must succeed before this one runs.
    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn run(&self, ctx: &BuildContext) -> Result<usize, BuildError> {
        self.task.run(ctx)
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of a single stage within one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Lifecycle of the build as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    InProgress,
    Completed,
    Aborted,
}

/// Outcome of one orchestrator run.
#[derive(Debug)]
pub struct BuildResult {
    /// Stages that succeeded, in completion order
    pub succeeded_stages: Vec<String>,

    /// First failed stage in declaration order
    pub failed_stage: Option<String>,

    /// Why the build failed
    pub cause: Option<BuildError>,

    /// Final state of every stage, in declaration order
    pub stages: Vec<(String, StageState)>,

    pub run_state: RunState,

    /// Files written by all stages
    pub files: usize,

    /// Total build time in milliseconds
    pub duration_ms: u64,
}

impl BuildResult {
    pub fn is_success(&self) -> bool {
        self.run_state == RunState::Completed
    }

    /// Process exit code for this result.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// State of a stage by name.
    pub fn state_of(&self, name: &str) -> Option<StageState> {
        self.stages
            .iter()
            .find(|(stage, _)| stage == name)
            .map(|(_, state)| *state)
    }
}

/// Sequences stages as a dependency graph.
pub struct Orchestrator {
    ctx: Arc<BuildContext>,
    stages: Vec<Stage>,
    jobs: usize,
    state: RunState,
}

impl Orchestrator {
    pub fn new(ctx: Arc<BuildContext>, stages: Vec<Stage>) -> Self {
        Self {
            ctx,
            stages,
            jobs: 1,
            state: RunState::NotStarted,
        }
    }

    /// Allow up to `jobs` independent stages to run at once.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Compute execution waves without running anything.
    ///
    /// Each wave holds stages whose dependencies all sit in earlier waves.
    pub fn plan(&self) -> Result<Vec<Vec<String>>, BuildError> {
        let waves = compute_waves(&self.stages)?;
        Ok(waves
            .into_iter()
            .map(|wave| {
                wave.into_iter()
                    .map(|idx| self.stages[idx].name.clone())
                    .collect()
            })
            .collect())
    }

    /// Empty every output root this build owns.
    pub fn clean(&self) -> Result<(), BuildError> {
        for output in self.ctx.owned_outputs() {
            info!("Cleaning {}", output.display());
            empty_dir(output)?;
        }
        Ok(())
    }

    /// Run the build to completion or first failure.
    pub async fn run(&mut self) -> BuildResult {
        let start = Instant::now();
        self.state = RunState::InProgress;

        let mut states = vec![StageState::Pending; self.stages.len()];
        let mut succeeded = Vec::new();
        let mut files = 0;
        let mut failure: Option<(Option<usize>, BuildError)> = None;

        let waves = match compute_waves(&self.stages).and_then(|waves| {
            self.clean()?;
            Ok(waves)
        }) {
            Ok(waves) => waves,
            Err(e) => {
                error!("Build aborted before any stage ran: {}", e);
                failure = Some((None, e));
                Vec::new()
            }
        };

        info!(
            stages = self.stages.len(),
            waves = waves.len(),
            "Building {}",
            self.ctx.target_name()
        );

        let semaphore = Arc::new(Semaphore::new(self.jobs));

        for (wave_idx, wave) in waves.iter().enumerate() {
            if failure.is_some() {
                break;
            }

            debug!(wave = wave_idx, stages = wave.len(), "executing wave");

            let mut set = JoinSet::new();
            for &idx in wave {
                states[idx] = StageState::Running;

                let permit = Arc::clone(&semaphore).acquire_owned().await.ok();
                let stage = self.stages[idx].clone();
                let ctx = Arc::clone(&self.ctx);

                set.spawn_blocking(move || {
                    let _permit = permit;
                    info!("Running stage {}", stage.name);
                    let outcome = catch_unwind(AssertUnwindSafe(|| stage.run(&ctx)))
                        .unwrap_or_else(|_| Err(BuildError::StagePanicked(stage.name.clone())));
                    (idx, outcome)
                });
            }

            let mut outcomes = Vec::with_capacity(wave.len());
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => error!("Stage task was cancelled: {}", e),
                }
            }
            outcomes.sort_by_key(|(idx, _)| *idx);

            for (idx, outcome) in outcomes {
                let name = &self.stages[idx].name;
                match outcome {
                    Ok(written) => {
                        info!("Stage {} succeeded ({} files)", name, written);
                        states[idx] = StageState::Succeeded;
                        succeeded.push(name.clone());
                        files += written;
                    }
                    Err(e) => {
                        error!("Stage {} failed: {}", name, e);
                        states[idx] = StageState::Failed;
                        if failure.is_none() {
                            failure = Some((Some(idx), e));
                        }
                    }
                }
            }

            // A stage whose task never reported back is treated as failed.
            for &idx in wave {
                if states[idx] == StageState::Running {
                    states[idx] = StageState::Failed;
                    if failure.is_none() {
                        let name = self.stages[idx].name.clone();
                        failure = Some((Some(idx), BuildError::StagePanicked(name)));
                    }
                }
            }
        }

        let pending: Vec<&str> = self
            .stages
            .iter()
            .zip(&states)
            .filter(|(_, state)| **state == StageState::Pending)
            .map(|(stage, _)| stage.name.as_str())
            .collect();
        if failure.is_some() && !pending.is_empty() {
            warn!("Skipped stages after failure: {}", pending.join(", "));
        }

        let (failed_stage, cause) = match failure {
            Some((idx, e)) => (idx.map(|i| self.stages[i].name.clone()), Some(e)),
            None => (None, None),
        };

        self.state = if cause.is_some() {
            RunState::Aborted
        } else {
            RunState::Completed
        };

        BuildResult {
            succeeded_stages: succeeded,
            failed_stage,
            cause,
            stages: self
                .stages
                .iter()
                .map(|s| s.name.clone())
                .zip(states)
                .collect(),
            run_state: self.state,
            files,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Group stage indices into dependency levels.
fn compute_waves(stages: &[Stage]) -> Result<Vec<Vec<usize>>, BuildError> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..stages.len()).map(|i| graph.add_node(i)).collect();

    let mut by_name: HashMap<&str, usize> = HashMap::new();
    for (idx, stage) in stages.iter().enumerate() {
        if by_name.insert(stage.name.as_str(), idx).is_some() {
            return Err(BuildError::Configuration(format!(
                "stage `{}` is declared more than once",
                stage.name
            )));
        }
    }

    for (idx, stage) in stages.iter().enumerate() {
        for dep in &stage.depends_on {
            let Some(&dep_idx) = by_name.get(dep.as_str()) else {
                return Err(BuildError::Configuration(format!(
                    "stage `{}` depends on unknown stage `{}`",
                    stage.name, dep
                )));
            };
            // Edge from dependency to dependent
            graph.add_edge(nodes[dep_idx], nodes[idx], ());
        }
    }

    let sorted = toposort(&graph, None).map_err(|cycle| {
        BuildError::Configuration(format!(
            "dependency cycle involving stage `{}`",
            stages[graph[cycle.node_id()]].name
        ))
    })?;

    let mut level = vec![0usize; stages.len()];
    for node in sorted {
        let idx = graph[node];
        level[idx] = graph
            .neighbors_directed(node, Direction::Incoming)
            .map(|dep| level[graph[dep]] + 1)
            .max()
            .unwrap_or(0);
    }

    let depth = level.iter().copied().max().map_or(0, |max| max + 1);
    let mut waves = vec![Vec::new(); depth];
    for (idx, &lvl) in level.iter().enumerate() {
        waves[lvl].push(idx);
    }

    Ok(waves)
}
