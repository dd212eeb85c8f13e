//! Turns a package's configuration into orchestrator stages.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::assets::{AssetStage, CopyEntry};
use crate::config::{PackageConfig, TemplateConfig, WorkspaceConfig};
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::layout::{check_relative, PathRef, Root};
use crate::orchestrator::Stage;
use crate::scripts::{ScriptBundleSpec, ScriptStage};
use crate::styles::{StyleEntry, StyleStage};
use crate::templates::{TemplateStage, TemplateTree};
use crate::upstream::UpstreamTrigger;

pub const STYLES: &str = "styles";
pub const SCRIPTS: &str = "scripts";
pub const ASSETS: &str = "assets";
pub const TEMPLATES: &str = "templates";

/// Name of the stage building an upstream package.
pub fn upstream_stage_name(package: &str) -> String {
    format!("upstream:{package}")
}

/// Command rebuilding `package` with this same executable.
pub fn default_upstream_command(
    workspace_root: &Path,
    package: &str,
) -> Result<Vec<String>, BuildError> {
    let exe = std::env::current_exe()
        .map_err(|e| BuildError::io("locate", "current executable", e))?;

    Ok(vec![
        exe.to_string_lossy().into_owned(),
        "build".to_string(),
        "--package".to_string(),
        package.to_string(),
        "--root".to_string(),
        workspace_root.to_string_lossy().into_owned(),
    ])
}

/// Reject upstream chains that lead back to a package already in the chain.
///
/// Every upstream build re-plans its own upstreams, so a cycle anywhere
/// reachable from `target` would rebuild forever.
pub fn check_upstream_cycles(config: &WorkspaceConfig, target: &str) -> Result<(), BuildError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
    let mut queue = vec![target];
    nodes.insert(target, graph.add_node(target));

    while let Some(name) = queue.pop() {
        let package = config
            .package(name)
            .ok_or_else(|| BuildError::Configuration(format!("unknown package `{name}`")))?;
        let from = nodes[name];

        for upstream in &package.upstream {
            let dep = upstream.package.as_str();
            let to = match nodes.get(dep) {
                Some(&node) => node,
                None => {
                    let node = graph.add_node(dep);
                    nodes.insert(dep, node);
                    queue.push(dep);
                    node
                }
            };
            graph.add_edge(from, to, ());
        }
    }

    toposort(&graph, None).map(|_| ()).map_err(|cycle| {
        BuildError::Configuration(format!(
            "upstream cycle involving package `{}`",
            graph[cycle.node_id()]
        ))
    })
}

/// Build the stage list for the context's target package.
///
/// Upstream stages come first and every other stage depends on all of them.
/// Templates additionally wait for asset copies. All declared outputs, rendered
/// pages included, must resolve inside the target's output root and must not
/// overlap.
pub fn plan(ctx: &BuildContext, config: &WorkspaceConfig) -> Result<Vec<Stage>, BuildError> {
    let target = ctx.target();
    let package = config.package(&target.name).ok_or_else(|| {
        BuildError::Configuration(format!("unknown package `{}`", target.name))
    })?;

    if !target.is_owned() && has_stages(package) {
        return Err(BuildError::Configuration(format!(
            "vendor package `{}` cannot declare build stages",
            package.name
        )));
    }

    check_upstream_cycles(config, &package.name)?;

    let mut outputs = OutputSet::new(&target.output_root);
    let mut stages = Vec::new();

    let mut upstream_names = Vec::new();
    for upstream in &package.upstream {
        let layout = ctx.workspace().package(&upstream.package)?;
        let command = match &upstream.command {
            Some(command) => command.clone(),
            None => default_upstream_command(ctx.workspace().root(), &upstream.package)?,
        };

        let name = upstream_stage_name(&upstream.package);
        let trigger = UpstreamTrigger::new(&upstream.package, &command, &layout.root)?;
        stages.push(Stage::new(name.clone(), trigger));
        upstream_names.push(name);
    }

    if !package.styles.is_empty() {
        let mut entries = Vec::new();
        for style in &package.styles {
            let output_file = outputs.claim(STYLES, &style.output)?;
            let search_paths = style
                .search_paths
                .iter()
                .map(|p| ctx.workspace().resolve_ref(p, &package.name, Root::Source))
                .collect::<Result<Vec<_>, _>>()?;

            entries.push(StyleEntry {
                entry_file: ctx
                    .workspace()
                    .resolve_ref(&style.entry, &package.name, Root::Source)?,
                search_paths,
                output_file,
                minify: style.minify,
            });
        }
        stages.push(Stage::new(STYLES, StyleStage::new(entries)).after(upstream_names.clone()));
    }

    if !package.scripts.is_empty() {
        let mut bundles = Vec::new();
        for script in &package.scripts {
            bundles.push(ScriptBundleSpec {
                source_root: target.source_root.clone(),
                source_glob: script.sources.clone(),
                bundle_file: outputs.claim(SCRIPTS, &script.bundle)?,
                minified_file: outputs.claim(SCRIPTS, &script.minified)?,
            });
        }
        stages.push(Stage::new(SCRIPTS, ScriptStage::new(bundles)).after(upstream_names.clone()));
    }

    let has_assets = !package.copy.is_empty();
    if has_assets {
        let mut entries = Vec::new();
        for copy in &package.copy {
            let destination = ctx
                .workspace()
                .resolve_ref(&copy.to, &package.name, Root::Output)?;
            outputs.claim_resolved(ASSETS, destination.clone(), &copy.to)?;

            entries.push(CopyEntry {
                source: ctx
                    .workspace()
                    .resolve_ref(&copy.from, &package.name, Root::Source)?,
                destination,
                required: copy.required,
            });
        }
        stages.push(Stage::new(ASSETS, AssetStage::new(entries)).after(upstream_names.clone()));
    }

    if let Some(templates) = &package.templates {
        let tree = template_tree(ctx, package, templates)?;
        let stage = TemplateStage::new(tree, &target.output_root)
            .with_overrides(templates.pages.clone());
        for output in stage.outputs()? {
            outputs.claim_rendered(TEMPLATES, output)?;
        }

        let mut deps = upstream_names.clone();
        if has_assets {
            deps.push(ASSETS.to_string());
        }
        stages.push(Stage::new(TEMPLATES, stage).after(deps));
    }

    tracing::debug!(
        package = %package.name,
        stages = stages.len(),
        "Planned stages"
    );

    Ok(stages)
}

fn has_stages(package: &PackageConfig) -> bool {
    !package.styles.is_empty()
        || !package.scripts.is_empty()
        || !package.upstream.is_empty()
        || !package.copy.is_empty()
        || package.templates.is_some()
}

fn template_tree(
    ctx: &BuildContext,
    package: &PackageConfig,
    config: &TemplateConfig,
) -> Result<TemplateTree, BuildError> {
    let relative = |what: &str, value: &str| -> Result<PathBuf, BuildError> {
        let path = PathBuf::from(value);
        check_relative(&path).map_err(|e| {
            BuildError::Configuration(format!("package `{}` templates {what}: {e}", package.name))
        })?;
        Ok(path
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect())
    };

    let root = relative("root", config.root.to_string_lossy().as_ref())?;
    let excluded = config
        .exclude
        .iter()
        .map(|e| relative("exclude", e.as_str()))
        .collect::<Result<Vec<_>, _>>()?;
    let examples = config
        .examples
        .as_deref()
        .map(|e| relative("examples", e))
        .transpose()?;
    let search_roots = config
        .search_roots
        .iter()
        .map(|p| ctx.workspace().resolve_ref(p, &package.name, Root::Source))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TemplateTree {
        root: ctx.target().source_root.join(root),
        search_roots,
        excluded,
        examples,
        extension: config.extension.clone(),
    })
}

/// Output paths claimed so far, each inside one output root.
///
/// A claimed path may be a file or a directory tree; no claim may equal or
/// contain another.
struct OutputSet<'a> {
    output_root: &'a Path,
    claimed: Vec<(PathBuf, &'static str)>,
}

impl<'a> OutputSet<'a> {
    fn new(output_root: &'a Path) -> Self {
        Self {
            output_root,
            claimed: Vec::new(),
        }
    }

    /// Claim a path relative to the output root.
    fn claim(&mut self, stage: &'static str, relative: &Path) -> Result<PathBuf, BuildError> {
        check_relative(relative).map_err(|e| {
            BuildError::Configuration(format!(
                "{stage} output {}: {e}",
                relative.display()
            ))
        })?;
        let path = self.output_root.join(relative);
        self.insert(stage, path.clone(), &relative.display().to_string())?;
        Ok(path)
    }

    /// Claim a path computed from discovered sources.
    fn claim_rendered(&mut self, stage: &'static str, path: PathBuf) -> Result<(), BuildError> {
        let declared = path
            .strip_prefix(self.output_root)
            .unwrap_or(&path)
            .display()
            .to_string();
        self.insert(stage, path, &declared)
    }

    /// Claim an already resolved path.
    fn claim_resolved(
        &mut self,
        stage: &'static str,
        path: PathBuf,
        declared: &PathRef,
    ) -> Result<(), BuildError> {
        self.insert(stage, path, &declared.to_string())
    }

    fn insert(&mut self, stage: &'static str, path: PathBuf, declared: &str) -> Result<(), BuildError> {
        if !path.starts_with(self.output_root) {
            return Err(BuildError::Configuration(format!(
                "{stage} output `{declared}` is outside the output root {}",
                self.output_root.display()
            )));
        }

        for (existing, other) in &self.claimed {
            if *existing == path {
                return Err(BuildError::Configuration(format!(
                    "{} is written by both {other} and {stage}",
                    path.display()
                )));
            }
            if existing.starts_with(&path) || path.starts_with(existing) {
                return Err(BuildError::Configuration(format!(
                    "{stage} output {} overlaps {other} output {}",
                    path.display(),
                    existing.display()
                )));
            }
        }

        self.claimed.push((path, stage));
        Ok(())
    }
}
