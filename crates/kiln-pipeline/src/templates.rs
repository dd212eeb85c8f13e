//! Page template rendering.
//!
//! Templates are resolved by name across an ordered list of search roots, so a
//! site can include macros from the design system and the component library
//! while shadowing any of them with its own copy.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use minijinja::{AutoEscape, Environment, ErrorKind};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::fs::write_file;
use crate::orchestrator::StageTask;

/// Context values a page is rendered with.
pub type PageContext = BTreeMap<String, serde_json::Value>;

/// A tree of page templates and where to resolve their dependencies.
#[derive(Debug, Clone)]
pub struct TemplateTree {
    /// Directory walked for pages; always the first search root
    pub root: PathBuf,

    /// Further search roots in priority order
    pub search_roots: Vec<PathBuf>,

    /// Subtrees, relative to `root`, that are never rendered on their own
    pub excluded: Vec<PathBuf>,

    /// Subtree, relative to `root`, rendered flat
    pub examples: Option<PathBuf>,

    /// Template file extension without the dot
    pub extension: String,
}

impl TemplateTree {
    /// All search roots, the tree's own root first.
    pub fn all_roots(&self) -> Vec<PathBuf> {
        std::iter::once(self.root.clone())
            .chain(self.search_roots.iter().cloned())
            .collect()
    }

    /// Lazily walk renderable pages, yielding paths relative to the root.
    ///
    /// Excluded subtrees and the examples subtree are pruned. Entries are
    /// visited in file-name order.
    pub fn pages(&self) -> impl Iterator<Item = Result<PathBuf, BuildError>> + '_ {
        WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| !self.is_pruned(entry.path()))
            .filter_map(move |entry| match entry {
                Ok(entry) => {
                    if !entry.file_type().is_file() || !self.is_template(entry.path()) {
                        return None;
                    }
                    let relative = entry.path().strip_prefix(&self.root).ok()?;
                    Some(Ok(relative.to_path_buf()))
                }
                Err(e) => {
                    let path = e.path().unwrap_or(&self.root).to_path_buf();
                    Some(Err(BuildError::io("walk", path, e.into())))
                }
            })
    }

    /// Templates directly inside the examples subtree, relative to the root.
    ///
    /// A missing examples directory yields nothing.
    pub fn examples(&self) -> Result<Vec<PathBuf>, BuildError> {
        let Some(examples) = &self.examples else {
            return Ok(Vec::new());
        };

        let dir = self.root.join(examples);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&dir).map_err(|e| BuildError::io("read", &dir, e))?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BuildError::io("read", &dir, e))?;
            let path = entry.path();
            if path.is_file() && self.is_template(&path) {
                found.push(examples.join(entry.file_name()));
            }
        }

        found.sort();
        Ok(found)
    }

    fn is_template(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str())
    }

    fn is_pruned(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }

        self.excluded
            .iter()
            .chain(self.examples.iter())
            .any(|subtree| relative.starts_with(subtree))
    }
}

/// Template engine using minijinja with a multi-root loader.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create an engine resolving names against `roots`, first match wins.
    ///
    /// Every template is HTML auto-escaped regardless of its extension.
    pub fn new(roots: Vec<PathBuf>) -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        env.set_loader(move |name| load_from_roots(&roots, name));
        Self { env }
    }

    /// Render a template by name.
    pub fn render(&self, name: &str, context: &PageContext) -> Result<String, minijinja::Error> {
        self.env.get_template(name)?.render(context)
    }
}

fn load_from_roots(roots: &[PathBuf], name: &str) -> Result<Option<String>, minijinja::Error> {
    let Some(relative) = safe_relative(name) else {
        return Ok(None);
    };

    for root in roots {
        let path = root.join(&relative);
        if path.is_file() {
            return fs::read_to_string(&path).map(Some).map_err(|e| {
                minijinja::Error::new(
                    ErrorKind::InvalidOperation,
                    format!("could not read template {}", path.display()),
                )
                .with_source(e)
            });
        }
    }

    Ok(None)
}

/// Convert a template name to a relative path, refusing to leave the root.
fn safe_relative(name: &str) -> Option<PathBuf> {
    let mut path = PathBuf::new();
    for segment in name.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => return None,
            segment => path.push(segment),
        }
    }
    (!path.as_os_str().is_empty()).then_some(path)
}

/// Template name used by the engine for a relative path.
pub fn template_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Logical page name: the template name without its extension.
pub fn logical_name(relative: &Path) -> String {
    template_name(&relative.with_extension(""))
}

/// Output path of a page.
///
/// `index` maps to `index.html` in its own directory, every other page gets a
/// directory of its own: `about.njk` becomes `about/index.html`. A nested
/// `index` is its directory's index page, so `guides/index.njk` becomes
/// `guides/index.html` rather than `guides/index/index.html`.
pub fn page_output_path(output_root: &Path, relative: &Path) -> PathBuf {
    let stem = relative
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("index");
    let parent = relative.parent().unwrap_or(Path::new(""));

    if stem == "index" {
        output_root.join(parent).join("index.html")
    } else {
        output_root.join(parent).join(stem).join("index.html")
    }
}

/// Output path of an example: `examples/foo.njk` becomes `examples/foo.html`.
pub fn example_output_path(output_root: &Path, relative: &Path) -> PathBuf {
    output_root.join(relative.with_extension("html"))
}

/// A page scheduled for rendering.
#[derive(Debug, Clone)]
struct RenderJob {
    relative: PathBuf,
    output: PathBuf,
}

/// Stage rendering a package's template tree.
#[derive(Debug, Clone)]
pub struct TemplateStage {
    tree: TemplateTree,
    output_root: PathBuf,
    overrides: BTreeMap<String, PageContext>,
}

impl TemplateStage {
    pub fn new(tree: TemplateTree, output_root: impl Into<PathBuf>) -> Self {
        Self {
            tree,
            output_root: output_root.into(),
            overrides: BTreeMap::new(),
        }
    }

    /// Per-page context overrides, keyed by logical page name.
    pub fn with_overrides(mut self, overrides: BTreeMap<String, PageContext>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Every file this stage would write with the current sources.
    pub fn outputs(&self) -> Result<Vec<PathBuf>, BuildError> {
        Ok(self.jobs()?.into_iter().map(|job| job.output).collect())
    }

    /// Collect pages and examples, rejecting two templates with one output.
    fn jobs(&self) -> Result<Vec<RenderJob>, BuildError> {
        let mut jobs = Vec::new();

        for page in self.tree.pages() {
            let relative = page?;
            let output = page_output_path(&self.output_root, &relative);
            jobs.push(RenderJob { relative, output });
        }

        for relative in self.tree.examples()? {
            let output = example_output_path(&self.output_root, &relative);
            jobs.push(RenderJob { relative, output });
        }

        let mut seen: HashMap<&Path, &Path> = HashMap::new();
        for job in &jobs {
            if let Some(other) = seen.insert(&job.output, &job.relative) {
                return Err(BuildError::Configuration(format!(
                    "templates {} and {} both render to {}",
                    other.display(),
                    job.relative.display(),
                    job.output.display()
                )));
            }
        }

        Ok(jobs)
    }

    fn render_job(
        &self,
        engine: &TemplateEngine,
        base: &PageContext,
        job: &RenderJob,
    ) -> Result<(), BuildError> {
        let name = template_name(&job.relative);

        let mut context = base.clone();
        if let Some(overrides) = self.overrides.get(&logical_name(&job.relative)) {
            context.extend(overrides.clone());
        }

        let html = engine
            .render(&name, &context)
            .map_err(|e| BuildError::TemplateResolution {
                template: name.clone(),
                message: e.to_string(),
            })?;

        write_file(&job.output, html)?;
        tracing::debug!("Rendered {} -> {}", name, job.output.display());
        Ok(())
    }
}

impl StageTask for TemplateStage {
    fn run(&self, ctx: &BuildContext) -> Result<usize, BuildError> {
        let engine = TemplateEngine::new(self.tree.all_roots());
        let base = ctx.base_context();
        let jobs = self.jobs()?;

        let results: Vec<Result<(), BuildError>> = jobs
            .par_iter()
            .map(|job| self.render_job(&engine, &base, job))
            .collect();

        for result in results {
            result?;
        }

        tracing::info!("Rendered {} pages", jobs.len());
        Ok(jobs.len())
    }
}
