//! Stylesheet compilation.
//!
//! Entry stylesheets are bundled with lightningcss: every `@import` is inlined,
//! resolved first next to the importing file and then against the entry's
//! search paths in order.

use std::io;
use std::path::{Path, PathBuf};

use lightningcss::bundler::{Bundler, FileProvider, ResolveResult, SourceProvider};
use lightningcss::stylesheet::{ParserOptions, PrinterOptions};

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::fs::write_file;
use crate::orchestrator::StageTask;

/// One stylesheet compilation unit.
#[derive(Debug, Clone)]
pub struct StyleEntry {
    /// Root stylesheet
    pub entry_file: PathBuf,

    /// Directories consulted for imports, in priority order
    pub search_paths: Vec<PathBuf>,

    pub output_file: PathBuf,

    /// Emit compressed CSS
    pub minify: bool,
}

/// Source provider that falls back to a list of search paths.
struct SearchPathProvider<'a> {
    files: FileProvider,
    search_paths: &'a [PathBuf],
}

impl<'a> SearchPathProvider<'a> {
    fn new(search_paths: &'a [PathBuf]) -> Self {
        Self {
            files: FileProvider::new(),
            search_paths,
        }
    }
}

impl SourceProvider for SearchPathProvider<'_> {
    type Error = io::Error;

    fn read<'a>(&'a self, file: &Path) -> Result<&'a str, Self::Error> {
        self.files.read(file)
    }

    fn resolve(&self, specifier: &str, originating_file: &Path) -> Result<ResolveResult, Self::Error> {
        let base = originating_file.parent().unwrap_or(Path::new(""));
        let dirs = std::iter::once(base).chain(self.search_paths.iter().map(PathBuf::as_path));

        for dir in dirs {
            for candidate in candidates(specifier) {
                let path = dir.join(&candidate);
                if path.is_file() {
                    return Ok(ResolveResult::File(path));
                }
            }
        }

        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!(
                "cannot resolve import `{}` from {}",
                specifier,
                originating_file.display()
            ),
        ))
    }
}

/// File names an import specifier may refer to.
///
/// `tokens` also matches `tokens.css` and the partial `_tokens.css`.
fn candidates(specifier: &str) -> Vec<PathBuf> {
    let path = PathBuf::from(specifier);
    if path.extension().is_some() {
        return vec![path];
    }

    let mut names = vec![path.with_extension("css")];
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        names.push(path.with_file_name(format!("_{name}.css")));
    }
    names
}

/// Compile one entry to CSS text.
///
/// The result depends only on the entry, its imports and the search paths.
pub fn compile(entry: &StyleEntry) -> Result<String, BuildError> {
    let provider = SearchPathProvider::new(&entry.search_paths);
    let mut bundler = Bundler::new(&provider, None, ParserOptions::default());

    let stylesheet = bundler
        .bundle(&entry.entry_file)
        .map_err(|e| BuildError::Compilation {
            entry: entry.entry_file.clone(),
            message: e.to_string(),
        })?;

    let css = stylesheet
        .to_css(PrinterOptions {
            minify: entry.minify,
            ..Default::default()
        })
        .map_err(|e| BuildError::Compilation {
            entry: entry.entry_file.clone(),
            message: e.to_string(),
        })?;

    Ok(css.code)
}

/// Stage compiling every style entry of a package.
#[derive(Debug, Clone)]
pub struct StyleStage {
    entries: Vec<StyleEntry>,
}

impl StyleStage {
    pub fn new(entries: Vec<StyleEntry>) -> Self {
        Self { entries }
    }
}

impl StageTask for StyleStage {
    fn run(&self, _ctx: &BuildContext) -> Result<usize, BuildError> {
        for entry in &self.entries {
            let css = compile(entry)?;
            write_file(&entry.output_file, css)?;
            tracing::info!(
                "Compiled {} -> {}",
                entry.entry_file.display(),
                entry.output_file.display()
            );
        }
        Ok(self.entries.len())
    }
}
