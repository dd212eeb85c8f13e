//! Script bundling.
//!
//! Component scripts matching a glob are concatenated in path order into one
//! bundle, which is then minified with oxc.

use std::path::PathBuf;

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_span::SourceType;

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::fs::{read_file, write_file};
use crate::orchestrator::StageTask;

/// Separator placed between concatenated files.
const SEPARATOR: &str = "\n";

/// A script bundle to produce.
#[derive(Debug, Clone)]
pub struct ScriptBundleSpec {
    /// Directory the glob is relative to
    pub source_root: PathBuf,

    /// Glob pattern, e.g. `components/**/*.js`
    pub source_glob: String,

    pub bundle_file: PathBuf,

    pub minified_file: PathBuf,
}

/// A discovered script with its path relative to the source root.
#[derive(Debug, Clone)]
pub struct ScriptSource {
    pub relative_path: PathBuf,
    pub path: PathBuf,
}

impl ScriptBundleSpec {
    /// Find every matching file, ordered by relative path.
    ///
    /// The order never depends on how the filesystem enumerates entries.
    pub fn discover(&self) -> Result<Vec<ScriptSource>, BuildError> {
        let root = self.source_root.to_string_lossy();
        let pattern = format!(
            "{}/{}",
            glob::Pattern::escape(root.trim_end_matches('/')),
            self.source_glob
        );

        let paths = glob::glob(&pattern)
            .map_err(|e| BuildError::Bundle(format!("invalid pattern `{}`: {}", self.source_glob, e)))?;

        let mut sources = Vec::new();
        for path in paths {
            let path = path.map_err(|e| BuildError::Bundle(e.to_string()))?;
            if !path.is_file() {
                continue;
            }

            let relative_path = path
                .strip_prefix(&self.source_root)
                .unwrap_or(&path)
                .to_path_buf();
            sources.push(ScriptSource {
                relative_path,
                path,
            });
        }

        if sources.is_empty() {
            return Err(BuildError::Bundle(format!(
                "no scripts match `{}` in {}",
                self.source_glob,
                self.source_root.display()
            )));
        }

        sources.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(sources)
    }
}

/// Join file contents, each terminated by a newline.
pub fn concatenate<'a>(contents: impl IntoIterator<Item = &'a str>) -> String {
    let mut bundle = String::new();
    for (idx, content) in contents.into_iter().enumerate() {
        if idx > 0 {
            bundle.push_str(SEPARATOR);
        }
        bundle.push_str(content);
        if !content.ends_with('\n') {
            bundle.push('\n');
        }
    }
    bundle
}

/// Strip comments and whitespace without renaming or rewriting anything.
pub fn minify(source: &str) -> Result<String, BuildError> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::mjs()).parse();

    if let Some(error) = parsed.errors.first() {
        return Err(BuildError::Bundle(format!("failed to parse bundle: {error}")));
    }
    if parsed.panicked {
        return Err(BuildError::Bundle("failed to parse bundle".to_string()));
    }

    let output = Codegen::new()
        .with_options(CodegenOptions::minify())
        .build(&parsed.program);

    Ok(output.code)
}

/// Stage producing every script bundle of a package.
#[derive(Debug, Clone)]
pub struct ScriptStage {
    bundles: Vec<ScriptBundleSpec>,
}

impl ScriptStage {
    pub fn new(bundles: Vec<ScriptBundleSpec>) -> Self {
        Self { bundles }
    }
}

impl StageTask for ScriptStage {
    fn run(&self, _ctx: &BuildContext) -> Result<usize, BuildError> {
        let mut written = 0;

        for spec in &self.bundles {
            let sources = spec.discover()?;
            let contents = sources
                .iter()
                .map(|s| read_file(&s.path).map_err(|e| BuildError::Bundle(e.to_string())))
                .collect::<Result<Vec<_>, _>>()?;

            let bundle = concatenate(contents.iter().map(String::as_str));
            let minified = minify(&bundle)?;

            write_file(&spec.bundle_file, &bundle)?;
            write_file(&spec.minified_file, &minified)?;
            written += 2;

            tracing::info!(
                "Bundled {} scripts -> {}",
                sources.len(),
                spec.bundle_file.display()
            );
        }

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::bare_context;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn spec(root: &Path) -> ScriptBundleSpec {
        ScriptBundleSpec {
            source_root: root.join("src"),
            source_glob: "components/**/*.js".to_string(),
            bundle_file: root.join("dist/bundle.js"),
            minified_file: root.join("dist/bundle.min.js"),
        }
    }

    fn write_scripts(root: &Path, files: &[(&str, &str)]) {
        for (path, content) in files {
            let path = root.join("src/components").join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
    }

    #[test]
    fn orders_by_relative_path() {
        let temp = tempdir().unwrap();
        write_scripts(
            temp.path(),
            &[
                ("zeta/zeta.js", "var z = 1;"),
                ("alpha/alpha.js", "var a = 1;"),
                ("index.js", "var i = 1;"),
            ],
        );

        let sources = spec(temp.path()).discover().unwrap();
        let names: Vec<_> = sources
            .iter()
            .map(|s| s.relative_path.to_string_lossy().replace('\\', "/"))
            .collect();

        assert_eq!(
            names,
            vec![
                "components/alpha/alpha.js",
                "components/index.js",
                "components/zeta/zeta.js"
            ]
        );
    }

    #[test]
    fn bundle_is_independent_of_creation_order() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        let files = [
            ("b.js", "var b = 2;"),
            ("a.js", "var a = 1;"),
            ("c/c.js", "var c = 3;"),
        ];
        let mut reversed = files;
        reversed.reverse();

        write_scripts(first.path(), &files);
        write_scripts(second.path(), &reversed);

        ScriptStage::new(vec![spec(first.path())])
            .run(&bare_context().1)
            .unwrap();
        ScriptStage::new(vec![spec(second.path())])
            .run(&bare_context().1)
            .unwrap();

        let a = fs::read_to_string(first.path().join("dist/bundle.js")).unwrap();
        let b = fs::read_to_string(second.path().join("dist/bundle.js")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "var a = 1;\n\nvar b = 2;\n\nvar c = 3;\n");
    }

    #[test]
    fn minified_bundle_drops_comments() {
        let source = "// greeting\nfunction hello( name ) {\n  /* block */\n  return 'hi ' + name;\n}\n";

        let minified = minify(source).unwrap();

        assert!(!minified.contains("greeting"));
        assert!(!minified.contains("block"));
        assert!(minified.contains("hello"));
        assert!(minified.len() < source.len());
    }

    #[test]
    fn no_matches_is_bundle_error() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();

        let err = spec(temp.path()).discover().unwrap_err();

        assert!(matches!(err, BuildError::Bundle(_)));
    }

    #[test]
    fn unreadable_source_is_bundle_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("src/components/binary.js");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let err = ScriptStage::new(vec![spec(temp.path())])
            .run(&bare_context().1)
            .unwrap_err();

        assert!(matches!(err, BuildError::Bundle(message) if message.contains("binary.js")));
        assert!(!temp.path().join("dist/bundle.js").exists());
    }

    #[test]
    fn syntax_error_writes_nothing() {
        let temp = tempdir().unwrap();
        write_scripts(temp.path(), &[("broken.js", "function ( {")]);

        let err = ScriptStage::new(vec![spec(temp.path())])
            .run(&bare_context().1)
            .unwrap_err();

        assert!(matches!(err, BuildError::Bundle(_)));
        assert!(!temp.path().join("dist/bundle.js").exists());
    }
}
