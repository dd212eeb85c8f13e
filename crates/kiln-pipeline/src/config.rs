//! Workspace configuration model (`kiln.toml`).
//!
//! These types describe the file as written. Paths in here are unresolved; the
//! [`crate::layout`] module turns them into absolute locations.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::layout::PathRef;

/// Name of the configuration file at the workspace root.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Top-level configuration file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub build: BuildSettings,
    #[serde(default)]
    pub packages: Vec<PackageConfig>,
}

impl WorkspaceConfig {
    /// Look up a package declaration by name.
    pub fn package(&self, name: &str) -> Option<&PackageConfig> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Pick the package built when none is named explicitly.
    ///
    /// This is the only `site` package, or failing that the only owned package.
    pub fn default_target(&self) -> Option<&str> {
        let sites: Vec<_> = self
            .packages
            .iter()
            .filter(|p| p.kind == PackageKind::Site)
            .collect();
        if sites.len() == 1 {
            return Some(&sites[0].name);
        }

        let owned: Vec<_> = self.packages.iter().filter(|p| p.kind.is_owned()).collect();
        if sites.is_empty() && owned.len() == 1 {
            return Some(&owned[0].name);
        }

        None
    }
}

/// Site-wide rendering settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_title")]
    pub title: String,

    /// Extra keys merged into every page's base context
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            context: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildSettings {
    /// Maximum number of stages running at once
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self { jobs: default_jobs() }
    }
}

/// Role of a package in the workspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    /// Component library with its own build
    #[default]
    Library,
    /// Review site rendered from templates
    Site,
    /// Prebuilt design-system distribution, read only
    Vendor,
}

impl PackageKind {
    /// Whether the orchestrator may delete and recreate this package's output.
    pub fn is_owned(self) -> bool {
        !matches!(self, Self::Vendor)
    }
}

/// One workspace package.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageConfig {
    pub name: String,

    /// Package directory, relative to the workspace root
    pub path: PathBuf,

    #[serde(default)]
    pub kind: PackageKind,

    /// Source root, relative to the package directory
    #[serde(default = "default_source")]
    pub source: PathBuf,

    /// Output root, relative to the package directory
    #[serde(default = "default_output")]
    pub output: PathBuf,

    #[serde(default)]
    pub styles: Vec<StyleConfig>,

    #[serde(default)]
    pub scripts: Vec<ScriptConfig>,

    #[serde(default)]
    pub upstream: Vec<UpstreamConfig>,

    #[serde(default)]
    pub copy: Vec<CopyConfig>,

    #[serde(default)]
    pub templates: Option<TemplateConfig>,
}

impl PackageConfig {
    /// A package declaration with default roots and no stages.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, kind: PackageKind) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind,
            source: default_source(),
            output: default_output(),
            styles: Vec::new(),
            scripts: Vec::new(),
            upstream: Vec::new(),
            copy: Vec::new(),
            templates: None,
        }
    }
}

/// A stylesheet compilation unit.
#[derive(Debug, Clone, Deserialize)]
pub struct StyleConfig {
    /// Entry stylesheet, relative to the package source root by default
    pub entry: PathRef,

    /// Output file, relative to the package output root
    pub output: PathBuf,

    /// Extra directories consulted for `@import`, in order
    #[serde(default)]
    pub search_paths: Vec<PathRef>,

    #[serde(default)]
    pub minify: bool,
}

/// A script bundle.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptConfig {
    /// Glob relative to the package source root
    pub sources: String,

    /// Concatenated bundle, relative to the package output root
    pub bundle: PathBuf,

    /// Minified bundle, relative to the package output root
    pub minified: PathBuf,
}

/// A package whose own build must finish first.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub package: String,

    /// Program and arguments; defaults to re-invoking this tool for the package
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

/// A file or directory copied into the output tree.
#[derive(Debug, Clone, Deserialize)]
pub struct CopyConfig {
    /// Source, relative to the package source root by default
    pub from: PathRef,

    /// Destination, relative to the package output root by default
    pub to: PathRef,

    #[serde(default = "default_true")]
    pub required: bool,
}

/// Template tree settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateConfig {
    /// Template root, relative to the package source root
    #[serde(default = "default_template_root")]
    pub root: PathBuf,

    #[serde(default = "default_extension")]
    pub extension: String,

    /// Subtrees that are includable but never rendered on their own
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Subtree rendered flat into `examples/<name>.html`
    #[serde(default = "default_examples")]
    pub examples: Option<String>,

    /// Additional search roots, after the template root, in priority order
    #[serde(default)]
    pub search_roots: Vec<PathRef>,

    /// Per-page context overrides keyed by logical page name
    #[serde(default)]
    pub pages: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            root: default_template_root(),
            extension: default_extension(),
            exclude: Vec::new(),
            examples: default_examples(),
            search_roots: Vec::new(),
            pages: BTreeMap::new(),
        }
    }
}

fn default_title() -> String {
    "Documentation".to_string()
}
fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
fn default_source() -> PathBuf {
    PathBuf::from("src")
}
fn default_output() -> PathBuf {
    PathBuf::from("dist")
}
fn default_true() -> bool {
    true
}
fn default_template_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_extension() -> String {
    "njk".to_string()
}
fn default_examples() -> Option<String> {
    Some("examples".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(name: &str, kind: PackageKind) -> PackageConfig {
        PackageConfig::new(name, format!("packages/{name}"), kind)
    }

    #[test]
    fn defaults_to_single_site_package() {
        let config = WorkspaceConfig {
            packages: vec![
                package("lib", PackageKind::Library),
                package("review", PackageKind::Site),
                package("vendor", PackageKind::Vendor),
            ],
            ..Default::default()
        };

        assert_eq!(config.default_target(), Some("review"));
    }

    #[test]
    fn falls_back_to_single_owned_package() {
        let config = WorkspaceConfig {
            packages: vec![
                package("lib", PackageKind::Library),
                package("vendor", PackageKind::Vendor),
            ],
            ..Default::default()
        };

        assert_eq!(config.default_target(), Some("lib"));
    }

    #[test]
    fn ambiguous_target_is_none() {
        let config = WorkspaceConfig {
            packages: vec![
                package("a", PackageKind::Site),
                package("b", PackageKind::Site),
            ],
            ..Default::default()
        };

        assert_eq!(config.default_target(), None);
    }

    #[test]
    fn vendor_packages_are_not_owned() {
        assert!(PackageKind::Library.is_owned());
        assert!(PackageKind::Site.is_owned());
        assert!(!PackageKind::Vendor.is_owned());
    }
}
