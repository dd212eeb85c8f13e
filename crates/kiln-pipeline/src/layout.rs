//! Path resolution for workspace packages.
//!
//! Every location is derived from the workspace root, never from the process's
//! current directory, so a build behaves the same wherever it is invoked from.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::config::{PackageConfig, PackageKind};
use crate::error::BuildError;

/// Resolved directories of one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLayout {
    /// Logical package name
    pub name: String,

    /// Package directory
    pub root: PathBuf,

    /// Source root, never deleted by a build
    pub source_root: PathBuf,

    /// Output root, emptied at the start of a build if the package is owned
    pub output_root: PathBuf,

    pub kind: PackageKind,
}

impl PackageLayout {
    pub fn is_owned(&self) -> bool {
        self.kind.is_owned()
    }
}

/// Which root of a package a path is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Source,
    Output,
}

/// A path reference from the configuration file.
///
/// Written as `pkg:src/rel`, `pkg:out/rel`, `root:rel` or a plain `rel`, which
/// is relative to whichever root the referring setting defaults to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum PathRef {
    Local(PathBuf),
    Workspace(PathBuf),
    Package {
        package: String,
        root: Root,
        path: PathBuf,
    },
}

impl PathRef {
    /// Reference to a path inside another package.
    pub fn package(package: impl Into<String>, root: Root, path: impl Into<PathBuf>) -> Self {
        Self::Package {
            package: package.into(),
            root,
            path: path.into(),
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local(path.into())
    }
}

impl FromStr for PathRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((prefix, rest)) = s.split_once(':') else {
            let path = PathBuf::from(s);
            check_relative(&path).map_err(|e| format!("invalid path `{s}`: {e}"))?;
            return Ok(Self::Local(path));
        };

        if prefix.is_empty() {
            return Err(format!("invalid path `{s}`: empty package name"));
        }

        if prefix == "root" {
            let path = PathBuf::from(rest);
            check_relative(&path).map_err(|e| format!("invalid path `{s}`: {e}"))?;
            return Ok(Self::Workspace(path));
        }

        let (root, path) = rest.split_once('/').unwrap_or((rest, ""));
        let root = match root {
            "src" => Root::Source,
            "out" => Root::Output,
            other => {
                return Err(format!(
                    "invalid path `{s}`: expected `src` or `out` after `{prefix}:`, found `{other}`"
                ))
            }
        };

        let path = PathBuf::from(path);
        check_relative(&path).map_err(|e| format!("invalid path `{s}`: {e}"))?;

        Ok(Self::Package {
            package: prefix.to_string(),
            root,
            path,
        })
    }
}

impl TryFrom<String> for PathRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for PathRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Workspace(path) => write!(f, "root:{}", path.display()),
            Self::Package {
                package,
                root,
                path,
            } => {
                let root = match root {
                    Root::Source => "src",
                    Root::Output => "out",
                };
                write!(f, "{}:{}/{}", package, root, path.display())
            }
        }
    }
}

/// All package layouts of one workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    packages: BTreeMap<String, PackageLayout>,
}

impl Workspace {
    /// Resolve the layout of every declared package.
    ///
    /// `root` must be absolute. Fails if a package directory is missing, a
    /// name is declared twice, or a package's output root could swallow its
    /// sources.
    pub fn resolve(root: &Path, packages: &[PackageConfig]) -> Result<Self, BuildError> {
        if !root.is_absolute() {
            return Err(BuildError::Configuration(format!(
                "workspace root must be absolute: {}",
                root.display()
            )));
        }

        let mut layouts = BTreeMap::new();

        for package in packages {
            let layout = resolve_package(root, package)?;
            if layouts.insert(package.name.clone(), layout).is_some() {
                return Err(BuildError::Configuration(format!(
                    "package `{}` is declared more than once",
                    package.name
                )));
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            packages: layouts,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up a package by name.
    pub fn package(&self, name: &str) -> Result<&PackageLayout, BuildError> {
        self.packages
            .get(name)
            .ok_or_else(|| BuildError::Configuration(format!("unknown package `{name}`")))
    }

    pub fn packages(&self) -> impl Iterator<Item = &PackageLayout> {
        self.packages.values()
    }

    /// Turn a path reference into an absolute path.
    ///
    /// Local references are joined onto `owner`'s `base` root.
    pub fn resolve_ref(
        &self,
        path_ref: &PathRef,
        owner: &str,
        base: Root,
    ) -> Result<PathBuf, BuildError> {
        match path_ref {
            PathRef::Local(path) => Ok(root_of(self.package(owner)?, base).join(path)),
            PathRef::Workspace(path) => Ok(self.root.join(path)),
            PathRef::Package {
                package,
                root,
                path,
            } => Ok(root_of(self.package(package)?, *root).join(path)),
        }
    }
}

fn root_of(layout: &PackageLayout, root: Root) -> &Path {
    match root {
        Root::Source => &layout.source_root,
        Root::Output => &layout.output_root,
    }
}

fn resolve_package(root: &Path, package: &PackageConfig) -> Result<PackageLayout, BuildError> {
    for (what, path) in [
        ("path", &package.path),
        ("source", &package.source),
        ("output", &package.output),
    ] {
        check_relative(path).map_err(|e| {
            BuildError::Configuration(format!("package `{}` {what}: {e}", package.name))
        })?;
    }

    let package_root = root.join(&package.path);
    if !package_root.is_dir() {
        return Err(BuildError::Configuration(format!(
            "package `{}` directory not found: {}",
            package.name,
            package_root.display()
        )));
    }

    let source_root = package_root.join(&package.source);
    let output_root = package_root.join(&package.output);

    if source_root.starts_with(&output_root) {
        return Err(BuildError::Configuration(format!(
            "package `{}` output root {} would contain its sources",
            package.name,
            output_root.display()
        )));
    }

    Ok(PackageLayout {
        name: package.name.clone(),
        root: package_root,
        source_root,
        output_root,
        kind: package.kind,
    })
}

/// Reject absolute paths and `..` components.
pub(crate) fn check_relative(path: &Path) -> Result<(), String> {
    for component in path.components() {
        match component {
            Component::ParentDir => return Err("`..` is not allowed".to_string()),
            Component::RootDir | Component::Prefix(_) => {
                return Err("absolute paths are not allowed".to_string())
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}
