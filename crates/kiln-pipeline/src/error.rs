//! Error taxonomy shared by every stage.

use std::io;
use std::path::PathBuf;

/// Errors that can occur during a build.
///
/// Every variant is fatal to the build that produced it.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Bad package layout or pipeline setup, raised before any stage runs.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Stylesheet syntax error or unresolved import.
    #[error("Failed to compile {}: {message}", entry.display())]
    Compilation { entry: PathBuf, message: String },

    /// Script discovery or minification failure.
    #[error("Failed to bundle scripts: {0}")]
    Bundle(String),

    /// The upstream package's build exited unsuccessfully.
    #[error("Upstream build of `{package}` failed ({status})\n{output}")]
    UpstreamBuild {
        package: String,
        status: String,
        output: String,
    },

    /// A required copy source does not exist.
    #[error("Required asset not found: {}", .0.display())]
    MissingAsset(PathBuf),

    /// Unresolved include/macro or any other render-time template error.
    #[error("Failed to render {template}: {message}")]
    TemplateResolution { template: String, message: String },

    #[error("Failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Stage `{0}` panicked")]
    StagePanicked(String),
}

impl BuildError {
    /// Wrap an I/O error with the operation and path that produced it.
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    /// Short name of the error kind, used in failure reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Compilation { .. } => "CompilationError",
            Self::Bundle(_) => "BundleError",
            Self::UpstreamBuild { .. } => "UpstreamBuildError",
            Self::MissingAsset(_) => "MissingAssetError",
            Self::TemplateResolution { .. } => "TemplateResolutionError",
            Self::Io { .. } => "IoError",
            Self::StagePanicked(_) => "StagePanicked",
        }
    }
}
