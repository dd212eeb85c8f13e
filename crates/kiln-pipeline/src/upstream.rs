//! Upstream package build trigger.
//!
//! Runs another package's own build as a subprocess in that package's directory
//! and blocks until it exits.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::orchestrator::StageTask;

/// Subprocess building one upstream package.
#[derive(Debug, Clone)]
pub struct UpstreamTrigger {
    package: String,
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl UpstreamTrigger {
    /// Create a trigger from a program-and-arguments list.
    pub fn new(
        package: impl Into<String>,
        command: &[String],
        working_dir: impl Into<PathBuf>,
    ) -> Result<Self, BuildError> {
        let package = package.into();
        let Some((program, args)) = command.split_first() else {
            return Err(BuildError::Configuration(format!(
                "upstream build of `{package}` has an empty command"
            )));
        };

        Ok(Self {
            package,
            program: program.clone(),
            args: args.to_vec(),
            working_dir: working_dir.into(),
        })
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Run the build and return its captured stdout.
    ///
    /// A spawn failure or nonzero exit becomes [`BuildError::UpstreamBuild`]
    /// carrying everything the process printed.
    pub fn execute(&self) -> Result<String, BuildError> {
        info!(
            package = %self.package,
            cmd = %self.command_line(),
            "Building upstream package"
        );
        debug!(working_dir = ?self.working_dir, "spawning process");

        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| BuildError::UpstreamBuild {
                package: self.package.clone(),
                status: format!("failed to start `{}`: {}", self.program, e),
                output: String::new(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let combined = [stdout.trim_end(), stderr.trim_end()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");

            return Err(BuildError::UpstreamBuild {
                package: self.package.clone(),
                status: output.status.to_string(),
                output: combined,
            });
        }

        for line in stdout.lines().chain(stderr.lines()) {
            debug!(package = %self.package, "{}", line);
        }

        Ok(stdout)
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl StageTask for UpstreamTrigger {
    fn run(&self, _ctx: &BuildContext) -> Result<usize, BuildError> {
        self.execute()?;
        Ok(0)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn captures_stdout_on_success() {
        let temp = tempdir().unwrap();
        let trigger = UpstreamTrigger::new("lib", &sh("echo built"), temp.path()).unwrap();

        let stdout = trigger.execute().unwrap();

        assert_eq!(stdout.trim(), "built");
    }

    #[test]
    fn runs_in_package_directory() {
        let temp = tempdir().unwrap();
        let trigger = UpstreamTrigger::new("lib", &sh("touch marker"), temp.path()).unwrap();

        trigger.execute().unwrap();

        assert!(temp.path().join("marker").exists());
    }

    #[test]
    fn nonzero_exit_carries_output() {
        let temp = tempdir().unwrap();
        let trigger = UpstreamTrigger::new(
            "lib",
            &sh("echo compiling; echo 'syntax error' >&2; exit 3"),
            temp.path(),
        )
        .unwrap();

        let err = trigger.execute().unwrap_err();

        match err {
            BuildError::UpstreamBuild {
                package, output, ..
            } => {
                assert_eq!(package, "lib");
                assert!(output.contains("compiling"));
                assert!(output.contains("syntax error"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_program_is_upstream_error() {
        let temp = tempdir().unwrap();
        let command = vec!["kiln-definitely-not-installed".to_string()];
        let trigger = UpstreamTrigger::new("lib", &command, temp.path()).unwrap();

        assert!(matches!(
            trigger.execute(),
            Err(BuildError::UpstreamBuild { .. })
        ));
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = UpstreamTrigger::new("lib", &[], "/tmp").unwrap_err();
        assert!(matches!(err, BuildError::Configuration(_)));
    }
}
