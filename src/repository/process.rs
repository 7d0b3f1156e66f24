//! External process execution
//!
//! Version-control tools are driven as subprocesses; their standard output
//! is the result and a non-zero exit code is an error.

use crate::error::ExternalProcessError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Runs one executable with arguments
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run with `args` inside `working_directory` and return standard output
    async fn run(&self, args: &[String], working_directory: &Path) -> Result<String, ExternalProcessError>;
}

/// A process launched from an executable path
#[derive(Debug, Clone)]
pub struct ExternalProcess {
    executable: PathBuf,
}

impl ExternalProcess {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

#[async_trait]
impl ProcessRunner for ExternalProcess {
    async fn run(&self, args: &[String], working_directory: &Path) -> Result<String, ExternalProcessError> {
        debug!(
            "Running {} {} in {}",
            self.executable.display(),
            args.join(" "),
            working_directory.display()
        );

        let output = Command::new(&self.executable)
            .args(args)
            .current_dir(working_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ExternalProcessError::Spawn {
                executable: self.executable.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(ExternalProcessError::Failed {
                executable: self.executable.clone(),
                exit_code: output.status.code().unwrap_or(-1),
                stdout,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(stdout)
    }
}
