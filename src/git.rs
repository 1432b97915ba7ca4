//! Access to the `git` executable.
//!
//! Everything the hook learns about the repository comes from running git
//! subcommands and reading their stdout. The [`GitRunner`] trait is the seam
//! between the parsers and the subprocess, so the parsers can be driven by
//! canned output in tests.

use std::future::Future;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

use crate::error::{NotifyError, Result};

/// Runs a git subcommand and returns its standard output.
pub trait GitRunner {
    fn run(&self, args: &[&str]) -> impl Future<Output = Result<String>> + Send;
}

/// Runs the real `git` binary, optionally inside a given directory.
#[derive(Debug, Clone, Default)]
pub struct SystemGit {
    repo_path: Option<PathBuf>,
}

impl SystemGit {
    /// Runs git in the process working directory (where git places hooks).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: Some(repo_path.into()),
        }
    }
}

impl GitRunner for SystemGit {
    async fn run(&self, args: &[&str]) -> Result<String> {
        let command_line = format!("git {}", args.join(" "));
        debug!("Running: {}", command_line);

        let mut command = Command::new("git");
        if let Some(path) = &self.repo_path {
            command.current_dir(path);
        }
        let output = command
            .args(args)
            .output()
            .await
            .map_err(|e| NotifyError::GitCommandFailed {
                command: command_line.clone(),
                message: format!("failed to start: {}", e),
            })?;

        if !output.status.success() {
            return Err(NotifyError::GitCommandFailed {
                command: command_line,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
