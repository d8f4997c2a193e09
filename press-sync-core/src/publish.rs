//! [`VersionControl`] backed by the `git` command line.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::contract::VersionControl;
use crate::error::VcsError;

/// Runs `git` inside `repo_dir`, pushing `branch` to `remote`.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_dir: PathBuf,
    remote: String,
    branch: String,
}

impl GitCli {
    pub fn new(
        repo_dir: impl Into<PathBuf>,
        remote: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            remote: remote.into(),
            branch: branch.into(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn git(&self, args: &[&str]) -> Result<std::process::Output, VcsError> {
        let command = format!("git {}", args.join(" "));
        debug!(command = %command, repo = %self.repo_dir.display(), "Running git");
        Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await
            .map_err(|e| VcsError::Launch {
                command,
                reason: e.to_string(),
            })
    }

    async fn git_checked(&self, args: &[&str]) -> Result<String, VcsError> {
        let output = self.git(args).await?;
        if !output.status.success() {
            return Err(failed(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn failed(args: &[&str], output: &std::process::Output) -> VcsError {
    VcsError::CommandFailed {
        command: format!("git {}", args.join(" ")),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

#[async_trait]
impl VersionControl for GitCli {
    /// `git add --all` on `paths`, resolved against the repository.
    ///
    /// A path that does not exist or lies outside the repository is an error.
    async fn stage(&self, paths: Vec<PathBuf>) -> Result<(), VcsError> {
        let repo = self.repo_dir.canonicalize().map_err(|e| VcsError::InvalidPath {
            path: self.repo_dir.clone(),
            reason: format!("repository directory unavailable: {e}"),
        })?;
        let mut resolved = Vec::with_capacity(paths.len());
        for path in paths {
            let full = self
                .repo_dir
                .join(&path)
                .canonicalize()
                .map_err(|e| VcsError::InvalidPath {
                    path: path.clone(),
                    reason: format!("not found: {e}"),
                })?;
            if !full.starts_with(&repo) {
                return Err(VcsError::InvalidPath {
                    path,
                    reason: format!("outside repository {}", repo.display()),
                });
            }
            resolved.push(full.to_string_lossy().into_owned());
        }
        if resolved.is_empty() {
            debug!("No paths to stage");
            return Ok(());
        }
        let mut args = vec!["add", "--all", "--"];
        args.extend(resolved.iter().map(String::as_str));
        self.git_checked(&args).await?;
        info!(paths = ?resolved, "Staged changes");
        Ok(())
    }

    /// Commit the index. `Ok(false)` when nothing is staged.
    async fn commit(&self, message: &str) -> Result<bool, VcsError> {
        let args = ["diff", "--cached", "--quiet"];
        let output = self.git(&args).await?;
        match output.status.code() {
            Some(0) => {
                info!("Nothing staged, skipping commit");
                return Ok(false);
            }
            Some(1) => {}
            _ => return Err(failed(&args, &output)),
        }
        self.git_checked(&["commit", "-m", message]).await?;
        info!(commit_message = message, "Committed");
        Ok(true)
    }

    async fn push(&self) -> Result<(), VcsError> {
        self.git_checked(&["push", self.remote.as_str(), self.branch.as_str()])
            .await?;
        info!(remote = %self.remote, branch = %self.branch, "Pushed");
        Ok(())
    }
}
