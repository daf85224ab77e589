use std::path::Path;

use crate::command::GitCli;
use crate::error::GitError;

/// The git adapter consumed by `RepositorySync`. One implementor
/// (`GitCliClient`) shells out to the `git` binary; tests substitute a fake.
pub trait GitClient: Send + Sync {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), GitError>;
    fn checkout(&self, repo: &Path, reference: &str) -> Result<(), GitError>;
    /// May return `GitError::BranchAlreadyExists` if the branch already
    /// exists locally; `RepositorySync` falls through to `checkout` on that
    /// branch as a recovery step.
    fn create_branch(&self, repo: &Path, name: &str) -> Result<(), GitError>;
    fn add(&self, repo: &Path, paths: &[String]) -> Result<(), GitError>;
    fn commit(&self, repo: &Path, message: &str) -> Result<(), GitError>;
    /// May return `GitError::BranchAlreadyExists` if the remote rejects a
    /// non-force push because the branch tip moved; `RepositorySync` retries
    /// once with `force = true`.
    fn push(&self, repo: &Path, remote: &str, branch: &str, force: bool) -> Result<(), GitError>;
    fn current_commit_sha(&self, repo: &Path) -> Result<String, GitError>;
    fn changed_files(&self, repo: &Path) -> Result<Vec<String>, GitError>;
}

#[derive(Debug, Clone, Default)]
pub struct GitCliClient {
    cli: GitCli,
}

impl GitCliClient {
    pub fn new(cli: GitCli) -> Self {
        Self { cli }
    }
}

fn push_rejected(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("[rejected]")
        || lower.contains("non-fast-forward")
        || lower.contains("already exists")
        || lower.contains("stale info")
}

fn branch_exists_locally(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("already exists")
}

impl GitClient for GitCliClient {
    fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), GitError> {
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|source| GitError::Io {
            command: format!("mkdir -p {}", parent.display()),
            source,
        })?;
        self.cli
            .run(parent, ["clone", url, &dest.display().to_string()])?;
        Ok(())
    }

    fn checkout(&self, repo: &Path, reference: &str) -> Result<(), GitError> {
        self.cli.run(repo, ["checkout", reference])?;
        Ok(())
    }

    fn create_branch(&self, repo: &Path, name: &str) -> Result<(), GitError> {
        match self.cli.run(repo, ["checkout", "-b", name]) {
            Ok(_) => Ok(()),
            Err(GitError::CommandFailed { stderr, .. }) if branch_exists_locally(&stderr) => {
                Err(GitError::BranchAlreadyExists {
                    branch: name.to_string(),
                })
            }
            Err(other) => Err(other),
        }
    }

    fn add(&self, repo: &Path, paths: &[String]) -> Result<(), GitError> {
        let mut args = vec!["add".to_string(), "--".to_string()];
        args.extend(paths.iter().cloned());
        self.cli.run(repo, args)?;
        Ok(())
    }

    fn commit(&self, repo: &Path, message: &str) -> Result<(), GitError> {
        self.cli.run(repo, ["commit", "-m", message])?;
        Ok(())
    }

    fn push(&self, repo: &Path, remote: &str, branch: &str, force: bool) -> Result<(), GitError> {
        let mut args = vec!["push".to_string()];
        if force {
            args.push("--force".to_string());
        }
        args.push(remote.to_string());
        args.push(branch.to_string());
        match self.cli.run(repo, args) {
            Ok(_) => Ok(()),
            Err(GitError::CommandFailed { stderr, .. }) if !force && push_rejected(&stderr) => {
                Err(GitError::BranchAlreadyExists {
                    branch: branch.to_string(),
                })
            }
            Err(other) => Err(other),
        }
    }

    fn current_commit_sha(&self, repo: &Path) -> Result<String, GitError> {
        let out = self.cli.run(repo, ["rev-parse", "HEAD"])?;
        Ok(out.stdout.trim().to_string())
    }

    fn changed_files(&self, repo: &Path) -> Result<Vec<String>, GitError> {
        let out = self.cli.run(repo, ["status", "--porcelain"])?;
        Ok(out
            .stdout
            .lines()
            .filter_map(|line| line.get(3..))
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .collect())
    }
}
