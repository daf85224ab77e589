use std::process::Command;

use serde::Deserialize;

use crate::error::HubError;
use crate::types::{Branch, FileContent, Pr, PrRequest, PrState, User};

/// The GitHub client consumed by `RepositorySync`. `GhCliHubClient` shells
/// out to the `gh` CLI; tests substitute a fake implementation.
pub trait HubClient: Send + Sync {
    fn get_file(&self, repo: &str, path: &str, reference: &str) -> Result<FileContent, HubError>;
    fn list_branches(&self, repo: &str) -> Result<Vec<Branch>, HubError>;
    fn get_branch(&self, repo: &str, name: &str) -> Result<Branch, HubError>;
    fn create_pr(&self, repo: &str, request: &PrRequest) -> Result<Pr, HubError>;
    fn update_pr(&self, repo: &str, number: u64, title: &str, body: &str) -> Result<(), HubError>;
    fn get_pr(&self, repo: &str, number: u64) -> Result<Pr, HubError>;
    fn list_prs(&self, repo: &str, head: &str) -> Result<Vec<Pr>, HubError>;
    fn current_user(&self) -> Result<User, HubError>;
}

#[derive(Debug, Clone, Default)]
pub struct GhCliHubClient {
    binary: String,
}

impl GhCliHubClient {
    pub fn new() -> Self {
        Self {
            binary: "gh".to_string(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<Vec<u8>, HubError> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|source| HubError::Io {
                command: format!("{} {}", self.binary, args.join(" ")),
                source,
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(HubError::CommandFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                stderr,
            });
        }
        Ok(output.stdout)
    }

    fn run_text(&self, args: &[&str]) -> Result<String, HubError> {
        Ok(String::from_utf8_lossy(&self.run(args)?).into_owned())
    }

    fn run_json<T: for<'de> Deserialize<'de>>(&self, args: &[&str]) -> Result<T, HubError> {
        let bytes = self.run(args)?;
        serde_json::from_slice(&bytes).map_err(|source| HubError::Parse {
            command: format!("{} {}", self.binary, args.join(" ")),
            source,
        })
    }
}

#[derive(Debug, Deserialize)]
struct GhBranch {
    name: String,
    commit: GhCommitRef,
}

#[derive(Debug, Deserialize)]
struct GhCommitRef {
    sha: String,
}

impl From<GhBranch> for Branch {
    fn from(b: GhBranch) -> Self {
        Branch {
            name: b.name,
            commit_sha: b.commit.sha,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhPr {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(rename = "headRefName")]
    head_ref_name: String,
    #[serde(rename = "baseRefName")]
    base_ref_name: String,
    url: String,
    state: String,
}

impl From<GhPr> for Pr {
    fn from(p: GhPr) -> Self {
        Pr {
            number: p.number,
            title: p.title,
            body: p.body.unwrap_or_default(),
            head: p.head_ref_name,
            base: p.base_ref_name,
            url: p.url,
            state: match p.state.to_uppercase().as_str() {
                "OPEN" => PrState::Open,
                "MERGED" => PrState::Merged,
                _ => PrState::Closed,
            },
        }
    }
}

const PR_FIELDS: &str = "number,title,body,headRefName,baseRefName,url,state";

impl HubClient for GhCliHubClient {
    fn get_file(&self, repo: &str, path: &str, reference: &str) -> Result<FileContent, HubError> {
        let endpoint = format!("repos/{repo}/contents/{path}?ref={reference}");
        match self.run(&[
            "api",
            "-H",
            "Accept: application/vnd.github.raw",
            &endpoint,
        ]) {
            Ok(content) => Ok(FileContent { content }),
            Err(HubError::CommandFailed { stderr, .. }) if stderr.contains("404") => {
                Err(HubError::FileNotFound {
                    repo: repo.to_string(),
                    path: path.to_string(),
                    reference: reference.to_string(),
                })
            }
            Err(other) => Err(other),
        }
    }

    fn list_branches(&self, repo: &str) -> Result<Vec<Branch>, HubError> {
        let endpoint = format!("repos/{repo}/branches");
        let branches: Vec<GhBranch> = self.run_json(&["api", "--paginate", &endpoint])?;
        Ok(branches.into_iter().map(Branch::from).collect())
    }

    fn get_branch(&self, repo: &str, name: &str) -> Result<Branch, HubError> {
        let endpoint = format!("repos/{repo}/branches/{name}");
        let branch: GhBranch = self.run_json(&["api", &endpoint])?;
        Ok(branch.into())
    }

    fn create_pr(&self, repo: &str, request: &PrRequest) -> Result<Pr, HubError> {
        let mut args = vec![
            "pr", "create", "--repo", repo, "--title", &request.title, "--body", &request.body,
            "--head", &request.head, "--base", &request.base,
        ];
        let labels = request.labels.join(",");
        if !request.labels.is_empty() {
            args.push("--label");
            args.push(&labels);
        }
        let stdout = self.run_text(&args)?;
        let url = stdout.trim();
        let number = url
            .rsplit('/')
            .next()
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| HubError::InvalidResponse {
                command: "gh pr create".to_string(),
                message: format!("could not parse PR number from URL '{url}'"),
            })?;
        self.get_pr(repo, number)
    }

    fn update_pr(&self, repo: &str, number: u64, title: &str, body: &str) -> Result<(), HubError> {
        let number_str = number.to_string();
        self.run(&[
            "pr", "edit", &number_str, "--repo", repo, "--title", title, "--body", body,
        ])?;
        Ok(())
    }

    fn get_pr(&self, repo: &str, number: u64) -> Result<Pr, HubError> {
        let number_str = number.to_string();
        let pr: GhPr = self.run_json(&[
            "pr", "view", &number_str, "--repo", repo, "--json", PR_FIELDS,
        ])?;
        Ok(pr.into())
    }

    fn list_prs(&self, repo: &str, head: &str) -> Result<Vec<Pr>, HubError> {
        let prs: Vec<GhPr> = self.run_json(&[
            "pr", "list", "--repo", repo, "--head", head, "--json", PR_FIELDS,
        ])?;
        Ok(prs.into_iter().map(Pr::from).collect())
    }

    fn current_user(&self) -> Result<User, HubError> {
        let login = self.run_text(&["api", "user", "--jq", ".login"])?;
        Ok(User {
            login: login.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gh_pr_deserializes_open_state() {
        let json = r#"{
            "number": 7,
            "title": "Sync templates",
            "body": "body text",
            "headRefName": "sync/branch",
            "baseRefName": "main",
            "url": "https://github.com/org/repo/pull/7",
            "state": "OPEN"
        }"#;
        let gh_pr: GhPr = serde_json::from_str(json).unwrap();
        let pr: Pr = gh_pr.into();
        assert_eq!(pr.number, 7);
        assert_eq!(pr.state, PrState::Open);
        assert_eq!(pr.head, "sync/branch");
    }

    #[test]
    fn gh_pr_missing_body_defaults_to_empty() {
        let json = r#"{
            "number": 1,
            "title": "t",
            "headRefName": "h",
            "baseRefName": "main",
            "url": "u",
            "state": "CLOSED"
        }"#;
        let gh_pr: GhPr = serde_json::from_str(json).unwrap();
        let pr: Pr = gh_pr.into();
        assert_eq!(pr.body, "");
        assert_eq!(pr.state, PrState::Closed);
    }

    #[test]
    fn gh_branch_converts_commit_sha() {
        let json = r#"{"name": "main", "commit": {"sha": "abc123"}}"#;
        let gh_branch: GhBranch = serde_json::from_str(json).unwrap();
        let branch: Branch = gh_branch.into();
        assert_eq!(branch.name, "main");
        assert_eq!(branch.commit_sha, "abc123");
    }

    #[test]
    fn run_missing_gh_binary_is_io_error() {
        let client = GhCliHubClient {
            binary: "definitely-not-a-real-gh-binary".to_string(),
        };
        let result = client.current_user();
        assert!(matches!(result, Err(HubError::Io { .. })));
    }
}
