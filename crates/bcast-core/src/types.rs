use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DirectoryMapping;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    pub repo: String,
    pub branch: String,
    pub latest_commit: String,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetStatus {
    UpToDate,
    Behind,
    PendingPr,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
    pub repo: String,
    pub last_sync_commit: Option<String>,
    pub status: TargetStatus,
}

/// One intention to sync a source path to a destination path under a transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileJob {
    pub source_path: String,
    pub dest_path: String,
    pub transform: crate::config::Transform,
    pub is_from_directory: bool,
    pub directory_mapping: Option<DirectoryMapping>,
    pub relative_path: Option<String>,
    pub file_index: usize,
    pub total_files: usize,
}

/// The effective diff entry produced once a `FileJob` clears the idempotence gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub content: Vec<u8>,
    /// The *target* repo's current bytes at `path`, never the source bytes.
    /// `None` when the file is new.
    pub original_content: Option<Vec<u8>>,
    pub is_new: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProcessResult {
    pub change: Option<FileChange>,
    pub error: Option<String>,
    pub job: FileJob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupStatus {
    pub state: GroupState,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl GroupStatus {
    pub fn pending() -> Self {
        Self {
            state: GroupState::Pending,
            started_at: None,
            ended_at: None,
            error: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Results {
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: BTreeMap<String, String>,
    pub duration_ms: u64,
    pub dry_run: bool,
}

/// Classify a pattern-string trigger as a CI or manual invocation, per the
/// well-known CI environment variables.
pub fn classify_trigger() -> &'static str {
    const CI_VARS: &[&str] = &[
        "CI",
        "GITHUB_ACTIONS",
        "GITLAB_CI",
        "CIRCLECI",
        "TRAVIS",
        "JENKINS_URL",
        "BUILDKITE",
    ];
    if CI_VARS.iter().any(|var| std::env::var_os(var).is_some()) {
        "ci"
    } else {
        "manual"
    }
}

/// Ephemeral clone directory ownership: held for the lifetime of one
/// `RepositorySync`, removed on every exit path.
#[derive(Debug)]
pub struct EphemeralClone {
    pub path: PathBuf,
    pub cleanup: bool,
}

impl Drop for EphemeralClone {
    fn drop(&mut self) {
        if self.cleanup && self.path.exists() {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}
