use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Instant;

use bcast_core::Results;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepoState {
    Pending,
    InProgress,
    Success,
    Failed,
    Skipped,
}

impl RepoState {
    fn is_terminal(self) -> bool {
        matches!(self, RepoState::Success | RepoState::Failed | RepoState::Skipped)
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    successful: usize,
    failed: usize,
    skipped: usize,
    total: usize,
    errors: BTreeMap<String, String>,
    file_errors: usize,
}

/// Per-target status aggregation under concurrent updates. All mutation
/// paths take the write lock; snapshotting takes the read lock. Group
/// context is not tracked here: `Engine` attaches it directly to each
/// `Event` it emits instead.
pub struct ProgressTracker {
    started_at: Instant,
    state: RwLock<TrackerState>,
}

struct TrackerState {
    repos: BTreeMap<String, RepoState>,
    total_repos: usize,
    errors: BTreeMap<String, String>,
    global_error: Option<String>,
    file_errors: usize,
    dry_run: bool,
}

impl ProgressTracker {
    pub fn new(total_repos: usize, dry_run: bool) -> Self {
        Self {
            started_at: Instant::now(),
            state: RwLock::new(TrackerState {
                repos: BTreeMap::new(),
                total_repos,
                errors: BTreeMap::new(),
                global_error: None,
                file_errors: 0,
                dry_run,
            }),
        }
    }

    pub fn start_repository(&self, repo: &str) {
        let mut state = self.state.write().unwrap();
        state.repos.insert(repo.to_string(), RepoState::InProgress);
    }

    pub fn record_success(&self, repo: &str) {
        let mut state = self.state.write().unwrap();
        state.repos.insert(repo.to_string(), RepoState::Success);
    }

    pub fn record_error(&self, repo: &str, err: impl std::fmt::Display) {
        let mut state = self.state.write().unwrap();
        state.repos.insert(repo.to_string(), RepoState::Failed);
        state.errors.insert(repo.to_string(), err.to_string());
    }

    pub fn record_skipped(&self, repo: &str, reason: impl Into<String>) {
        let mut state = self.state.write().unwrap();
        state.repos.insert(repo.to_string(), RepoState::Skipped);
        state.errors.insert(repo.to_string(), reason.into());
    }

    /// Soft-failure counter for per-file errors the `BatchProcessor`
    /// collector would otherwise only log. See the open-question decision
    /// in DESIGN.md.
    pub fn record_file_error(&self) {
        self.state.write().unwrap().file_errors += 1;
    }

    /// Idempotent completion bump: only transitions `in_progress -> success`
    /// if the repo is not already in a terminal state.
    pub fn finish_repository(&self, repo: &str) {
        let mut state = self.state.write().unwrap();
        let current = state.repos.get(repo).copied().unwrap_or(RepoState::Pending);
        if !current.is_terminal() {
            state.repos.insert(repo.to_string(), RepoState::Success);
        }
    }

    pub fn set_error(&self, err: impl Into<String>) {
        self.state.write().unwrap().global_error = Some(err.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.state.read().unwrap().errors.is_empty()
    }

    pub fn get_last_error(&self) -> Option<String> {
        self.state.read().unwrap().global_error.clone()
    }

    fn snapshot(&self) -> Snapshot {
        let state = self.state.read().unwrap();
        let successful = state.repos.values().filter(|s| **s == RepoState::Success).count();
        let failed = state.repos.values().filter(|s| **s == RepoState::Failed).count();
        let skipped = state.repos.values().filter(|s| **s == RepoState::Skipped).count();
        Snapshot {
            successful,
            failed,
            skipped,
            total: state.total_repos,
            errors: state.errors.clone(),
            file_errors: state.file_errors,
        }
    }

    pub fn get_progress(&self) -> (usize, usize, usize, usize) {
        let s = self.snapshot();
        (s.successful, s.failed, s.skipped, s.total)
    }

    pub fn file_error_count(&self) -> usize {
        self.snapshot().file_errors
    }

    pub fn get_results(&self) -> Results {
        let s = self.snapshot();
        let dry_run = self.state.read().unwrap().dry_run;
        Results {
            successful: s.successful,
            failed: s.failed,
            skipped: s.skipped,
            errors: s.errors,
            duration_ms: self.started_at.elapsed().as_millis() as u64,
            dry_run,
        }
    }
}
