use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bcast_core::config::{DirectoryMapping, FileMapping, Group, TargetConfig};
use bcast_core::types::EphemeralClone;
use bcast_core::{FileChange, FileJob, SourceState, SyncError};
use bcast_exclusion::ExclusionEngine;
use bcast_hub::{HubClient, HubError, Pr, PrRequest};
use bcast_vcs::{GitClient, GitError};
use chrono::Utc;

use crate::batch_processor::{BatchContext, BatchProcessor};
use crate::directory_processor::{expand_directory_mapping, DirectoryMetrics};
use crate::options::Options;

static CLONE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Whether a target's PR was freshly opened or an already-open sync PR was
/// pushed to, so callers can distinguish `PrCreated` from `PrUpdated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrAction {
    Created,
    Updated,
}

#[derive(Debug, Clone)]
pub enum TargetOutcomeStatus {
    Success {
        pr_number: Option<u64>,
        pr_url: Option<String>,
        pr_action: PrAction,
        branch_recovered: bool,
    },
    Skipped {
        reason: String,
    },
    DryRun,
}

#[derive(Debug, Clone)]
pub struct TargetOutcome {
    pub status: TargetOutcomeStatus,
    pub changed_files: usize,
    pub file_errors: usize,
    pub changes: Vec<FileChange>,
}

/// Checked at every `Preparing -> Processing -> Committing -> Publishing`
/// boundary: a cooperative shutdown request takes priority over a deadline
/// that also happens to have passed.
fn check_deadline(cancel: &AtomicBool, deadline: Instant) -> Result<(), SyncError> {
    if cancel.load(Ordering::Relaxed) {
        return Err(SyncError::Cancelled);
    }
    if Instant::now() >= deadline {
        return Err(SyncError::DeadlineExceeded);
    }
    Ok(())
}

/// The per-target pipeline: `Preparing -> Processing -> Committing ->
/// Publishing -> Terminal`. Owns its ephemeral target clone exclusively for
/// the duration of `execute`; the source working tree is owned by the
/// caller (shared, read-only, across every target in the group) and passed
/// in as `source_root`.
pub struct RepositorySync {
    git: Arc<dyn GitClient>,
    hub: Arc<dyn HubClient>,
    batch: Arc<BatchProcessor>,
}

impl RepositorySync {
    pub fn new(git: Arc<dyn GitClient>, hub: Arc<dyn HubClient>, batch: Arc<BatchProcessor>) -> Self {
        Self { git, hub, batch }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &self,
        group: &Group,
        target: &TargetConfig,
        source: &SourceState,
        source_root: &Path,
        clone_root: &Path,
        options: &Options,
        cancel: Arc<AtomicBool>,
    ) -> Result<TargetOutcome, SyncError> {
        let op = format!("sync {}", target.repo);
        self.execute_inner(group, target, source, source_root, clone_root, options, cancel)
            .map_err(|err| err.wrap(op))
    }

    fn execute_inner(
        &self,
        group: &Group,
        target: &TargetConfig,
        source: &SourceState,
        source_root: &Path,
        clone_root: &Path,
        options: &Options,
        cancel: Arc<AtomicBool>,
    ) -> Result<TargetOutcome, SyncError> {
        let deadline = Instant::now() + options.timeout;
        check_deadline(&cancel, deadline)?;

        // Preparing.
        let clone_dir = clone_root.join(unique_clone_dir_name(&target.repo));
        let _clone_guard = EphemeralClone {
            path: clone_dir.clone(),
            cleanup: options.cleanup_temp_files,
        };
        self.git
            .clone_repo(&clone_url(&target.repo), &clone_dir)
            .map_err(map_git_err)?;
        if let Some(base) = &target.branch {
            self.git.checkout(&clone_dir, base).map_err(map_git_err)?;
        }

        let branch_name = sync_branch_name(&group.defaults.branch_prefix, &source.latest_commit);
        let mut branch_recovered = false;
        match self.git.create_branch(&clone_dir, &branch_name) {
            Ok(()) => {}
            Err(GitError::BranchAlreadyExists { .. }) => {
                self.git.checkout(&clone_dir, &branch_name).map_err(map_git_err)?;
                branch_recovered = true;
            }
            Err(other) => return Err(map_git_err(other)),
        }

        check_deadline(&cancel, deadline)?;

        // Processing.
        let (jobs, dir_metrics) = assemble_jobs(
            source_root,
            group,
            target,
            &branch_name,
            self.batch.transform_chain().as_ref(),
        );
        for metrics in &dir_metrics {
            if metrics.transform_errors > 0 || metrics.binary_files_skipped > 0 {
                eprintln!(
                    "warning: {}: {} binary file(s) skipped, {} transform error(s) during preview ({} file(s) discovered)",
                    target.repo, metrics.binary_files_skipped, metrics.transform_errors, metrics.files_discovered
                );
            }
        }
        let ctx = BatchContext {
            source_repo: group.source.repo.clone(),
            target_repo: target.repo.clone(),
            target_branch: branch_name.clone(),
        };
        let result = self.batch.process_files(source_root, jobs, &ctx, Arc::clone(&cancel));

        if result.changes.is_empty() {
            return Ok(TargetOutcome {
                status: TargetOutcomeStatus::Skipped {
                    reason: "no changes".to_string(),
                },
                changed_files: 0,
                file_errors: result.file_errors,
                changes: Vec::new(),
            });
        }

        if options.dry_run {
            return Ok(TargetOutcome {
                status: TargetOutcomeStatus::DryRun,
                changed_files: result.changes.len(),
                file_errors: result.file_errors,
                changes: result.changes,
            });
        }

        // Committing.
        self.write_changes(&clone_dir, &result.changes)?;
        let paths: Vec<String> = result.changes.iter().map(|c| c.path.clone()).collect();
        self.git.add(&clone_dir, &paths).map_err(map_git_err)?;
        self.git
            .commit(&clone_dir, &default_commit_message(&result.changes))
            .map_err(map_git_err)?;

        check_deadline(&cancel, deadline)?;

        // Publishing.
        match self.git.push(&clone_dir, "origin", &branch_name, false) {
            Ok(()) => {}
            Err(GitError::BranchAlreadyExists { .. }) => {
                self.git
                    .push(&clone_dir, "origin", &branch_name, true)
                    .map_err(map_git_err)?;
                branch_recovered = true;
            }
            Err(other) => return Err(map_git_err(other)),
        }

        let base_branch = target.branch.clone().unwrap_or_else(|| group.source.branch.clone());
        let title = default_pr_title(&group.source.repo);
        let body = default_pr_body(&result.changes);
        let existing = self
            .hub
            .list_prs(&target.repo, &branch_name)
            .map_err(map_hub_err)?;

        let (pr, pr_action) = if let Some(existing_pr) = existing.into_iter().next() {
            if options.update_existing_prs {
                self.hub
                    .update_pr(&target.repo, existing_pr.number, &title, &body)
                    .map_err(map_hub_err)?;
            }
            (existing_pr, PrAction::Updated)
        } else {
            let labels = if options.automerge {
                options.automerge_labels.clone()
            } else {
                Vec::new()
            };
            let pr = self
                .hub
                .create_pr(
                    &target.repo,
                    &PrRequest {
                        title,
                        body,
                        head: branch_name,
                        base: base_branch,
                        labels,
                    },
                )
                .map_err(map_hub_err)?;
            (pr, PrAction::Created)
        };

        Ok(TargetOutcome {
            status: TargetOutcomeStatus::Success {
                pr_number: Some(pr.number),
                pr_url: Some(pr.url),
                pr_action,
                branch_recovered,
            },
            changed_files: result.changes.len(),
            file_errors: result.file_errors,
            changes: result.changes,
        })
    }

    fn write_changes(&self, clone_dir: &Path, changes: &[FileChange]) -> Result<(), SyncError> {
        for change in changes {
            let dest = clone_dir.join(&change.path);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(|source| io_err(&change.path, source))?;
            }
            std::fs::write(&dest, &change.content).map_err(|source| io_err(&change.path, source))?;
        }
        Ok(())
    }
}

fn io_err(path: &str, source: std::io::Error) -> SyncError {
    SyncError::Context {
        operation: format!("writing {path}"),
        source: Box::new(SyncError::SyncFailed {
            failed: 1,
            total: 1,
            excerpts: vec![source.to_string()],
            errors: Default::default(),
        }),
    }
}

fn assemble_jobs(
    source_root: &Path,
    group: &Group,
    target: &TargetConfig,
    branch_name: &str,
    transform: &dyn bcast_transform::TransformChain,
) -> (Vec<FileJob>, Vec<DirectoryMetrics>) {
    let mut jobs: Vec<FileJob> = target
        .files
        .iter()
        .map(|mapping: &FileMapping| FileJob {
            source_path: mapping.src.clone(),
            dest_path: mapping.dest.clone(),
            transform: target.transform.clone(),
            is_from_directory: false,
            directory_mapping: None,
            relative_path: None,
            file_index: 0,
            total_files: 0,
        })
        .collect();

    let mut directory_metrics = Vec::with_capacity(target.directories.len());
    for mapping in &target.directories {
        let engine = exclusion_engine_for(mapping);
        let (mut dir_jobs, metrics) = expand_directory_mapping(
            source_root,
            mapping,
            &engine,
            transform,
            &group.source.repo,
            &target.repo,
            branch_name,
        );
        for job in &mut dir_jobs {
            if job.transform == bcast_core::config::Transform::default() {
                job.transform = target.transform.clone();
            }
        }
        jobs.append(&mut dir_jobs);
        directory_metrics.push(metrics);
    }

    let total = jobs.len();
    for (index, job) in jobs.iter_mut().enumerate() {
        job.file_index = index;
        job.total_files = total;
    }
    (jobs, directory_metrics)
}

fn exclusion_engine_for(mapping: &DirectoryMapping) -> ExclusionEngine {
    ExclusionEngine::with_patterns(&mapping.exclude, &mapping.include_only)
}

fn unique_clone_dir_name(repo: &str) -> String {
    let n = CLONE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{n}", repo.replace('/', "__"))
}

pub(crate) fn clone_url(repo: &str) -> String {
    format!("https://github.com/{repo}.git")
}

/// `<prefix>/<timestamp>-<short-commit>`.
fn sync_branch_name(prefix: &str, latest_commit: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let short = &latest_commit[..latest_commit.len().min(7)];
    format!("{prefix}/{timestamp}-{short}")
}

fn default_commit_message(changes: &[FileChange]) -> String {
    let mut lines = vec![format!("Sync {} file(s) from template", changes.len()), String::new()];
    lines.extend(changes.iter().map(|c| format!("- {}", c.path)));
    lines.join("\n")
}

fn default_pr_title(source_repo: &str) -> String {
    format!("Sync from {source_repo}")
}

fn default_pr_body(changes: &[FileChange]) -> String {
    let mut lines = vec![
        "This PR was generated by the broadcast sync.".to_string(),
        String::new(),
        "Changed files:".to_string(),
    ];
    lines.extend(changes.iter().map(|c| {
        let marker = if c.is_new { "new" } else { "modified" };
        format!("- `{}` ({marker})", c.path)
    }));
    lines.join("\n")
}

pub(crate) fn map_git_err(err: GitError) -> SyncError {
    match err {
        GitError::BranchAlreadyExists { branch } => SyncError::BranchAlreadyExists {
            branch,
            where_: bcast_core::BranchLocation::Local,
        },
        other => SyncError::Context {
            operation: "git".to_string(),
            source: Box::new(SyncError::SyncFailed {
                failed: 1,
                total: 1,
                excerpts: vec![other.to_string()],
                errors: Default::default(),
            }),
        },
    }
}

fn map_hub_err(err: HubError) -> SyncError {
    SyncError::Context {
        operation: "github".to_string(),
        source: Box::new(SyncError::SyncFailed {
            failed: 1,
            total: 1,
            excerpts: vec![err.to_string()],
            errors: Default::default(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcast_core::config::{GroupDefaults, SourceConfig, Transform};
    use bcast_hub::{Branch, FileContent, PrState, User};
    use bcast_transform::DefaultTransformChain;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct FakeGit {
        cloned: Mutex<Vec<String>>,
        branch_conflict_once: Mutex<bool>,
        push_conflict_once: Mutex<bool>,
    }

    impl Default for FakeGit {
        fn default() -> Self {
            Self {
                cloned: Mutex::new(Vec::new()),
                branch_conflict_once: Mutex::new(false),
                push_conflict_once: Mutex::new(false),
            }
        }
    }

    impl GitClient for FakeGit {
        fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), GitError> {
            self.cloned.lock().unwrap().push(url.to_string());
            std::fs::create_dir_all(dest).unwrap();
            Ok(())
        }
        fn checkout(&self, _repo: &Path, _reference: &str) -> Result<(), GitError> {
            Ok(())
        }
        fn create_branch(&self, _repo: &Path, name: &str) -> Result<(), GitError> {
            let mut conflict = self.branch_conflict_once.lock().unwrap();
            if *conflict {
                *conflict = false;
                return Err(GitError::BranchAlreadyExists {
                    branch: name.to_string(),
                });
            }
            Ok(())
        }
        fn add(&self, _repo: &Path, _paths: &[String]) -> Result<(), GitError> {
            Ok(())
        }
        fn commit(&self, _repo: &Path, _message: &str) -> Result<(), GitError> {
            Ok(())
        }
        fn push(&self, _repo: &Path, _remote: &str, branch: &str, force: bool) -> Result<(), GitError> {
            let mut conflict = self.push_conflict_once.lock().unwrap();
            if *conflict && !force {
                *conflict = false;
                return Err(GitError::BranchAlreadyExists {
                    branch: branch.to_string(),
                });
            }
            Ok(())
        }
        fn current_commit_sha(&self, _repo: &Path) -> Result<String, GitError> {
            Ok("deadbeef".to_string())
        }
        fn changed_files(&self, _repo: &Path) -> Result<Vec<String>, GitError> {
            Ok(vec![])
        }
    }

    struct FakeHub {
        target_files: Mutex<BTreeMap<String, Vec<u8>>>,
        existing_prs: Mutex<Vec<Pr>>,
        created: Mutex<Vec<PrRequest>>,
    }

    impl Default for FakeHub {
        fn default() -> Self {
            Self {
                target_files: Mutex::new(BTreeMap::new()),
                existing_prs: Mutex::new(Vec::new()),
                created: Mutex::new(Vec::new()),
            }
        }
    }

    impl HubClient for FakeHub {
        fn get_file(&self, _repo: &str, path: &str, _reference: &str) -> Result<FileContent, HubError> {
            self.target_files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .map(|content| FileContent { content })
                .ok_or_else(|| HubError::FileNotFound {
                    repo: "org/target".into(),
                    path: path.to_string(),
                    reference: "branch".into(),
                })
        }
        fn list_branches(&self, _repo: &str) -> Result<Vec<Branch>, HubError> {
            Ok(vec![])
        }
        fn get_branch(&self, _repo: &str, _name: &str) -> Result<Branch, HubError> {
            unimplemented!()
        }
        fn create_pr(&self, _repo: &str, request: &PrRequest) -> Result<Pr, HubError> {
            self.created.lock().unwrap().push(request.clone());
            Ok(Pr {
                number: 42,
                title: request.title.clone(),
                body: request.body.clone(),
                head: request.head.clone(),
                base: request.base.clone(),
                url: "https://example.invalid/pr/42".to_string(),
                state: PrState::Open,
            })
        }
        fn update_pr(&self, _repo: &str, _number: u64, _title: &str, _body: &str) -> Result<(), HubError> {
            Ok(())
        }
        fn get_pr(&self, _repo: &str, _number: u64) -> Result<Pr, HubError> {
            unimplemented!()
        }
        fn list_prs(&self, _repo: &str, _head: &str) -> Result<Vec<Pr>, HubError> {
            Ok(self.existing_prs.lock().unwrap().clone())
        }
        fn current_user(&self) -> Result<User, HubError> {
            unimplemented!()
        }
    }

    fn group() -> Group {
        Group {
            id: "g1".into(),
            name: "group one".into(),
            priority: 0,
            enabled: None,
            depends_on: Default::default(),
            source: SourceConfig {
                repo: "org/template".into(),
                branch: "main".into(),
            },
            targets: vec![],
            defaults: GroupDefaults::default(),
        }
    }

    fn target(repo: &str) -> TargetConfig {
        TargetConfig {
            repo: repo.to_string(),
            branch: None,
            files: vec![FileMapping {
                src: "ci.yml".into(),
                dest: "ci.yml".into(),
            }],
            directories: vec![],
            transform: Transform::default(),
        }
    }

    fn source_state() -> SourceState {
        SourceState {
            repo: "org/template".into(),
            branch: "main".into(),
            latest_commit: "abcdef1234".into(),
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn unchanged_content_is_skipped_with_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ci.yml"), "same").unwrap();

        // The batch processor's hub is the one that matters here: it fetches
        // the target's current bytes to compare against the source.
        let batch_hub = Arc::new(FakeHub::default());
        batch_hub.target_files.lock().unwrap().insert("ci.yml".into(), b"same".to_vec());

        let sync = RepositorySync::new(
            Arc::new(FakeGit::default()),
            Arc::new(FakeHub::default()),
            Arc::new(BatchProcessor::new(batch_hub, Arc::new(DefaultTransformChain))),
        );

        let clone_root = tempfile::tempdir().unwrap();
        let outcome = sync
            .execute(
                &group(),
                &target("org/a"),
                &source_state(),
                dir.path(),
                clone_root.path(),
                &Options::default(),
                Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
        assert!(matches!(outcome.status, TargetOutcomeStatus::Skipped { .. }));
        assert_eq!(outcome.changed_files, 0);
    }

    #[test]
    fn dry_run_reports_changes_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ci.yml"), "new content").unwrap();

        let hub = Arc::new(FakeHub::default());
        let batch_hub = Arc::new(FakeHub::default());
        let sync = RepositorySync::new(
            Arc::new(FakeGit::default()),
            hub,
            Arc::new(BatchProcessor::new(batch_hub, Arc::new(DefaultTransformChain))),
        );

        let mut options = Options::default();
        options.dry_run = true;
        let clone_root = tempfile::tempdir().unwrap();
        let outcome = sync
            .execute(
                &group(),
                &target("org/a"),
                &source_state(),
                dir.path(),
                clone_root.path(),
                &options,
                Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
        assert!(matches!(outcome.status, TargetOutcomeStatus::DryRun));
        assert_eq!(outcome.changed_files, 1);
    }

    #[test]
    fn local_branch_conflict_recovers_via_checkout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ci.yml"), "new content").unwrap();

        let git = Arc::new(FakeGit::default());
        *git.branch_conflict_once.lock().unwrap() = true;
        let hub = Arc::new(FakeHub::default());
        let batch_hub = Arc::new(FakeHub::default());

        let sync = RepositorySync::new(
            git,
            hub,
            Arc::new(BatchProcessor::new(batch_hub, Arc::new(DefaultTransformChain))),
        );
        let clone_root = tempfile::tempdir().unwrap();
        let outcome = sync
            .execute(
                &group(),
                &target("org/a"),
                &source_state(),
                dir.path(),
                clone_root.path(),
                &Options::default(),
                Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
        assert!(matches!(outcome.status, TargetOutcomeStatus::Success { .. }));
    }

    #[test]
    fn remote_branch_conflict_triggers_a_single_force_push_then_creates_pr() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ci.yml"), "new content").unwrap();

        let git = Arc::new(FakeGit::default());
        *git.push_conflict_once.lock().unwrap() = true;
        let hub = Arc::new(FakeHub::default());
        let batch_hub = Arc::new(FakeHub::default());

        let sync = RepositorySync::new(
            git,
            hub.clone(),
            Arc::new(BatchProcessor::new(batch_hub, Arc::new(DefaultTransformChain))),
        );
        let clone_root = tempfile::tempdir().unwrap();
        let outcome = sync
            .execute(
                &group(),
                &target("org/a"),
                &source_state(),
                dir.path(),
                clone_root.path(),
                &Options::default(),
                Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
        assert!(matches!(outcome.status, TargetOutcomeStatus::Success { .. }));
        assert_eq!(hub.created.lock().unwrap().len(), 1);
    }

    #[test]
    fn existing_pr_is_updated_when_update_existing_prs_is_set() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ci.yml"), "new content").unwrap();

        let hub = Arc::new(FakeHub::default());
        hub.existing_prs.lock().unwrap().push(Pr {
            number: 7,
            title: "old".into(),
            body: "old".into(),
            head: "sync/branch".into(),
            base: "main".into(),
            url: "https://example.invalid/pr/7".into(),
            state: PrState::Open,
        });
        let batch_hub = Arc::new(FakeHub::default());

        let mut options = Options::default();
        options.update_existing_prs = true;
        let sync = RepositorySync::new(
            Arc::new(FakeGit::default()),
            hub,
            Arc::new(BatchProcessor::new(batch_hub, Arc::new(DefaultTransformChain))),
        );
        let clone_root = tempfile::tempdir().unwrap();
        let outcome = sync
            .execute(
                &group(),
                &target("org/a"),
                &source_state(),
                dir.path(),
                clone_root.path(),
                &options,
                Arc::new(AtomicBool::new(false)),
            )
            .unwrap();
        match outcome.status {
            TargetOutcomeStatus::Success { pr_number, .. } => assert_eq!(pr_number, Some(7)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
