use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use bcast_core::config::{Config, Group, TargetConfig};
use bcast_core::types::{EphemeralClone, GroupState, GroupStatus, Results, TargetStatus};
use bcast_core::{Event, EventKind, JsonlEventLog, SyncError};
use bcast_hub::HubClient;
use bcast_vcs::GitClient;
use chrono::Utc;
use serde_json::json;

use crate::batch_processor::BatchProcessor;
use crate::external_id::generate_sync_run_external_id;
use crate::group_orchestrator::{aggregate_failures, GroupOrchestrator, GroupOutcome};
use crate::metrics_recorder::{FileChangeRecord, MetricsRecorder, NullMetricsRecorder, SyncRunRecord, TargetResultRecord};
use crate::options::Options;
use crate::progress_tracker::ProgressTracker;
use crate::repository_sync::{clone_url, map_git_err, PrAction, RepositorySync, TargetOutcomeStatus};
use crate::state::{needs_sync, StateDiscoverer};

/// Top-level entry point: single-group fast path, multi-group delegation to
/// `GroupOrchestrator`, bounded-concurrency target dispatch within a group.
pub struct Engine {
    git: Arc<dyn GitClient>,
    hub: Arc<dyn HubClient>,
    batch: Arc<BatchProcessor>,
    discoverer: Arc<dyn StateDiscoverer>,
    metrics: Arc<dyn MetricsRecorder>,
    event_log: Option<Arc<JsonlEventLog>>,
    workspace_root: PathBuf,
    /// Cooperative shutdown flag, shared across every group and target
    /// dispatched by one `run()` invocation. `main` registers this against
    /// SIGINT/SIGTERM so an operator's Ctrl-C drains in-flight targets
    /// instead of killing the process mid-write.
    shutdown: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(
        git: Arc<dyn GitClient>,
        hub: Arc<dyn HubClient>,
        batch: Arc<BatchProcessor>,
        discoverer: Arc<dyn StateDiscoverer>,
    ) -> Self {
        Self {
            git,
            hub,
            batch,
            discoverer,
            metrics: Arc::new(NullMetricsRecorder),
            event_log: None,
            workspace_root: std::env::temp_dir().join("bcast-sync"),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_event_log(mut self, event_log: Arc<JsonlEventLog>) -> Self {
        self.event_log = Some(event_log);
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    /// Shared with a signal handler so the caller can request a cooperative
    /// shutdown; every in-flight `RepositorySync` observes it at its next
    /// checkpoint instead of being killed outright.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn run(&self, config: &Config, options: &Options) -> Result<Results, SyncError> {
        let external_id = generate_sync_run_external_id();
        let run_id = self
            .metrics
            .record_run(&SyncRunRecord {
                external_id: external_id.clone(),
                config_id: config.id.clone(),
                config_name: config.name.clone(),
                trigger: bcast_core::types::classify_trigger().to_string(),
                started_at: Utc::now(),
                dry_run: options.dry_run,
            })
            .unwrap_or_default();
        self.emit(Event::new(EventKind::SyncRunStarted, external_id.clone()));

        let (results, outcome) = self.run_groups(config, options, run_id);

        let _ = self.metrics.finish_run(run_id, Utc::now(), &results);
        self.emit(Event::new(EventKind::SyncRunFinished, external_id));

        match outcome {
            Ok(()) => Ok(results),
            Err(err) if err.is_cancelled() => Err(err),
            Err(err @ SyncError::OrchestrationFailures { .. }) => Err(err),
            Err(_) => {
                let excerpts: Vec<String> = results.errors.values().take(3).cloned().collect();
                let total = (results.successful + results.failed + results.skipped).max(1);
                Err(SyncError::SyncFailed {
                    failed: results.failed.max(1),
                    total,
                    excerpts,
                    errors: results.errors.clone(),
                })
            }
        }
    }

    fn run_groups(&self, config: &Config, options: &Options, run_id: i64) -> (Results, Result<(), SyncError>) {
        if config.groups.len() <= 1 {
            return match config.groups.first() {
                None => (Results::default(), Ok(())),
                Some(group) => {
                    if !group.is_enabled() || !options.group_passes_filter(&group.id, &group.name) {
                        (Results::default(), Ok(()))
                    } else {
                        match self.execute_single_group(group, options, run_id) {
                            Ok(results) => {
                                let outcome = if results.failed > 0 {
                                    Err(SyncError::OrchestrationFailures {
                                        failed_groups: vec![group.id.clone()],
                                    })
                                } else {
                                    Ok(())
                                };
                                (results, outcome)
                            }
                            Err(err) => (Results::default(), Err(err)),
                        }
                    }
                }
            };
        }

        let orchestrator = GroupOrchestrator::new(|group| self.execute_single_group(group, options, run_id));
        match orchestrator.orchestrate(&config.groups, options) {
            Ok(outcomes) => {
                let merged = merge_results(&outcomes);
                let outcome = aggregate_failures(&outcomes);
                (merged, outcome)
            }
            Err(err) => (Results::default(), Err(err)),
        }
    }

    /// Wraps `execute_single_group_inner` with the per-group metrics/event
    /// lifecycle, so both the single-group fast path and every group
    /// `GroupOrchestrator` dispatches go through the same recording.
    fn execute_single_group(&self, group: &Group, options: &Options, run_id: i64) -> Result<Results, SyncError> {
        self.start_group(run_id, group);
        let outcome = self.execute_single_group_inner(group, options, run_id);
        match &outcome {
            Ok(results) => {
                let state = if results.failed > 0 { GroupState::Failed } else { GroupState::Success };
                self.finalize_group(run_id, group, state, None);
            }
            Err(err) => {
                self.finalize_group(run_id, group, GroupState::Failed, Some(err.to_string()));
            }
        }
        outcome
    }

    fn start_group(&self, run_id: i64, group: &Group) {
        let mut status = GroupStatus::pending();
        status.state = GroupState::Running;
        status.started_at = Some(Utc::now());
        let _ = self.metrics.record_group_status(run_id, &group.id, &status);
        self.emit(Event::new(EventKind::GroupStarted, event_id()).with_group(group.id.clone()));
    }

    fn finalize_group(&self, run_id: i64, group: &Group, state: GroupState, message: Option<String>) {
        let status = GroupStatus {
            state,
            started_at: None,
            ended_at: Some(Utc::now()),
            error: if state == GroupState::Failed { message.clone() } else { None },
            message: message.clone(),
        };
        let _ = self.metrics.record_group_status(run_id, &group.id, &status);

        let kind = if state == GroupState::Skipped {
            EventKind::GroupSkipped
        } else {
            EventKind::GroupFinished
        };
        let mut event = Event::new(kind, event_id()).with_group(group.id.clone());
        if let Some(message) = message {
            event = event.with_payload(json!({ "message": message }));
        }
        self.emit(event);
    }

    /// `executeSingleGroup`: discover state, filter to targets that need a
    /// sync, clone the source once (shared, read-only, across every target),
    /// then dispatch one `RepositorySync` per target across a bounded pool
    /// of worker threads. Per-target failures are collected onto the
    /// returned `Results`, never propagated — only cancellation escalates.
    fn execute_single_group_inner(&self, group: &Group, options: &Options, run_id: i64) -> Result<Results, SyncError> {
        if group.targets.is_empty() {
            return Err(SyncError::NoMatchingTargets);
        }

        let state = self
            .discoverer
            .discover(group)
            .map_err(|err| {
                SyncError::SyncFailed {
                    failed: 1,
                    total: 1,
                    excerpts: vec![err.to_string()],
                    errors: Default::default(),
                }
                .wrap(format!("discovering state for group '{}'", group.id))
            })?;

        let candidates: Vec<&TargetConfig> = group
            .targets
            .iter()
            .filter(|t| options.target_filter.is_empty() || options.target_filter.iter().any(|f| f == &t.repo))
            .collect();

        if candidates.is_empty() {
            return Err(SyncError::NoMatchingTargets);
        }

        let mut conflicted: Vec<&TargetConfig> = Vec::new();
        let to_sync: Vec<&TargetConfig> = candidates
            .into_iter()
            .filter(|t| {
                let status = state
                    .targets
                    .get(&t.repo)
                    .map(|s| s.status)
                    .unwrap_or(TargetStatus::Behind);
                if status == TargetStatus::Conflict {
                    conflicted.push(t);
                    return false;
                }
                needs_sync(status, options.force, options.update_existing_prs)
            })
            .collect();

        let tracker = ProgressTracker::new(to_sync.len() + conflicted.len(), options.dry_run);

        for target in &conflicted {
            let reason = "conflict: requires human action";
            tracker.record_skipped(&target.repo, reason);
            self.emit(
                Event::new(EventKind::TargetSkipped, event_id())
                    .with_group(group.id.clone())
                    .with_target(target.repo.clone())
                    .with_payload(json!({ "reason": reason })),
            );
        }

        if to_sync.is_empty() {
            return Ok(tracker.get_results());
        }

        let group_dir = self.workspace_root.join(format!("group-{}", sanitize(&group.id)));
        std::fs::create_dir_all(&group_dir).map_err(|source| {
            SyncError::SyncFailed {
                failed: 1,
                total: 1,
                excerpts: vec![source.to_string()],
                errors: Default::default(),
            }
            .wrap(format!("preparing workspace for group '{}'", group.id))
        })?;

        let source_dir = group_dir.join("source");
        let _source_guard = EphemeralClone {
            path: source_dir.clone(),
            cleanup: options.cleanup_temp_files,
        };
        self.git
            .clone_repo(&clone_url(&group.source.repo), &source_dir)
            .map_err(map_git_err)?;
        self.git
            .checkout(&source_dir, &state.source.latest_commit)
            .map_err(map_git_err)?;

        let targets_root = group_dir.join("targets");
        let _ = std::fs::create_dir_all(&targets_root);

        let cancel = Arc::clone(&self.shutdown);
        let worker_count = options.max_concurrency().min(to_sync.len());

        let (job_tx, job_rx) = mpsc::channel::<TargetConfig>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, result_rx) = mpsc::sync_channel::<(String, Result<crate::repository_sync::TargetOutcome, SyncError>)>(to_sync.len());

        for target in &to_sync {
            tracker.start_repository(&target.repo);
            self.emit(
                Event::new(EventKind::TargetStarted, event_id())
                    .with_group(group.id.clone())
                    .with_target(target.repo.clone()),
            );
            let _ = job_tx.send((*target).clone());
        }
        drop(job_tx);

        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let git = Arc::clone(&self.git);
            let hub = Arc::clone(&self.hub);
            let batch = Arc::clone(&self.batch);
            let group = group.clone();
            let source = state.source.clone();
            let source_dir = source_dir.clone();
            let targets_root = targets_root.clone();
            let options = options.clone();
            let cancel = Arc::clone(&cancel);

            handles.push(thread::spawn(move || {
                let sync = RepositorySync::new(git, hub, batch);
                loop {
                    let next = job_rx.lock().unwrap().recv();
                    let target = match next {
                        Ok(target) => target,
                        Err(_) => break,
                    };
                    let repo = target.repo.clone();
                    let outcome = sync.execute(
                        &group,
                        &target,
                        &source,
                        &source_dir,
                        &targets_root,
                        &options,
                        Arc::clone(&cancel),
                    );
                    if result_tx.send((repo, outcome)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let mut cancelled = false;
        for (repo, outcome) in result_rx {
            let ended_at = Utc::now();
            match outcome {
                Ok(out) => {
                    for _ in 0..out.file_errors {
                        tracker.record_file_error();
                    }
                    if out.file_errors > 0 {
                        self.emit(
                            Event::new(EventKind::FileError, event_id())
                                .with_group(group.id.clone())
                                .with_target(repo.clone())
                                .with_payload(json!({ "count": out.file_errors })),
                        );
                    }

                    let (status_label, pr_info, branch_recovered) = match &out.status {
                        TargetOutcomeStatus::Success {
                            pr_action,
                            branch_recovered,
                            ..
                        } => ("success", Some(*pr_action), *branch_recovered),
                        TargetOutcomeStatus::DryRun => ("dry_run", None, false),
                        TargetOutcomeStatus::Skipped { .. } => ("skipped", None, false),
                    };

                    let target_result_id = self
                        .metrics
                        .record_target_result(
                            run_id,
                            &TargetResultRecord {
                                group_id: group.id.clone(),
                                repo: repo.clone(),
                                status: status_label.to_string(),
                                error: None,
                                started_at: ended_at,
                                ended_at,
                            },
                        )
                        .ok();

                    if let Some(target_result_id) = target_result_id {
                        for change in &out.changes {
                            let _ = self.metrics.record_file_change(
                                target_result_id,
                                &FileChangeRecord {
                                    path: change.path.clone(),
                                    is_new: change.is_new,
                                    content_len: change.content.len(),
                                },
                            );
                            self.emit(
                                Event::new(EventKind::FileChanged, event_id())
                                    .with_group(group.id.clone())
                                    .with_target(repo.clone())
                                    .with_payload(json!({ "path": change.path, "is_new": change.is_new })),
                            );
                        }
                    }

                    if branch_recovered {
                        self.emit(
                            Event::new(EventKind::BranchRecovered, event_id())
                                .with_group(group.id.clone())
                                .with_target(repo.clone()),
                        );
                    }
                    if let Some(action) = pr_info {
                        let kind = match action {
                            PrAction::Created => EventKind::PrCreated,
                            PrAction::Updated => EventKind::PrUpdated,
                        };
                        self.emit(Event::new(kind, event_id()).with_group(group.id.clone()).with_target(repo.clone()));
                    }

                    match out.status {
                        TargetOutcomeStatus::Success { .. } | TargetOutcomeStatus::DryRun => {
                            tracker.record_success(&repo);
                            self.emit(
                                Event::new(EventKind::TargetSucceeded, event_id())
                                    .with_group(group.id.clone())
                                    .with_target(repo.clone())
                                    .with_payload(json!({
                                        "changed_files": out.changed_files,
                                        "target_result_id": target_result_id,
                                    })),
                            );
                        }
                        TargetOutcomeStatus::Skipped { reason } => {
                            tracker.record_skipped(&repo, reason.clone());
                            self.emit(
                                Event::new(EventKind::TargetSkipped, event_id())
                                    .with_group(group.id.clone())
                                    .with_target(repo.clone())
                                    .with_payload(json!({ "reason": reason })),
                            );
                        }
                    }
                }
                Err(err) => {
                    if err.is_cancelled() {
                        cancelled = true;
                        cancel.store(true, Ordering::Relaxed);
                    }
                    let _ = self.metrics.record_target_result(
                        run_id,
                        &TargetResultRecord {
                            group_id: group.id.clone(),
                            repo: repo.clone(),
                            status: "failed".to_string(),
                            error: Some(err.to_string()),
                            started_at: ended_at,
                            ended_at,
                        },
                    );
                    self.emit(
                        Event::new(EventKind::TargetFailed, event_id())
                            .with_group(group.id.clone())
                            .with_target(repo.clone())
                            .with_payload(json!({ "error": err.to_string() })),
                    );
                    tracker.record_error(&repo, &err);
                }
            }
        }

        for handle in handles {
            let _ = handle.join();
        }

        // Exercised via `self.metrics.resolve_*` rather than inline above,
        // since a group-level summary is the natural place to ask "what did
        // we just persist" after every target has reported in.
        let group_metrics_id = self.metrics.resolve_group_id(run_id, &group.id).ok().flatten();
        if let Some(repo) = to_sync.first().map(|t| t.repo.as_str()) {
            let _ = self.metrics.resolve_repo_id(repo);
            let _ = self.metrics.resolve_target_id(run_id, repo);
        }
        let _ = group_metrics_id;

        if cancelled {
            return Err(SyncError::Cancelled);
        }

        Ok(tracker.get_results())
    }

    fn emit(&self, event: Event) {
        if let Some(log) = &self.event_log {
            if let Err(err) = log.append_both(&event) {
                eprintln!("warning: failed to append event {:?} to event log: {err}", event.kind);
            }
        }
    }
}

fn event_id() -> String {
    format!("evt-{}-{:06x}", Utc::now().timestamp_millis(), rand::random::<u32>() & 0xff_ffff)
}

fn merge_results(outcomes: &[GroupOutcome]) -> Results {
    let mut merged = Results::default();
    for outcome in outcomes {
        merged.successful += outcome.results.successful;
        merged.failed += outcome.results.failed;
        merged.skipped += outcome.results.skipped;
        merged.duration_ms += outcome.results.duration_ms;
        merged.dry_run = merged.dry_run || outcome.results.dry_run;
        for (repo, message) in &outcome.results.errors {
            merged.errors.insert(repo.clone(), message.clone());
        }
    }
    merged
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
