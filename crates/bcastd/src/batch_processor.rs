use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use bcast_core::FileChange;
use bcast_core::FileJob;
use bcast_hub::HubClient;
use bcast_transform::{TransformChain, TransformContext};

const DEFAULT_WORKERS: usize = 10;

/// Per-batch context shared by every worker: the target repo/branch file
/// content is fetched against, and the source repo the transform chain
/// compares against for repo-name rewriting.
#[derive(Debug, Clone)]
pub struct BatchContext {
    pub source_repo: String,
    pub target_repo: String,
    pub target_branch: String,
}

enum JobOutcome {
    Change(FileChange),
    FileNotFound,
    NoChange,
    Error(String),
}

pub struct BatchResult {
    pub changes: Vec<FileChange>,
    pub file_errors: usize,
}

/// Worker pool over file jobs: fetch target content, transform, classify
/// as new/modified/unchanged/skipped. `std::thread` + `std::sync::mpsc`,
/// matching this workspace's existing subprocess-supervision pattern.
pub struct BatchProcessor {
    worker_count: AtomicUsize,
    hub: Arc<dyn HubClient>,
    transform: Arc<dyn TransformChain>,
}

impl BatchProcessor {
    pub fn new(hub: Arc<dyn HubClient>, transform: Arc<dyn TransformChain>) -> Self {
        Self {
            worker_count: AtomicUsize::new(DEFAULT_WORKERS),
            hub,
            transform,
        }
    }

    /// Safe at any time; only affects the *next* invocation. Non-positive
    /// values are ignored.
    pub fn set_worker_count(&self, count: usize) {
        if count > 0 {
            self.worker_count.store(count, Ordering::Relaxed);
        }
    }

    /// The transform chain this processor diffs files through, exposed so
    /// callers (e.g. the directory-mapping preview pass) can run the same
    /// chain without duplicating how it's constructed.
    pub fn transform_chain(&self) -> &Arc<dyn TransformChain> {
        &self.transform
    }

    pub fn process_files(
        &self,
        source_root: &Path,
        mut jobs: Vec<FileJob>,
        ctx: &BatchContext,
        cancel: Arc<AtomicBool>,
    ) -> BatchResult {
        let total = jobs.len();
        for (index, job) in jobs.iter_mut().enumerate() {
            job.file_index = index;
            job.total_files = total;
        }

        let worker_count = self.worker_count.load(Ordering::Relaxed).max(1);
        let (job_tx, job_rx) = mpsc::channel::<FileJob>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, result_rx) = mpsc::channel::<JobOutcome>();

        for job in jobs {
            // Receiver is never dropped before all jobs are sent, so this
            // can only fail if a worker panicked; either way there is
            // nothing useful to do with a send failure here.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            let hub = Arc::clone(&self.hub);
            let transform = Arc::clone(&self.transform);
            let source_root = source_root.to_path_buf();
            let ctx = ctx.clone();
            let cancel = Arc::clone(&cancel);

            handles.push(thread::spawn(move || {
                while !cancel.load(Ordering::Relaxed) {
                    let next = job_rx.lock().unwrap().recv();
                    let job = match next {
                        Ok(job) => job,
                        Err(_) => break,
                    };
                    let outcome = process_one(&source_root, job, &ctx, hub.as_ref(), transform.as_ref());
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let mut changes = Vec::new();
        let mut file_errors = 0usize;
        for outcome in result_rx {
            match outcome {
                JobOutcome::Change(change) => changes.push(change),
                JobOutcome::FileNotFound | JobOutcome::NoChange => {}
                JobOutcome::Error(_) => file_errors += 1,
            }
        }

        for handle in handles {
            let _ = handle.join();
        }

        BatchResult { changes, file_errors }
    }
}

fn process_one(
    source_root: &Path,
    job: FileJob,
    ctx: &BatchContext,
    hub: &dyn HubClient,
    transform: &dyn TransformChain,
) -> JobOutcome {
    let source_bytes = match std::fs::read(source_path(source_root, &job.source_path)) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return JobOutcome::FileNotFound,
        Err(err) => return JobOutcome::Error(format!("reading {}: {err}", job.source_path)),
    };

    let (current_bytes, is_new) = match hub.get_file(&ctx.target_repo, &job.dest_path, &ctx.target_branch) {
        Ok(content) => (content.content, false),
        Err(bcast_hub::HubError::FileNotFound { .. }) => (Vec::new(), true),
        Err(err) => return JobOutcome::Error(format!("fetching {}: {err}", job.dest_path)),
    };

    let transform_ctx = TransformContext {
        source_repo: ctx.source_repo.clone(),
        target_repo: ctx.target_repo.clone(),
        target_branch: ctx.target_branch.clone(),
        file_path: job.dest_path.clone(),
        transform: job.transform.clone(),
    };
    let transformed = match transform.transform(&source_bytes, &transform_ctx) {
        Ok(bytes) => bytes,
        Err(err) => return JobOutcome::Error(format!("transforming {}: {err}", job.dest_path)),
    };

    if transformed == current_bytes {
        return JobOutcome::NoChange;
    }

    JobOutcome::Change(FileChange {
        path: job.dest_path,
        content: transformed,
        original_content: if is_new { None } else { Some(current_bytes) },
        is_new,
    })
}

fn source_path(source_root: &Path, relative: &str) -> PathBuf {
    source_root.join(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcast_core::config::Transform;
    use bcast_hub::{Branch, FileContent, HubError, Pr, PrRequest, PrState, User};
    use bcast_transform::DefaultTransformChain;
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    struct FakeHub {
        files: StdMutex<BTreeMap<String, Vec<u8>>>,
    }

    impl HubClient for FakeHub {
        fn get_file(&self, _repo: &str, path: &str, _reference: &str) -> Result<FileContent, HubError> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .map(|content| FileContent { content })
                .ok_or_else(|| HubError::FileNotFound {
                    repo: "org/target".to_string(),
                    path: path.to_string(),
                    reference: "branch".to_string(),
                })
        }
        fn list_branches(&self, _repo: &str) -> Result<Vec<Branch>, HubError> {
            Ok(vec![])
        }
        fn get_branch(&self, _repo: &str, _name: &str) -> Result<Branch, HubError> {
            unimplemented!()
        }
        fn create_pr(&self, _repo: &str, _request: &PrRequest) -> Result<Pr, HubError> {
            unimplemented!()
        }
        fn update_pr(&self, _repo: &str, _number: u64, _title: &str, _body: &str) -> Result<(), HubError> {
            unimplemented!()
        }
        fn get_pr(&self, _repo: &str, _number: u64) -> Result<Pr, HubError> {
            unimplemented!()
        }
        fn list_prs(&self, _repo: &str, _head: &str) -> Result<Vec<Pr>, HubError> {
            Ok(vec![])
        }
        fn current_user(&self) -> Result<User, HubError> {
            unimplemented!()
        }
    }

    fn job(source: &str, dest: &str) -> FileJob {
        FileJob {
            source_path: source.to_string(),
            dest_path: dest.to_string(),
            transform: Transform::default(),
            is_from_directory: false,
            directory_mapping: None,
            relative_path: None,
            file_index: 0,
            total_files: 0,
        }
    }

    fn ctx() -> BatchContext {
        BatchContext {
            source_repo: "org/template".to_string(),
            target_repo: "org/target".to_string(),
            target_branch: "sync/branch".to_string(),
        }
    }

    #[test]
    fn unchanged_content_produces_empty_change_set() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ci.yml"), "Same Content").unwrap();

        let mut files = BTreeMap::new();
        files.insert("ci.yml".to_string(), b"Same Content".to_vec());
        let hub = Arc::new(FakeHub {
            files: StdMutex::new(files),
        });
        let processor = BatchProcessor::new(hub, Arc::new(DefaultTransformChain));

        let result = processor.process_files(
            dir.path(),
            vec![job("ci.yml", "ci.yml")],
            &ctx(),
            Arc::new(AtomicBool::new(false)),
        );
        assert!(result.changes.is_empty());
        assert_eq!(result.file_errors, 0);
    }

    #[test]
    fn existing_target_new_source_produces_one_change_with_target_as_original() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ci.yml"),
            "name: CI\npermissions: {}\n",
        )
        .unwrap();

        let mut files = BTreeMap::new();
        files.insert("ci.yml".to_string(), b"name: CI\n".to_vec());
        let hub = Arc::new(FakeHub {
            files: StdMutex::new(files),
        });
        let processor = BatchProcessor::new(hub, Arc::new(DefaultTransformChain));

        let result = processor.process_files(
            dir.path(),
            vec![job("ci.yml", "ci.yml")],
            &ctx(),
            Arc::new(AtomicBool::new(false)),
        );
        assert_eq!(result.changes.len(), 1);
        let change = &result.changes[0];
        assert_eq!(change.content, b"name: CI\npermissions: {}\n");
        assert_eq!(change.original_content, Some(b"name: CI\n".to_vec()));
        assert!(!change.is_new);
    }

    #[test]
    fn missing_source_file_is_swallowed_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let hub = Arc::new(FakeHub {
            files: StdMutex::new(BTreeMap::new()),
        });
        let processor = BatchProcessor::new(hub, Arc::new(DefaultTransformChain));

        let result = processor.process_files(
            dir.path(),
            vec![job("missing.yml", "missing.yml")],
            &ctx(),
            Arc::new(AtomicBool::new(false)),
        );
        assert!(result.changes.is_empty());
        assert_eq!(result.file_errors, 0);
    }

    #[test]
    fn new_target_file_has_no_original_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("NEW.md"), "brand new\n").unwrap();
        let hub = Arc::new(FakeHub {
            files: StdMutex::new(BTreeMap::new()),
        });
        let processor = BatchProcessor::new(hub, Arc::new(DefaultTransformChain));

        let result = processor.process_files(
            dir.path(),
            vec![job("NEW.md", "NEW.md")],
            &ctx(),
            Arc::new(AtomicBool::new(false)),
        );
        assert_eq!(result.changes.len(), 1);
        assert!(result.changes[0].is_new);
        assert!(result.changes[0].original_content.is_none());
    }

    #[test]
    fn worker_count_coerces_non_positive_values_away_from_zero() {
        let hub = Arc::new(FakeHub {
            files: StdMutex::new(BTreeMap::new()),
        });
        let processor = BatchProcessor::new(hub, Arc::new(DefaultTransformChain));
        processor.set_worker_count(0);
        assert_eq!(processor.worker_count.load(Ordering::Relaxed), DEFAULT_WORKERS);
        processor.set_worker_count(4);
        assert_eq!(processor.worker_count.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn many_jobs_all_arrive_through_the_worker_pool() {
        let dir = tempfile::tempdir().unwrap();
        let mut jobs = Vec::new();
        for i in 0..25 {
            let name = format!("file-{i}.txt");
            std::fs::write(dir.path().join(&name), format!("content {i}")).unwrap();
            jobs.push(job(&name, &name));
        }
        let hub = Arc::new(FakeHub {
            files: StdMutex::new(BTreeMap::new()),
        });
        let processor = BatchProcessor::new(hub, Arc::new(DefaultTransformChain));
        let result = processor.process_files(dir.path(), jobs, &ctx(), Arc::new(AtomicBool::new(false)));
        assert_eq!(result.changes.len(), 25);
    }
}
