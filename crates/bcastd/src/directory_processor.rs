use std::path::Path;
use std::time::{Duration, Instant};

use bcast_core::config::DirectoryMapping;
use bcast_core::FileJob;
use bcast_exclusion::ExclusionEngine;
use bcast_transform::{looks_binary, TransformChain, TransformContext};
use chrono::{DateTime, Utc};

/// Per-mapping counters collected alongside the expanded `FileJob`s. Not
/// required for functional correctness, but exposed to validators and the
/// CLI's summary output. `transform_successes`/`transform_errors` and the
/// binary counters come from a preview pass over each file's bytes; the
/// same file is transformed again for real when `BatchProcessor` diffs it
/// against the target, since this pass has no target content to compare.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryMetrics {
    pub files_discovered: usize,
    pub files_processed: usize,
    pub binary_files_skipped: usize,
    pub binary_bytes_skipped: u64,
    pub transform_successes: usize,
    pub transform_errors: usize,
    pub transform_duration: Duration,
    pub duration: Duration,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Walk `source_root/mapping.src`, apply exclusion/include-only/hidden-file
/// filtering, and produce one `FileJob` per surviving regular file. A
/// collision under flattening is last-write-wins: the caller sees it only
/// in `files_discovered` outpacing `files_processed` after dedup by
/// `dest_path`.
///
/// Each surviving file is also read once here to sniff binary content and
/// run it through `transform` so `DirectoryMetrics` reports real counts;
/// transform failures here are swallowed into `transform_errors` rather
/// than aborting the walk, since the authoritative transform attempt
/// happens later against the target's current content.
pub fn expand_directory_mapping(
    source_root: &Path,
    mapping: &DirectoryMapping,
    engine: &ExclusionEngine,
    transform: &dyn TransformChain,
    source_repo: &str,
    target_repo: &str,
    target_branch: &str,
) -> (Vec<FileJob>, DirectoryMetrics) {
    let started = Instant::now();
    let mut metrics = DirectoryMetrics {
        started_at: Some(Utc::now()),
        ..Default::default()
    };
    let src_root = source_root.join(&mapping.src);

    if !src_root.exists() {
        metrics.duration = started.elapsed();
        metrics.ended_at = Some(Utc::now());
        return (Vec::new(), metrics);
    }

    let mut jobs = Vec::new();
    let preserve_structure = mapping.preserve_structure();
    let include_hidden = mapping.include_hidden();
    let mapping_transform = mapping.transform.clone().unwrap_or_default();

    for entry in walkdir::WalkDir::new(&src_root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(&src_root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let relative_str = relative.to_string_lossy().replace('\\', "/");

        if !include_hidden && is_hidden(&relative_str) {
            continue;
        }

        metrics.files_discovered += 1;

        if engine.is_excluded(&relative_str) {
            continue;
        }

        let dest_path = if preserve_structure {
            join_posix(&mapping.dest, &relative_str)
        } else {
            let basename = relative
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| relative_str.clone());
            join_posix(&mapping.dest, &basename)
        };

        let source_path = join_posix(&mapping.src, &relative_str);

        if let Ok(bytes) = std::fs::read(entry.path()) {
            if looks_binary(&bytes) {
                metrics.binary_files_skipped += 1;
                metrics.binary_bytes_skipped += bytes.len() as u64;
            } else {
                let transform_started = Instant::now();
                let ctx = TransformContext {
                    source_repo: source_repo.to_string(),
                    target_repo: target_repo.to_string(),
                    target_branch: target_branch.to_string(),
                    file_path: dest_path.clone(),
                    transform: mapping_transform.clone(),
                };
                match transform.transform(&bytes, &ctx) {
                    Ok(_) => metrics.transform_successes += 1,
                    Err(_) => metrics.transform_errors += 1,
                }
                metrics.transform_duration += transform_started.elapsed();
            }
        }

        jobs.push(FileJob {
            source_path,
            dest_path,
            transform: mapping_transform.clone(),
            is_from_directory: true,
            directory_mapping: Some(mapping.clone()),
            relative_path: Some(relative_str),
            file_index: 0,
            total_files: 0,
        });
        metrics.files_processed += 1;
    }

    let total = jobs.len();
    for (index, job) in jobs.iter_mut().enumerate() {
        job.file_index = index;
        job.total_files = total;
    }

    metrics.duration = started.elapsed();
    metrics.ended_at = Some(Utc::now());
    (jobs, metrics)
}

/// A path segment is hidden if it starts with `.` and is neither `.` nor
/// `..` (which never appear in a `walkdir` relative path, but the check is
/// kept to mirror the documented contract exactly).
fn is_hidden(relative: &str) -> bool {
    relative
        .split('/')
        .any(|segment| segment.starts_with('.') && segment != "." && segment != "..")
}

fn join_posix(base: &str, rest: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        rest.to_string()
    } else {
        format!("{base}/{rest}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcast_core::config::Transform;
    use bcast_transform::DefaultTransformChain;

    fn mapping(src: &str, dest: &str) -> DirectoryMapping {
        DirectoryMapping {
            src: src.to_string(),
            dest: dest.to_string(),
            preserve_structure: None,
            include_hidden: None,
            exclude: vec![],
            include_only: vec![],
            transform: None,
        }
    }

    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn expand(
        source_root: &Path,
        mapping: &DirectoryMapping,
        engine: &ExclusionEngine,
    ) -> (Vec<FileJob>, DirectoryMetrics) {
        expand_directory_mapping(
            source_root,
            mapping,
            engine,
            &DefaultTransformChain,
            "org/template",
            "org/widgets",
            "sync/branch",
        )
    }

    #[test]
    fn preserve_structure_keeps_relative_directories() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "docs/guide/intro.md", "intro");
        write(dir.path(), "docs/guide/advanced.md", "advanced");

        let engine = ExclusionEngine::new();
        let (jobs, metrics) = expand(dir.path(), &mapping("docs", "out/docs"), &engine);

        let mut paths: Vec<_> = jobs.iter().map(|j| j.dest_path.clone()).collect();
        paths.sort();
        assert_eq!(paths, vec!["out/docs/guide/advanced.md", "out/docs/guide/intro.md"]);
        assert_eq!(metrics.files_discovered, 2);
        assert_eq!(metrics.files_processed, 2);
        assert_eq!(metrics.transform_successes, 2);
        assert_eq!(metrics.transform_errors, 0);
        assert_eq!(metrics.binary_files_skipped, 0);
        assert!(metrics.started_at.is_some());
        assert!(metrics.ended_at.is_some());
    }

    #[test]
    fn flattening_yields_exactly_one_separator_beyond_dest() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "docs/guide/intro.md", "intro");

        let mut m = mapping("docs", "out");
        m.preserve_structure = Some(false);
        let engine = ExclusionEngine::new();
        let (jobs, _) = expand(dir.path(), &m, &engine);

        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].dest_path, "out/intro.md");
    }

    #[test]
    fn hidden_files_are_skipped_unless_include_hidden_is_set() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "docs/.secret", "shh");
        write(dir.path(), "docs/visible.md", "hi");

        let engine = ExclusionEngine::new();
        let (jobs, _) = expand(dir.path(), &mapping("docs", "out"), &engine);
        let paths: Vec<_> = jobs.iter().map(|j| j.dest_path.as_str()).collect();
        assert_eq!(paths, vec!["out/visible.md"]);

        let mut m = mapping("docs", "out");
        m.include_hidden = Some(true);
        let (jobs, _) = expand(dir.path(), &m, &engine);
        let mut paths: Vec<_> = jobs.iter().map(|j| j.dest_path.clone()).collect();
        paths.sort();
        assert_eq!(paths, vec!["out/.secret", "out/visible.md"]);
    }

    #[test]
    fn exclude_patterns_on_the_engine_are_honored() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "docs/keep.md", "keep");
        write(dir.path(), "docs/skip.tmp", "skip");

        let engine = ExclusionEngine::with_patterns(&["*.tmp".to_string()], &[]);
        let (jobs, metrics) = expand(dir.path(), &mapping("docs", "out"), &engine);
        let paths: Vec<_> = jobs.iter().map(|j| j.dest_path.as_str()).collect();
        assert_eq!(paths, vec!["out/keep.md"]);
        assert_eq!(metrics.files_discovered, 2);
        assert_eq!(metrics.files_processed, 1);
    }

    #[test]
    fn include_only_allow_list_excludes_everything_else() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "docs/keep.rs", "keep");
        write(dir.path(), "docs/skip.md", "skip");

        let engine = ExclusionEngine::with_patterns(&[], &["*.rs".to_string()]);
        let (jobs, _) = expand(dir.path(), &mapping("docs", "out"), &engine);
        let paths: Vec<_> = jobs.iter().map(|j| j.dest_path.as_str()).collect();
        assert_eq!(paths, vec!["out/keep.rs"]);
    }

    #[test]
    fn missing_source_directory_returns_empty_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ExclusionEngine::new();
        let (jobs, metrics) = expand(dir.path(), &mapping("missing", "out"), &engine);
        assert!(jobs.is_empty());
        assert_eq!(metrics.files_discovered, 0);
    }

    #[test]
    fn per_mapping_transform_is_attached_to_every_job() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "docs/a.md", "a");

        let mut m = mapping("docs", "out");
        m.transform = Some(Transform {
            repo_name: true,
            variables: Default::default(),
        });
        let engine = ExclusionEngine::new();
        let (jobs, _) = expand(dir.path(), &m, &engine);
        assert!(jobs[0].transform.repo_name);
    }

    #[test]
    fn file_index_and_total_files_are_populated() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "docs/a.md", "a");
        write(dir.path(), "docs/b.md", "b");

        let engine = ExclusionEngine::new();
        let (jobs, _) = expand(dir.path(), &mapping("docs", "out"), &engine);
        assert_eq!(jobs.len(), 2);
        for job in &jobs {
            assert_eq!(job.total_files, 2);
        }
        let mut indices: Vec<_> = jobs.iter().map(|j| j.file_index).collect();
        indices.sort();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn binary_content_is_counted_and_not_fed_to_the_transform() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs/app.bin");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, [0x00, 0x01, 0x02, 0x03]).unwrap();

        let engine = ExclusionEngine::new();
        let (jobs, metrics) = expand(dir.path(), &mapping("docs", "out"), &engine);
        assert_eq!(jobs.len(), 1);
        assert_eq!(metrics.binary_files_skipped, 1);
        assert_eq!(metrics.binary_bytes_skipped, 4);
        assert_eq!(metrics.transform_successes, 0);
        assert_eq!(metrics.transform_errors, 0);
    }
}
