use std::time::Duration;

/// The recognized run options from §6, owned by the caller (CLI or embedder)
/// and consumed throughout `Engine`/`GroupOrchestrator`/`RepositorySync`.
#[derive(Debug, Clone)]
pub struct Options {
    pub dry_run: bool,
    pub force: bool,
    max_concurrency: usize,
    pub update_existing_prs: bool,
    pub timeout: Duration,
    pub cleanup_temp_files: bool,
    pub group_filter: Vec<String>,
    pub skip_groups: Vec<String>,
    pub automerge: bool,
    pub automerge_labels: Vec<String>,
    pub ai_enabled: bool,
    pub ai_pr_enabled: bool,
    pub ai_commit_enabled: bool,
    pub clear_module_cache: bool,
    pub target_filter: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dry_run: false,
            force: false,
            max_concurrency: 5,
            update_existing_prs: false,
            timeout: Duration::from_secs(600),
            cleanup_temp_files: true,
            group_filter: Vec::new(),
            skip_groups: Vec::new(),
            automerge: false,
            automerge_labels: Vec::new(),
            ai_enabled: false,
            ai_pr_enabled: false,
            ai_commit_enabled: false,
            clear_module_cache: false,
            target_filter: Vec::new(),
        }
    }
}

impl Options {
    /// `MaxConcurrency` of 0 or negative coerces to 1, never to zero workers.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }

    pub fn set_max_concurrency(&mut self, value: i64) {
        self.max_concurrency = if value < 1 { 1 } else { value as usize };
    }

    /// Skip is applied first; then, if non-empty, the allow-list filters
    /// what remains. Both lists accept a group name or id, case-sensitive.
    pub fn group_passes_filter(&self, id: &str, name: &str) -> bool {
        let matches = |list: &[String]| list.iter().any(|entry| entry == id || entry == name);
        if matches(&self.skip_groups) {
            return false;
        }
        if self.group_filter.is_empty() {
            return true;
        }
        matches(&self.group_filter)
    }
}
