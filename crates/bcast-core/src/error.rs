use std::collections::BTreeMap;

/// Sentinel errors raised inside `BatchProcessor`; the collector discards
/// both and they are never user-visible.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum FileError {
    #[error("file not found: {path}")]
    NotFound { path: String },
    #[error("transform produced no change: {path}")]
    TransformNotFound { path: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no targets matched the configured filter")]
    NoMatchingTargets,

    #[error("branch '{branch}' already exists ({where_})")]
    BranchAlreadyExists {
        branch: String,
        where_: BranchLocation,
    },

    #[error("sync failed for {failed} of {total} targets: {excerpts:?}")]
    SyncFailed {
        failed: usize,
        total: usize,
        /// Up to three raw failure messages, for diagnostics.
        excerpts: Vec<String>,
        errors: BTreeMap<String, String>,
    },

    #[error("group '{group}' depends on non-existent group '{missing}'")]
    NonExistentDependency { group: String, missing: String },

    #[error("circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    #[error("topological sort failed: processed {processed} of {total} groups (unreachable after cycle check)")]
    TopologicalSortFailed { processed: usize, total: usize },

    #[error("group orchestration completed with failures: {failed_groups:?}")]
    OrchestrationFailures { failed_groups: Vec<String> },

    #[error("operation was cancelled")]
    Cancelled,

    #[error("operation exceeded its configured deadline")]
    DeadlineExceeded,

    #[error("{operation}: {source}")]
    Context {
        operation: String,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    pub fn wrap(self, operation: impl Into<String>) -> Self {
        SyncError::Context {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled | SyncError::DeadlineExceeded)
            || matches!(self, SyncError::Context { source, .. } if source.is_cancelled())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchLocation {
    Local,
    Remote,
}

impl std::fmt::Display for BranchLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchLocation::Local => write!(f, "local"),
            BranchLocation::Remote => write!(f, "remote"),
        }
    }
}
