use std::collections::BTreeMap;
use std::sync::Arc;

use bcast_core::config::{Group, TargetConfig};
use bcast_core::{SourceState, TargetState, TargetStatus};
use bcast_hub::{HubClient, HubError};
use chrono::Utc;

#[derive(Debug, thiserror::Error)]
pub enum DiscoverError {
    #[error("discovering source state for {repo}@{branch}: {source}")]
    Source {
        repo: String,
        branch: String,
        #[source]
        source: HubError,
    },
}

/// One group's discovered state: the source's current HEAD plus a status
/// per target. Acquired once per `executeSingleGroup` invocation.
#[derive(Debug, Clone)]
pub struct SyncState {
    pub source: SourceState,
    pub targets: BTreeMap<String, TargetState>,
}

/// `DiscoverState(ctx, config) -> State` from §6. The core never requires a
/// persisted last-sync-commit store: the default discoverer infers
/// `pending-PR` from an existing open sync PR and otherwise conservatively
/// reports `behind`.
pub trait StateDiscoverer: Send + Sync {
    fn discover(&self, group: &Group) -> Result<SyncState, DiscoverError>;
}

pub struct GitStateDiscoverer {
    hub: Arc<dyn HubClient>,
}

impl GitStateDiscoverer {
    pub fn new(hub: Arc<dyn HubClient>) -> Self {
        Self { hub }
    }

    fn target_status(&self, branch_prefix: &str, target: &TargetConfig) -> TargetStatus {
        match self.hub.list_prs(&target.repo, branch_prefix) {
            Ok(prs) if !prs.is_empty() => TargetStatus::PendingPr,
            _ => TargetStatus::Behind,
        }
    }
}

impl StateDiscoverer for GitStateDiscoverer {
    fn discover(&self, group: &Group) -> Result<SyncState, DiscoverError> {
        let branch = self
            .hub
            .get_branch(&group.source.repo, &group.source.branch)
            .map_err(|source| DiscoverError::Source {
                repo: group.source.repo.clone(),
                branch: group.source.branch.clone(),
                source,
            })?;

        let source = SourceState {
            repo: group.source.repo.clone(),
            branch: group.source.branch.clone(),
            latest_commit: branch.commit_sha,
            discovered_at: Utc::now(),
        };

        let targets = group
            .targets
            .iter()
            .map(|target| {
                let status = self.target_status(&group.defaults.branch_prefix, target);
                (
                    target.repo.clone(),
                    TargetState {
                        repo: target.repo.clone(),
                        last_sync_commit: None,
                        status,
                    },
                )
            })
            .collect();

        Ok(SyncState { source, targets })
    }
}

/// The sync-necessity filter from §4.8.
pub fn needs_sync(status: TargetStatus, force: bool, update_existing_prs: bool) -> bool {
    match status {
        TargetStatus::UpToDate => force,
        TargetStatus::Behind => true,
        TargetStatus::PendingPr => update_existing_prs,
        TargetStatus::Conflict => false,
    }
}
