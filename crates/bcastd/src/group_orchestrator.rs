use std::collections::BTreeMap;

use bcast_core::config::Group;
use bcast_core::{Results, SyncError};

use crate::dependency_resolver::{resolve_order, GroupNode};
use crate::options::Options;

#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub group_id: String,
    pub results: Results,
    pub failed: bool,
    pub skip_reason: Option<String>,
}

/// Runs enabled, filter-passing groups in dependency order, one group at a
/// time. `execute_group` is an injectable slot: production wires it to
/// `Engine::execute_single_group`, tests substitute a fake.
pub struct GroupOrchestrator<F>
where
    F: Fn(&Group) -> Result<Results, SyncError>,
{
    execute_group: F,
}

impl<F> GroupOrchestrator<F>
where
    F: Fn(&Group) -> Result<Results, SyncError>,
{
    pub fn new(execute_group: F) -> Self {
        Self { execute_group }
    }

    /// Returns one outcome per group (skipped, failed, or run), in the
    /// order the groups actually executed. Only dependency-graph errors
    /// (missing dependency, cycle) short-circuit before any group runs;
    /// aggregate per-group failures with `aggregate_failures`.
    pub fn orchestrate(&self, groups: &[Group], options: &Options) -> Result<Vec<GroupOutcome>, SyncError> {
        let nodes: Vec<GroupNode> = groups
            .iter()
            .map(|g| GroupNode {
                id: g.id.clone(),
                priority: g.priority,
                depends_on: g.depends_on.clone(),
            })
            .collect();
        let order = resolve_order(&nodes)?;

        let by_id: BTreeMap<&str, &Group> = groups.iter().map(|g| (g.id.as_str(), g)).collect();
        let mut outcomes = Vec::with_capacity(order.len());
        let mut failed_ids: Vec<String> = Vec::new();

        for id in order {
            let group = by_id[id.as_str()];

            if !group.is_enabled() || !options.group_passes_filter(&group.id, &group.name) {
                outcomes.push(GroupOutcome {
                    group_id: group.id.clone(),
                    results: Results::default(),
                    failed: false,
                    skip_reason: Some("disabled or filtered".to_string()),
                });
                continue;
            }

            if group.depends_on.iter().any(|dep| failed_ids.iter().any(|f| f == dep)) {
                failed_ids.push(group.id.clone());
                outcomes.push(GroupOutcome {
                    group_id: group.id.clone(),
                    results: Results::default(),
                    failed: true,
                    skip_reason: Some("Dependencies failed".to_string()),
                });
                continue;
            }

            match (self.execute_group)(group) {
                Ok(results) => outcomes.push(GroupOutcome {
                    group_id: group.id.clone(),
                    failed: results.failed > 0,
                    results,
                    skip_reason: None,
                }),
                Err(err) => {
                    failed_ids.push(group.id.clone());
                    let mut errors = BTreeMap::new();
                    errors.insert(group.id.clone(), err.to_string());
                    outcomes.push(GroupOutcome {
                        group_id: group.id.clone(),
                        results: Results {
                            errors,
                            ..Results::default()
                        },
                        failed: true,
                        skip_reason: None,
                    });
                }
            }
        }

        Ok(outcomes)
    }
}

/// Roll per-group outcomes up into a single terminal error, or `Ok(())` if
/// every group that ran succeeded.
pub fn aggregate_failures(outcomes: &[GroupOutcome]) -> Result<(), SyncError> {
    let failed_groups: Vec<String> = outcomes
        .iter()
        .filter(|o| o.failed)
        .map(|o| o.group_id.clone())
        .collect();
    if failed_groups.is_empty() {
        Ok(())
    } else {
        Err(SyncError::OrchestrationFailures { failed_groups })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcast_core::config::{GroupDefaults, SourceConfig};
    use std::sync::Mutex;

    fn group(id: &str, priority: i32, deps: &[&str]) -> Group {
        Group {
            id: id.to_string(),
            name: format!("group {id}"),
            priority,
            enabled: None,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            source: SourceConfig {
                repo: "org/template".into(),
                branch: "main".into(),
            },
            targets: vec![],
            defaults: GroupDefaults::default(),
        }
    }

    #[test]
    fn independent_groups_all_run_in_dependency_order() {
        let groups = vec![group("g2", 0, &["g1"]), group("g1", 0, &[])];
        let ran = Mutex::new(Vec::new());
        let orchestrator = GroupOrchestrator::new(|g| {
            ran.lock().unwrap().push(g.id.clone());
            Ok(Results::default())
        });
        let outcomes = orchestrator.orchestrate(&groups, &Options::default()).unwrap();
        assert_eq!(*ran.lock().unwrap(), vec!["g1", "g2"]);
        assert!(outcomes.iter().all(|o| !o.failed));
    }

    #[test]
    fn a_failed_group_skips_its_dependents_with_a_reason() {
        let groups = vec![group("g1", 0, &[]), group("g2", 0, &["g1"])];
        let orchestrator = GroupOrchestrator::new(|g| {
            if g.id == "g1" {
                Err(SyncError::NoMatchingTargets)
            } else {
                Ok(Results::default())
            }
        });
        let outcomes = orchestrator.orchestrate(&groups, &Options::default()).unwrap();
        let g2 = outcomes.iter().find(|o| o.group_id == "g2").unwrap();
        assert!(g2.failed);
        assert_eq!(g2.skip_reason.as_deref(), Some("Dependencies failed"));

        let err = aggregate_failures(&outcomes).unwrap_err();
        match err {
            SyncError::OrchestrationFailures { failed_groups } => {
                assert!(failed_groups.contains(&"g1".to_string()));
                assert!(failed_groups.contains(&"g2".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn disabled_group_is_skipped_without_failing_the_run() {
        let mut disabled = group("g1", 0, &[]);
        disabled.enabled = Some(false);
        let groups = vec![disabled];
        let orchestrator = GroupOrchestrator::new(|_| panic!("disabled group must not execute"));
        let outcomes = orchestrator.orchestrate(&groups, &Options::default()).unwrap();
        assert!(!outcomes[0].failed);
        assert_eq!(outcomes[0].skip_reason.as_deref(), Some("disabled or filtered"));
        assert!(aggregate_failures(&outcomes).is_ok());
    }

    #[test]
    fn group_filter_excludes_non_matching_groups() {
        let groups = vec![group("g1", 0, &[]), group("g2", 0, &[])];
        let mut options = Options::default();
        options.group_filter = vec!["g1".to_string()];
        let ran = Mutex::new(Vec::new());
        let orchestrator = GroupOrchestrator::new(|g| {
            ran.lock().unwrap().push(g.id.clone());
            Ok(Results::default())
        });
        orchestrator.orchestrate(&groups, &options).unwrap();
        assert_eq!(*ran.lock().unwrap(), vec!["g1"]);
    }

    #[test]
    fn cyclic_groups_abort_before_any_execution() {
        let groups = vec![group("g1", 0, &["g2"]), group("g2", 0, &["g1"])];
        let orchestrator = GroupOrchestrator::new(|_| panic!("must not execute with a cycle present"));
        let err = orchestrator.orchestrate(&groups, &Options::default()).unwrap_err();
        assert!(matches!(err, SyncError::CircularDependency { .. }));
    }
}
