use std::collections::{BTreeMap, BTreeSet, HashMap};

use bcast_core::SyncError;

/// The graph is walked, not stored with pointer cycles: `{id -> depends_on
/// ids}` plus an id-keyed side table, never a struct holding its own
/// dependency references.
#[derive(Debug, Clone)]
pub struct GroupNode {
    pub id: String,
    pub priority: i32,
    pub depends_on: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    Visiting,
    Visited,
}

/// Validate dependencies, detect cycles, and return ids in a topological
/// order with `(priority, id)` tie-breaking among groups whose dependencies
/// are all satisfied at the same wave.
pub fn resolve_order(groups: &[GroupNode]) -> Result<Vec<String>, SyncError> {
    let by_id: HashMap<&str, &GroupNode> =
        groups.iter().map(|g| (g.id.as_str(), g)).collect();

    for group in groups {
        for dep in &group.depends_on {
            if !by_id.contains_key(dep.as_str()) {
                return Err(SyncError::NonExistentDependency {
                    group: group.id.clone(),
                    missing: dep.clone(),
                });
            }
        }
    }

    if let Some(cycle) = find_cycle(groups, &by_id) {
        return Err(SyncError::CircularDependency {
            cycle: cycle.join(" -> "),
        });
    }

    let mut in_degree: BTreeMap<&str, usize> = groups
        .iter()
        .map(|g| (g.id.as_str(), g.depends_on.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for group in groups {
        for dep in &group.depends_on {
            dependents.entry(dep.as_str()).or_default().push(&group.id);
        }
    }

    let mut ready: Vec<&GroupNode> = groups
        .iter()
        .filter(|g| in_degree[g.id.as_str()] == 0)
        .collect();
    sort_ready(&mut ready);

    let mut result = Vec::with_capacity(groups.len());
    while let Some(next) = ready.first().copied() {
        ready.remove(0);
        result.push(next.id.clone());

        if let Some(children) = dependents.get(next.id.as_str()) {
            for child_id in children {
                let degree = in_degree.get_mut(child_id).expect("child must be known");
                *degree -= 1;
                if *degree == 0 {
                    ready.push(by_id[child_id]);
                }
            }
        }
        sort_ready(&mut ready);
    }

    if result.len() != groups.len() {
        // Unreachable given the cycle check above; kept as a defensive
        // logic-error guard per the documented contract.
        return Err(SyncError::TopologicalSortFailed {
            processed: result.len(),
            total: groups.len(),
        });
    }

    Ok(result)
}

fn sort_ready(ready: &mut [&GroupNode]) {
    ready.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
}

fn find_cycle(groups: &[GroupNode], by_id: &HashMap<&str, &GroupNode>) -> Option<Vec<String>> {
    let mut colors: HashMap<&str, Color> =
        groups.iter().map(|g| (g.id.as_str(), Color::Unvisited)).collect();
    let mut path: Vec<&str> = Vec::new();

    for group in groups {
        if colors[group.id.as_str()] == Color::Unvisited {
            if let Some(cycle) = visit(&group.id, by_id, &mut colors, &mut path) {
                return Some(cycle.into_iter().map(|s| s.to_string()).collect());
            }
        }
    }
    None
}

fn visit<'a>(
    id: &'a str,
    by_id: &HashMap<&'a str, &'a GroupNode>,
    colors: &mut HashMap<&'a str, Color>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<&'a str>> {
    colors.insert(id, Color::Visiting);
    path.push(id);

    let node = by_id[id];
    for dep in &node.depends_on {
        match colors.get(dep.as_str()) {
            Some(Color::Visiting) => {
                let start = path.iter().position(|p| *p == dep.as_str()).unwrap_or(0);
                let mut cycle: Vec<&str> = path[start..].to_vec();
                cycle.push(dep.as_str());
                return Some(cycle);
            }
            Some(Color::Visited) => continue,
            _ => {
                if let Some(cycle) = visit(dep.as_str(), by_id, colors, path) {
                    return Some(cycle);
                }
            }
        }
    }

    path.pop();
    colors.insert(id, Color::Visited);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, priority: i32, deps: &[&str]) -> GroupNode {
        GroupNode {
            id: id.to_string(),
            priority,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn linear_chain_ignores_priority_and_follows_dependencies() {
        let groups = vec![
            node("g3", 1, &["g2"]),
            node("g2", 2, &["g1"]),
            node("g1", 3, &[]),
        ];
        let order = resolve_order(&groups).unwrap();
        assert_eq!(order, vec!["g1", "g2", "g3"]);
    }

    #[test]
    fn diamond_puts_shared_dependency_first_and_join_last() {
        let groups = vec![
            node("g1", 0, &[]),
            node("g2", 0, &["g1"]),
            node("g3", 0, &["g1"]),
            node("g4", 0, &["g2", "g3"]),
        ];
        let order = resolve_order(&groups).unwrap();
        assert_eq!(order.first().unwrap(), "g1");
        assert_eq!(order.last().unwrap(), "g4");
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn non_existent_dependency_is_reported_with_offender_and_missing_id() {
        let groups = vec![node("g1", 0, &["missing"])];
        let err = resolve_order(&groups).unwrap_err();
        match err {
            SyncError::NonExistentDependency { group, missing } => {
                assert_eq!(group, "g1");
                assert_eq!(missing, "missing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn circular_dependency_is_detected() {
        let groups = vec![node("g1", 0, &["g2"]), node("g2", 0, &["g1"])];
        let err = resolve_order(&groups).unwrap_err();
        assert!(matches!(err, SyncError::CircularDependency { .. }));
    }

    #[test]
    fn same_wave_ties_break_by_priority_then_id() {
        let groups = vec![node("b", 5, &[]), node("a", 5, &[]), node("c", 1, &[])];
        let order = resolve_order(&groups).unwrap();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn every_dependency_appears_at_a_strictly_smaller_index() {
        let groups = vec![
            node("g1", 0, &[]),
            node("g2", 0, &["g1"]),
            node("g3", 0, &["g1"]),
            node("g4", 0, &["g2", "g3"]),
        ];
        let order = resolve_order(&groups).unwrap();
        let index_of = |id: &str| order.iter().position(|g| g == id).unwrap();
        for group in &groups {
            for dep in &group.depends_on {
                assert!(index_of(dep) < index_of(&group.id));
            }
        }
    }

    #[test]
    fn resolve_returns_exactly_the_input_count() {
        let groups = vec![node("g1", 0, &[]), node("g2", 0, &["g1"])];
        let order = resolve_order(&groups).unwrap();
        assert_eq!(order.len(), groups.len());
    }
}
