use super::FeatureOrchestrator;
use crate::config::StartupOrdering;
use crate::error::{Result, WardenError};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// What startup ordering needs to know about one feature
#[derive(Debug, Clone)]
pub(super) struct StartNode {
    pub(super) id: String,
    pub(super) priority: i32,
    pub(super) dependencies: Vec<String>,
}

impl FeatureOrchestrator {
    /// Ids in the order `start_all` should try them
    pub(super) fn startup_order(&self) -> Result<Vec<String>> {
        let nodes: Vec<StartNode> = {
            let features = self.features.read();
            self.registration_order
                .read()
                .iter()
                .filter_map(|id| features.get(id))
                .map(|entry| StartNode {
                    id: entry.feature.id().to_string(),
                    priority: entry.feature.priority(),
                    dependencies: entry.feature.dependencies(),
                })
                .collect()
        };

        match self.config.orchestrator.startup_ordering {
            StartupOrdering::Topological => topological_order(&nodes),
            StartupOrdering::Priority => Ok(priority_order(&nodes)),
        }
    }
}

/// Ascending `(priority, dependency count)`, registration order on ties.
///
/// Does not guarantee dependencies come first.
pub(super) fn priority_order(nodes: &[StartNode]) -> Vec<String> {
    let mut sorted: Vec<&StartNode> = nodes.iter().collect();
    sorted.sort_by_key(|node| (node.priority, node.dependencies.len()));
    sorted.into_iter().map(|node| node.id.clone()).collect()
}

/// Kahn's algorithm over registered dependencies.
///
/// Among ready features the lowest `(priority, dependency count,
/// registration index)` goes first. Unregistered dependencies are ignored
/// here; `start_feature` reports them.
pub(super) fn topological_order(nodes: &[StartNode]) -> Result<Vec<String>> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(position, node)| (node.id.as_str(), position))
        .collect();

    let mut pending = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (position, node) in nodes.iter().enumerate() {
        let unique: HashSet<&str> = node.dependencies.iter().map(String::as_str).collect();
        for dependency in unique {
            if let Some(&upstream) = index.get(dependency) {
                pending[position] += 1;
                dependents[upstream].push(position);
            }
        }
    }

    let rank = |position: usize| {
        let node = &nodes[position];
        Reverse((node.priority, node.dependencies.len(), position))
    };

    let mut ready: BinaryHeap<Reverse<(i32, usize, usize)>> = pending
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(position, _)| rank(position))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse((_, _, position))) = ready.pop() {
        order.push(nodes[position].id.clone());
        for &dependent in &dependents[position] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.push(rank(dependent));
            }
        }
    }

    if order.len() < nodes.len() {
        return Err(WardenError::DependencyCycle {
            features: cycle_members(nodes, &pending, &dependents),
        });
    }

    Ok(order)
}

/// Narrow the unsorted remainder down to features on or between cycles by
/// peeling off those nothing else in the remainder depends on.
fn cycle_members(nodes: &[StartNode], pending: &[usize], dependents: &[Vec<usize>]) -> Vec<String> {
    let mut remaining: HashSet<usize> = pending
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(position, _)| position)
        .collect();

    loop {
        let leaves: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|position| {
                !dependents[*position]
                    .iter()
                    .any(|dependent| remaining.contains(dependent))
            })
            .collect();

        if leaves.is_empty() {
            break;
        }
        for leaf in leaves {
            remaining.remove(&leaf);
        }
    }

    let mut members: Vec<usize> = remaining.into_iter().collect();
    members.sort_unstable();
    members.into_iter().map(|position| nodes[position].id.clone()).collect()
}
