use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use super::graph::{DependencyGraph, Task, TaskId};

/// How a task set is turned into ordered parallel waves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingStrategy {
    /// Kahn's algorithm: each wave is every currently dependency-free task.
    Topological,
    /// Ascending priority buckets, readiness waves inside each bucket.
    PriorityFirst,
    /// Topological waves with foundation-keyword tasks pulled into an
    /// earlier pass than their topologically-tied peers.
    FoundationFirst,
    /// Alias of `Topological`, which already maximizes per-wave width.
    ParallelMaximizing,
}

impl OrderingStrategy {
    pub fn rationale(&self) -> &'static str {
        match self {
            Self::Topological => {
                "Kahn waves: every dependency-free task starts together, maximizing width per level"
            }
            Self::PriorityFirst => {
                "ascending priority buckets; inside a bucket a task waits for its same-or-higher-priority dependencies"
            }
            Self::FoundationFirst => {
                "topological waves with foundation work (schema/core/base/init/setup/config) emitted first among ties"
            }
            Self::ParallelMaximizing => {
                "topological ordering, which is already the widest conflict-free schedule"
            }
        }
    }
}

/// Kahn wave construction. Assumes the graph was already validated acyclic;
/// every wave contains only mutually independent tasks.
pub(crate) fn topological_waves(graph: &DependencyGraph) -> Vec<Vec<TaskId>> {
    let mut remaining = graph.in_degrees();
    let mut pending: Vec<TaskId> = graph.node_ids().to_vec();
    let mut waves = Vec::new();

    while !pending.is_empty() {
        let wave: Vec<TaskId> = pending
            .iter()
            .filter(|id| remaining.get(*id).copied().unwrap_or(0) == 0)
            .cloned()
            .collect();
        if wave.is_empty() {
            // Unreachable on a validated graph; bail out rather than spin.
            break;
        }
        let emitted: HashSet<&TaskId> = wave.iter().collect();
        for id in &wave {
            for dependent in graph.dependents_of(id) {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count = count.saturating_sub(1);
                }
            }
        }
        pending.retain(|id| !emitted.contains(id));
        waves.push(wave);
    }

    waves
}

/// Priority-first waves: buckets by ascending priority number; within a
/// bucket a task becomes ready once all its dependencies at or above its own
/// priority have been processed. Lower-priority dependencies do not gate the
/// bucket, so strict dependency ordering is not guaranteed by this strategy.
pub(crate) fn priority_waves(tasks: &[Task], graph: &DependencyGraph) -> Vec<Vec<TaskId>> {
    let priority: HashMap<&TaskId, u8> = tasks.iter().map(|t| (&t.id, t.priority)).collect();
    let mut processed: HashSet<TaskId> = HashSet::new();
    let mut waves = Vec::new();

    for level in 0u8..=4 {
        let mut bucket: Vec<TaskId> = tasks
            .iter()
            .filter(|t| t.priority == level)
            .map(|t| t.id.clone())
            .collect();

        while !bucket.is_empty() {
            let wave: Vec<TaskId> = bucket
                .iter()
                .filter(|id| {
                    graph.dependencies_of(id).iter().all(|dep| {
                        priority.get(dep).copied().unwrap_or(0) > level
                            || processed.contains(dep)
                    })
                })
                .cloned()
                .collect();

            // A validated graph always makes progress inside a bucket; flush
            // anything left rather than loop forever.
            let wave = if wave.is_empty() { bucket.clone() } else { wave };

            for id in &wave {
                processed.insert(id.clone());
            }
            let emitted: HashSet<&TaskId> = wave.iter().collect();
            bucket.retain(|id| !emitted.contains(id));
            waves.push(wave);
        }
    }

    waves
}

/// Foundation-first: topological waves, each split so tasks whose description
/// matches a foundation keyword run in an earlier pass than non-matching tasks
/// they were topologically tied with. Splitting a Kahn wave cannot violate
/// dependency order because tasks inside one wave are mutually independent.
pub(crate) fn foundation_waves(
    tasks: &[Task],
    graph: &DependencyGraph,
    keywords: &[String],
) -> Vec<Vec<TaskId>> {
    let description: HashMap<&TaskId, String> = tasks
        .iter()
        .map(|t| (&t.id, t.description.to_lowercase()))
        .collect();
    let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

    let mut waves = Vec::new();
    for wave in topological_waves(graph) {
        let (foundation, rest): (Vec<TaskId>, Vec<TaskId>) = wave.into_iter().partition(|id| {
            description
                .get(id)
                .map(|d| keywords.iter().any(|k| d.contains(k)))
                .unwrap_or(false)
        });
        if !foundation.is_empty() {
            waves.push(foundation);
        }
        if !rest.is_empty() {
            waves.push(rest);
        }
    }
    waves
}
