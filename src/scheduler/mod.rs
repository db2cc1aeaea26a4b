//! Dependency scheduling: graph construction, cycle detection, ordered
//! parallel waves under a pluggable strategy, and conflict-aware partitioning
//! so co-scheduled tasks never share an extracted file.

pub mod conflicts;
pub mod graph;
pub mod strategies;

pub use conflicts::ConflictDetector;
pub use graph::{DependencyGraph, Task, TaskId};
pub use strategies::OrderingStrategy;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<TaskId> },

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("duplicate task id '{0}'")]
    DuplicateTask(TaskId),
}

/// Tunable scheduling policy. Keyword and extraction tables are configuration
/// rather than hardcoded branches so deployments can adjust them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Description keywords that mark a task as foundation work under
    /// `OrderingStrategy::FoundationFirst`.
    pub foundation_keywords: Vec<String>,
    /// Inline markers that explicitly name a file in a description.
    pub file_markers: Vec<String>,
    /// Extensions treated as source files during conflict extraction.
    pub source_extensions: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            foundation_keywords: ["schema", "core", "base", "init", "setup", "config"]
                .map(String::from)
                .to_vec(),
            file_markers: ["file", "path", "location"].map(String::from).to_vec(),
            source_extensions: [
                "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "c", "h", "cpp", "rb",
                "sql", "toml", "yaml", "yml", "json", "md", "sh",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

/// One batch of tasks eligible to start together once all earlier groups are
/// done. A single-task group is sequential; larger groups are parallel and
/// hold pairwise-disjoint extracted file sets after conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionGroup {
    pub index: usize,
    pub task_ids: Vec<TaskId>,
}

impl ExecutionGroup {
    pub fn is_parallel(&self) -> bool {
        self.task_ids.len() > 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStats {
    pub total_tasks: usize,
    pub total_groups: usize,
    pub parallel_groups: usize,
    /// Number of sequential stages, i.e. the plan's critical-path length.
    pub critical_path_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub groups: Vec<ExecutionGroup>,
    pub rationale: String,
    pub stats: PlanStats,
}

/// Turns a task set into a safe, maximally-parallel execution plan.
pub struct Scheduler {
    config: SchedulerConfig,
    detector: ConflictDetector,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let detector = ConflictDetector::new(&config);
        Self { config, detector }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Produce ordered execution groups for `tasks` under `strategy`.
    ///
    /// Fails with `SchedulerError::Cycle` before any ordering work if the
    /// induced graph is cyclic; a violated graph is never partially ordered.
    /// With `resolve_conflicts`, every wave is further partitioned so that no
    /// two co-scheduled tasks share an extracted file.
    pub fn order(
        &self,
        tasks: &[Task],
        strategy: OrderingStrategy,
        resolve_conflicts: bool,
    ) -> Result<ExecutionPlan, SchedulerError> {
        let graph = DependencyGraph::build(tasks)?;
        graph.ensure_acyclic()?;

        let waves = match strategy {
            OrderingStrategy::Topological | OrderingStrategy::ParallelMaximizing => {
                strategies::topological_waves(&graph)
            }
            OrderingStrategy::PriorityFirst => strategies::priority_waves(tasks, &graph),
            OrderingStrategy::FoundationFirst => {
                strategies::foundation_waves(tasks, &graph, &self.config.foundation_keywords)
            }
        };

        let files: HashMap<TaskId, BTreeSet<String>> = tasks
            .iter()
            .map(|t| (t.id.clone(), self.detector.extract_files(t)))
            .collect();
        let depths = graph.depths();

        let mut groups = Vec::new();
        for wave in waves {
            let sub_groups = if resolve_conflicts {
                self.detector.partition(&wave, &files)
            } else {
                vec![wave]
            };
            for mut sub in sub_groups {
                if sub.is_empty() {
                    continue;
                }
                // Front-load probable critical-path work: deepest tasks first,
                // original order among equals.
                sub.sort_by_key(|id| {
                    std::cmp::Reverse(depths.get(id).copied().unwrap_or(0))
                });
                groups.push(ExecutionGroup {
                    index: groups.len(),
                    task_ids: sub,
                });
            }
        }

        let stats = PlanStats {
            total_tasks: tasks.len(),
            total_groups: groups.len(),
            parallel_groups: groups.iter().filter(|g| g.is_parallel()).count(),
            critical_path_len: groups.len(),
        };

        info!(
            strategy = ?strategy,
            total_tasks = stats.total_tasks,
            total_groups = stats.total_groups,
            parallel_groups = stats.parallel_groups,
            "built execution plan"
        );

        Ok(ExecutionPlan {
            groups,
            rationale: strategy.rationale().to_string(),
            stats,
        })
    }
}
