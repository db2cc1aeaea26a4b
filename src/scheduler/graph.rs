use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

use super::SchedulerError;

pub type TaskId = String;

/// A single unit of work enumerated by an external task source.
///
/// Immutable during one scheduling pass. `files` holds explicitly known file
/// paths; the scheduler unions these with paths extracted from the description
/// when partitioning groups for conflicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub depends_on: Vec<TaskId>,
    /// 0 = highest priority .. 4 = lowest. Out-of-range input is clamped on
    /// construction and on deserialization.
    #[serde(deserialize_with = "clamp_priority")]
    pub priority: u8,
    #[serde(default)]
    pub files: BTreeSet<String>,
}

fn clamp_priority<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = u8::deserialize(deserializer)?;
    Ok(raw.min(4))
}

impl Task {
    pub fn new(
        id: impl Into<TaskId>,
        description: impl Into<String>,
        depends_on: Vec<TaskId>,
        priority: u8,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            depends_on,
            priority: priority.min(4),
            files: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitColor {
    White,
    Gray,
    Black,
}

enum VisitFrame {
    Enter(TaskId),
    Exit(TaskId),
}

/// Directed dependency graph: edges run dependency -> dependent.
///
/// Invariant: a graph that fails `ensure_acyclic` is never partially ordered.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<TaskId>,
    dependents: HashMap<TaskId, Vec<TaskId>>,
    dependencies: HashMap<TaskId, Vec<TaskId>>,
    in_degree: HashMap<TaskId, usize>,
}

impl DependencyGraph {
    /// Build the graph from a task set, rejecting duplicate ids and edges to
    /// tasks that are not part of the set.
    pub fn build(tasks: &[Task]) -> Result<Self, SchedulerError> {
        let mut nodes = Vec::with_capacity(tasks.len());
        let mut seen = HashSet::new();
        for task in tasks {
            if !seen.insert(task.id.clone()) {
                return Err(SchedulerError::DuplicateTask(task.id.clone()));
            }
            nodes.push(task.id.clone());
        }

        let mut dependents: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        let mut dependencies: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        let mut in_degree: HashMap<TaskId, usize> = HashMap::new();
        for id in &nodes {
            dependents.insert(id.clone(), Vec::new());
            dependencies.insert(id.clone(), Vec::new());
            in_degree.insert(id.clone(), 0);
        }

        for task in tasks {
            let mut deduped = HashSet::new();
            for dep in &task.depends_on {
                if !seen.contains(dep) {
                    return Err(SchedulerError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                if dep == &task.id {
                    return Err(SchedulerError::Cycle {
                        path: vec![task.id.clone(), task.id.clone()],
                    });
                }
                if !deduped.insert(dep.clone()) {
                    continue;
                }
                if let Some(list) = dependents.get_mut(dep) {
                    list.push(task.id.clone());
                }
                if let Some(list) = dependencies.get_mut(&task.id) {
                    list.push(dep.clone());
                }
                if let Some(count) = in_degree.get_mut(&task.id) {
                    *count += 1;
                }
            }
        }

        Ok(Self {
            nodes,
            dependents,
            dependencies,
            in_degree,
        })
    }

    pub fn node_ids(&self) -> &[TaskId] {
        &self.nodes
    }

    pub fn dependents_of(&self, id: &str) -> &[TaskId] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependencies_of(&self, id: &str) -> &[TaskId] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn in_degrees(&self) -> HashMap<TaskId, usize> {
        self.in_degree.clone()
    }

    /// Cycle detection with an iterative DFS. An explicit frame stack bounds
    /// memory on large graphs where native recursion would overflow.
    pub fn ensure_acyclic(&self) -> Result<(), SchedulerError> {
        let mut color: HashMap<&TaskId, VisitColor> = self
            .nodes
            .iter()
            .map(|id| (id, VisitColor::White))
            .collect();
        let mut stack: Vec<VisitFrame> = Vec::new();
        let mut path: Vec<TaskId> = Vec::new();

        for start in &self.nodes {
            if color.get(start) != Some(&VisitColor::White) {
                continue;
            }
            stack.push(VisitFrame::Enter(start.clone()));

            while let Some(frame) = stack.pop() {
                match frame {
                    VisitFrame::Enter(id) => {
                        match color.get(&id) {
                            Some(VisitColor::White) => {}
                            _ => continue,
                        }
                        if let Some(c) = color.get_mut(&id) {
                            *c = VisitColor::Gray;
                        }
                        path.push(id.clone());
                        stack.push(VisitFrame::Exit(id.clone()));
                        for next in self.dependents_of(&id) {
                            match color.get(next) {
                                Some(VisitColor::Gray) => {
                                    // Back edge: slice the current path into a
                                    // readable cycle description.
                                    let pos = path
                                        .iter()
                                        .position(|p| p == next)
                                        .unwrap_or(0);
                                    let mut cycle: Vec<TaskId> = path[pos..].to_vec();
                                    cycle.push(next.clone());
                                    return Err(SchedulerError::Cycle { path: cycle });
                                }
                                Some(VisitColor::White) => {
                                    stack.push(VisitFrame::Enter(next.clone()));
                                }
                                _ => {}
                            }
                        }
                    }
                    VisitFrame::Exit(id) => {
                        if let Some(c) = color.get_mut(&id) {
                            *c = VisitColor::Black;
                        }
                        path.pop();
                    }
                }
            }
        }

        Ok(())
    }

    /// Longest-path depth from any dependency-free node, as a dynamic program
    /// over a topological order. Callers use this to front-load likely
    /// critical-path tasks inside a parallel sub-group.
    pub fn depths(&self) -> HashMap<TaskId, usize> {
        let mut depth: HashMap<TaskId, usize> =
            self.nodes.iter().map(|id| (id.clone(), 0)).collect();
        let mut remaining = self.in_degree.clone();
        let mut ready: Vec<TaskId> = self
            .nodes
            .iter()
            .filter(|id| remaining.get(*id).copied().unwrap_or(0) == 0)
            .cloned()
            .collect();

        while let Some(id) = ready.pop() {
            let base = depth.get(&id).copied().unwrap_or(0);
            for next in self.dependents_of(&id).to_vec() {
                let entry = depth.entry(next.clone()).or_insert(0);
                *entry = (*entry).max(base + 1);
                if let Some(count) = remaining.get_mut(&next) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(next);
                    }
                }
            }
        }

        depth
    }
}
