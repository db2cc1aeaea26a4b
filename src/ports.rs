//! Narrow ports for the external collaborators the core drives but does not
//! own: the task tracker, the opaque executor that performs the actual work,
//! the test-suite gate, and the context-refresh call. Injecting these keeps
//! the scheduler/coordinator/recovery logic testable with fakes.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::scheduler::Task;

/// Terminal-or-not status an executor reports for a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

/// Read-only view of the external task tracker.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Ids of this task's dependencies that are still open in the tracker.
    async fn open_dependencies(&self, task_id: &str) -> Result<Vec<String>>;

    /// Close the tracking issue for a completed task.
    async fn close_task(&self, task_id: &str) -> Result<()>;
}

/// The opaque capability that actually performs a task (an AI coding agent, a
/// shell command, a test runner). Poll-based: `dispatch` starts the work and
/// `poll` eventually observes a terminal status.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn dispatch(&self, task_id: &str, executor: &str, instructions: &str) -> Result<()>;

    async fn poll(&self, task_id: &str) -> Result<ExecutionStatus>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub passed: bool,
    pub summary: String,
}

/// Post-execution quality gate.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(&self) -> Result<TestOutcome>;
}

/// External "resummarize shared context" call made before a parallel group.
/// The coordinator bounds it with its own timeout; failure is recorded, never
/// fatal.
#[async_trait]
pub trait ContextRefresher: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}

/// External policy that picks an executor identity for a task. Policy data
/// the coordinator merely consults; the heuristics behind it are not part of
/// the core.
pub trait ExecutorPolicy: Send + Sync {
    fn executor_for(&self, task: &Task) -> String;
}

/// Fixed-identity policy, useful as a default and in tests.
#[derive(Debug, Clone)]
pub struct SingleExecutor(pub String);

impl ExecutorPolicy for SingleExecutor {
    fn executor_for(&self, _task: &Task) -> String {
        self.0.clone()
    }
}
