//! Group execution coordination: drives each scheduled group through the
//! PRE_EXECUTION -> CONCURRENT_EXECUTION -> COORDINATION -> POST_EXECUTION
//! protocol, persisting the execution record after every phase transition,
//! checkpointing before resumable stops, and routing failures to the
//! recovery engine.

pub mod budget;

pub use budget::{BudgetTracker, ResourceBudget};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn, Instrument};

use crate::checkpoint::{CheckpointError, CheckpointManager, CheckpointType};
use crate::persistence::{GroupStore, PersistenceError};
use crate::ports::{ContextRefresher, ExecutionStatus, ExecutorPolicy, TaskExecutor, TaskSource, TestRunner};
use crate::recovery::{DetectedError, RecoveryContext, RecoveryEngine};
use crate::scheduler::{ExecutionGroup, ExecutionPlan, Task, TaskId};
use crate::telemetry::{create_group_span, generate_correlation_id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPhase {
    PreExecution,
    ConcurrentExecution,
    Coordination,
    PostExecution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl GroupStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub executor: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Durable record of one group's lifecycle, saved after every phase
/// transition. Terminal once Completed or Failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupExecutionRecord {
    pub group_id: String,
    pub group_name: String,
    pub phase: GroupPhase,
    pub status: GroupStatus,
    pub tasks: Vec<TaskId>,
    pub results: Vec<TaskResult>,
    pub errors: Vec<String>,
    pub pre_group_refresh_completed: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GroupExecutionRecord {
    pub fn new(group_id: impl Into<String>, group_name: impl Into<String>, tasks: Vec<TaskId>) -> Self {
        Self {
            group_id: group_id.into(),
            group_name: group_name.into(),
            phase: GroupPhase::PreExecution,
            status: GroupStatus::Pending,
            tasks,
            results: Vec::new(),
            errors: Vec::new(),
            pre_group_refresh_completed: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Bound on the pre-group context-refresh call.
    pub refresh_timeout_secs: u64,
    /// Bound on the coordination barrier for one group.
    pub group_timeout_secs: u64,
    /// Interval between executor polls during coordination.
    pub poll_interval_ms: u64,
    /// Interval between store polls in `wait_for_group_completion`.
    pub wait_poll_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            refresh_timeout_secs: 60,
            group_timeout_secs: 1_800,
            poll_interval_ms: 500,
            wait_poll_interval_ms: 250,
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("group '{group_id}' failed: {reason}")]
    GroupFailed { group_id: String, reason: String },

    #[error("recovery exhausted for group '{group_id}'; session paused awaiting operator input")]
    Escalated { group_id: String },

    #[error(transparent)]
    Store(#[from] PersistenceError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Single-writer coordinator for one session. Consumes the scheduler's plan
/// and drives each group through the four-phase protocol; the actual task
/// work runs in the external executor.
pub struct GroupCoordinator {
    session: String,
    source: Arc<dyn TaskSource>,
    executor: Arc<dyn TaskExecutor>,
    tests: Arc<dyn TestRunner>,
    refresher: Arc<dyn ContextRefresher>,
    policy: Arc<dyn ExecutorPolicy>,
    store: Arc<dyn GroupStore>,
    config: CoordinatorConfig,
    budget: Option<BudgetTracker>,
    checkpoints: Option<CheckpointManager>,
}

impl GroupCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: impl Into<String>,
        source: Arc<dyn TaskSource>,
        executor: Arc<dyn TaskExecutor>,
        tests: Arc<dyn TestRunner>,
        refresher: Arc<dyn ContextRefresher>,
        policy: Arc<dyn ExecutorPolicy>,
        store: Arc<dyn GroupStore>,
    ) -> Self {
        Self {
            session: session.into(),
            source,
            executor,
            tests,
            refresher,
            policy,
            store,
            config: CoordinatorConfig::default(),
            budget: None,
            checkpoints: None,
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_budget(mut self, budget: ResourceBudget) -> Self {
        self.budget = Some(BudgetTracker::new(budget));
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: CheckpointManager) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    fn note_call(&mut self) {
        if let Some(tracker) = &mut self.budget {
            tracker.record_call();
        }
    }

    fn budget_exceeded(&self) -> bool {
        self.budget.as_ref().map(BudgetTracker::exceeded).unwrap_or(false)
    }

    async fn save(&self, record: &GroupExecutionRecord) -> Result<(), CoordinationError> {
        self.store.save(&self.session, record).await?;
        Ok(())
    }

    async fn transition(
        &self,
        record: &mut GroupExecutionRecord,
        phase: GroupPhase,
    ) -> Result<(), CoordinationError> {
        info!(
            group_id = %record.group_id,
            from = ?record.phase,
            to = ?phase,
            "group phase transition"
        );
        record.phase = phase;
        self.save(record).await
    }

    async fn fail_group(
        &self,
        mut record: GroupExecutionRecord,
        reason: String,
    ) -> Result<GroupExecutionRecord, CoordinationError> {
        warn!(group_id = %record.group_id, %reason, "group failed");
        record.status = GroupStatus::Failed;
        record.completed_at = Some(Utc::now());
        record.errors.push(reason.clone());
        self.save(&record).await?;
        Err(CoordinationError::GroupFailed {
            group_id: record.group_id,
            reason,
        })
    }

    /// Take a safe-state checkpoint so an interrupted session can resume.
    async fn checkpoint_safe_state(&mut self, reason: &str) -> Result<(), CoordinationError> {
        if let Some(manager) = &mut self.checkpoints {
            manager
                .create_checkpoint(reason, "coordination", CheckpointType::SafeState, None, true)
                .await?;
        }
        Ok(())
    }

    /// Drive one group through all four phases.
    ///
    /// Failure of any task, or of the post-execution test gate, fails the
    /// group; external tracking issues are closed only on full success.
    pub async fn execute_group(
        &mut self,
        group: &ExecutionGroup,
        tasks: &[Task],
    ) -> Result<GroupExecutionRecord, CoordinationError> {
        let task_map: HashMap<&TaskId, &Task> = tasks.iter().map(|t| (&t.id, t)).collect();
        let group_id = format!("group-{}", group.index);
        let group_name = format!("group {} ({} tasks)", group.index, group.task_ids.len());

        let mut record = GroupExecutionRecord::new(group_id, group_name, group.task_ids.clone());
        record.status = GroupStatus::InProgress;
        record.started_at = Some(Utc::now());
        self.save(&record).await?;

        // PRE_EXECUTION: refresh shared context ahead of parallel groups so
        // concurrent executors start from the same view. Single-task groups
        // skip the refresh. The outcome is recorded but never blocks the
        // transition.
        if group.is_parallel() {
            self.note_call();
            let refresh_window = Duration::from_secs(self.config.refresh_timeout_secs);
            record.pre_group_refresh_completed =
                match timeout(refresh_window, self.refresher.refresh()).await {
                    Ok(Ok(())) => true,
                    Ok(Err(error)) => {
                        warn!(group_id = %record.group_id, %error, "context refresh failed");
                        record.errors.push(format!("context refresh failed: {error}"));
                        false
                    }
                    Err(_) => {
                        warn!(group_id = %record.group_id, "context refresh timed out");
                        record.errors.push("context refresh timed out".to_string());
                        false
                    }
                };
        } else {
            debug!(group_id = %record.group_id, "single-task group; skipping context refresh");
        }
        self.transition(&mut record, GroupPhase::ConcurrentExecution).await?;

        // CONCURRENT_EXECUTION: dispatch every unblocked task. Tasks whose
        // tracker dependencies are still open are deferred to a later
        // scheduling pass, not failed.
        let mut budget_stopped = false;
        for task_id in &group.task_ids {
            if self.budget_exceeded() {
                if !budget_stopped {
                    warn!(group_id = %record.group_id, "resource budget exhausted; halting dispatch");
                    budget_stopped = true;
                }
                record
                    .errors
                    .push(format!("budget exhausted before dispatching '{task_id}'"));
                continue;
            }

            let task = match task_map.get(task_id) {
                Some(task) => *task,
                None => {
                    record.errors.push(format!("task '{task_id}' missing from task set"));
                    record.results.push(TaskResult {
                        task_id: task_id.clone(),
                        status: TaskStatus::Failed,
                        executor: String::new(),
                        started_at: Utc::now(),
                        completed_at: Some(Utc::now()),
                    });
                    continue;
                }
            };

            self.note_call();
            match self.source.open_dependencies(task_id).await {
                Ok(open) if !open.is_empty() => {
                    info!(
                        group_id = %record.group_id,
                        task_id = %task_id,
                        open_dependencies = ?open,
                        "task deferred; dependencies still open in tracker"
                    );
                    continue;
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(task_id = %task_id, %error, "dependency lookup failed; deferring task");
                    record
                        .errors
                        .push(format!("dependency lookup for '{task_id}' failed: {error}"));
                    continue;
                }
            }

            let executor_id = self.policy.executor_for(task);
            let instructions = format!(
                "Task {}: {}\nPriority: {}\nReport terminal status when done.",
                task.id, task.description, task.priority
            );

            self.note_call();
            match self.executor.dispatch(task_id, &executor_id, &instructions).await {
                Ok(()) => {
                    debug!(task_id = %task_id, executor = %executor_id, "task dispatched");
                    record.results.push(TaskResult {
                        task_id: task_id.clone(),
                        status: TaskStatus::InProgress,
                        executor: executor_id,
                        started_at: Utc::now(),
                        completed_at: None,
                    });
                }
                Err(error) => {
                    warn!(task_id = %task_id, %error, "dispatch failed");
                    record.errors.push(format!("dispatch of '{task_id}' failed: {error}"));
                    record.results.push(TaskResult {
                        task_id: task_id.clone(),
                        status: TaskStatus::Failed,
                        executor: executor_id,
                        started_at: Utc::now(),
                        completed_at: Some(Utc::now()),
                    });
                }
            }
        }
        self.transition(&mut record, GroupPhase::Coordination).await?;

        // COORDINATION: barrier until every dispatched task is terminal or
        // the group times out. A timeout is a failure outcome, not an
        // exception to retry silently.
        let deadline = Instant::now() + Duration::from_secs(self.config.group_timeout_secs);
        loop {
            let mut all_terminal = true;
            for i in 0..record.results.len() {
                if record.results[i].status != TaskStatus::InProgress {
                    continue;
                }
                let task_id = record.results[i].task_id.clone();
                self.note_call();
                match self.executor.poll(&task_id).await {
                    Ok(ExecutionStatus::Running) => all_terminal = false,
                    Ok(ExecutionStatus::Completed) => {
                        record.results[i].status = TaskStatus::Completed;
                        record.results[i].completed_at = Some(Utc::now());
                    }
                    Ok(ExecutionStatus::Failed) => {
                        record.results[i].status = TaskStatus::Failed;
                        record.results[i].completed_at = Some(Utc::now());
                        record.errors.push(format!("task '{task_id}' failed in executor"));
                    }
                    Err(error) => {
                        warn!(task_id = %task_id, %error, "executor poll failed");
                        all_terminal = false;
                    }
                }
            }
            if all_terminal {
                break;
            }
            if Instant::now() >= deadline {
                for result in record.results.iter_mut() {
                    if result.status == TaskStatus::InProgress {
                        result.status = TaskStatus::Failed;
                        result.completed_at = Some(Utc::now());
                        record
                            .errors
                            .push(format!("task '{}' timed out in coordination", result.task_id));
                    }
                }
                break;
            }
            sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
        }
        self.transition(&mut record, GroupPhase::PostExecution).await?;

        // A mid-group budget stop pauses the group instead of finishing it:
        // the record stays InProgress so a later run can resume the
        // undispatched tasks from the checkpoint.
        if budget_stopped {
            self.checkpoint_safe_state("budget exhausted mid-group; state saved for resumption")
                .await?;
            self.save(&record).await?;
            warn!(group_id = %record.group_id, "group paused by budget stop; record left non-terminal");
            return Ok(record);
        }

        // POST_EXECUTION: failed tasks fail the group and leave their
        // tracking issues open; otherwise the test gate decides.
        let failed: Vec<&TaskResult> = record
            .results
            .iter()
            .filter(|r| r.status == TaskStatus::Failed)
            .collect();
        if !failed.is_empty() {
            let reason = format!(
                "{} of {} tasks failed: {}",
                failed.len(),
                record.results.len(),
                failed.iter().map(|r| r.task_id.as_str()).collect::<Vec<_>>().join(", ")
            );
            return self.fail_group(record, reason).await;
        }

        self.note_call();
        match self.tests.run().await {
            Ok(outcome) if outcome.passed => {
                for result in &record.results {
                    if result.status != TaskStatus::Completed {
                        continue;
                    }
                    self.note_call();
                    if let Err(error) = self.source.close_task(&result.task_id).await {
                        warn!(task_id = %result.task_id, %error, "failed to close tracking issue");
                        record
                            .errors
                            .push(format!("closing issue for '{}' failed: {error}", result.task_id));
                    }
                }
                record.status = GroupStatus::Completed;
                record.completed_at = Some(Utc::now());
                self.save(&record).await?;
                info!(
                    group_id = %record.group_id,
                    tasks = record.results.len(),
                    "group completed"
                );
                Ok(record)
            }
            Ok(outcome) => {
                self.fail_group(record, format!("test gate failed: {}", outcome.summary))
                    .await
            }
            Err(error) => {
                self.fail_group(record, format!("test gate errored: {error}"))
                    .await
            }
        }
    }

    /// Execute an entire plan, group by group, strictly in scheduler order.
    ///
    /// A later group begins only after the previous one completed or its
    /// failure was resolved by the recovery engine; an escalated failure
    /// aborts the run. A budget stop between groups checkpoints state and
    /// returns the records produced so far.
    pub async fn execute_plan(
        &mut self,
        plan: &ExecutionPlan,
        tasks: &[Task],
        recovery: &mut RecoveryEngine,
    ) -> Result<Vec<GroupExecutionRecord>, CoordinationError> {
        let mut records = Vec::new();
        let correlation_id = generate_correlation_id();

        for group in &plan.groups {
            if let Some(tracker) = &self.budget {
                let completion_pct = if plan.groups.is_empty() {
                    100
                } else {
                    (records.len() * 100 / plan.groups.len()) as u8
                };
                if tracker.should_stop(completion_pct) {
                    warn!(
                        completed_groups = records.len(),
                        total_groups = plan.groups.len(),
                        external_calls = tracker.external_calls(),
                        "resource budget stop; pausing plan"
                    );
                    self.checkpoint_safe_state("budget stop between groups; plan paused")
                        .await?;
                    return Ok(records);
                }
            }

            let span = create_group_span(
                &self.session,
                &format!("group-{}", group.index),
                Some(&correlation_id),
            );
            match self.execute_group(group, tasks).instrument(span).await {
                Ok(record) => {
                    let paused = !record.status.is_terminal();
                    records.push(record);
                    if paused {
                        warn!(
                            completed_groups = records.len(),
                            total_groups = plan.groups.len(),
                            "plan paused on a non-terminal group record"
                        );
                        return Ok(records);
                    }
                }
                Err(CoordinationError::GroupFailed { group_id, reason }) => {
                    let error = DetectedError::new("group_execution_failure", reason, group_id.clone())
                        .with_suggestion("inspect the group record's task results and errors");
                    let context = RecoveryContext {
                        session: self.session.clone(),
                        group_id: Some(group_id.clone()),
                        task_id: None,
                    };
                    let outcome = recovery.attempt_recovery(error, context).await;
                    if !outcome.success {
                        return Err(CoordinationError::Escalated { group_id });
                    }
                    info!(
                        group_id = %group_id,
                        strategy = ?outcome.strategy_used,
                        "group failure recovered; continuing plan"
                    );
                    if let Some(record) = self.store.get(&self.session, &group_id).await? {
                        records.push(record);
                    }
                }
                Err(other) => return Err(other),
            }
        }

        Ok(records)
    }

    /// Poll the stored record until it reaches a terminal status or `timeout`
    /// elapses. Returns whether a terminal status was observed; never errors
    /// on timeout.
    pub async fn wait_for_group_completion(&self, group_id: &str, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            match self.store.get(&self.session, group_id).await {
                Ok(Some(record)) if record.status.is_terminal() => return true,
                Ok(_) => {}
                Err(error) => {
                    warn!(group_id = %group_id, %error, "group store read failed while waiting");
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(self.config.wait_poll_interval_ms)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_pending_in_pre_execution() {
        let record = GroupExecutionRecord::new("group-0", "group 0", vec!["a".to_string()]);
        assert_eq!(record.phase, GroupPhase::PreExecution);
        assert_eq!(record.status, GroupStatus::Pending);
        assert!(!record.pre_group_refresh_completed);
        assert!(record.results.is_empty());
    }

    #[test]
    fn terminal_statuses() {
        assert!(GroupStatus::Completed.is_terminal());
        assert!(GroupStatus::Failed.is_terminal());
        assert!(!GroupStatus::Pending.is_terminal());
        assert!(!GroupStatus::InProgress.is_terminal());
    }

    #[test]
    fn config_defaults_are_sane() {
        let config = CoordinatorConfig::default();
        assert!(config.refresh_timeout_secs > 0);
        assert!(config.group_timeout_secs > config.refresh_timeout_secs);
    }
}
