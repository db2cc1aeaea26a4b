use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::persistence::{CheckpointStore, PersistenceError};
use crate::vcs::{ResetMode, VcsOps};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointType {
    PhaseComplete,
    TaskGroupComplete,
    SafeState,
    PreRiskyOperation,
    ErrorRecovery,
    Manual,
}

impl CheckpointType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhaseComplete => "phase_complete",
            Self::TaskGroupComplete => "task_group_complete",
            Self::SafeState => "safe_state",
            Self::PreRiskyOperation => "pre_risky_operation",
            Self::ErrorRecovery => "error_recovery",
            Self::Manual => "manual",
        }
    }
}

/// Snapshot of workflow progress attached to a checkpoint so a rollback can
/// report exactly what was reverted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub tasks_completed: Vec<String>,
    pub decisions_made: Vec<String>,
    pub files_modified: Vec<String>,
    pub files_created: Vec<String>,
    pub tests_passing: u32,
    pub tests_failing: u32,
}

/// Context frozen into a pre-risky-operation checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContext {
    pub operation_type: String,
    pub operation_description: String,
    pub created_at: DateTime<Utc>,
}

/// An immutable, named recovery point. Only `rollback_used`/`rollback_count`
/// ever change after creation, and only through a rollback against this
/// checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub commit_ref: String,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub phase: String,
    pub checkpoint_type: CheckpointType,
    pub tags: Vec<String>,
    pub snapshot: Option<StateSnapshot>,
    pub operation_context: Option<OperationContext>,
    pub rollback_used: bool,
    pub rollback_count: u32,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("working tree is not a version-controlled repository")]
    NotARepository,

    #[error("uncommitted local changes present; commit or stash changes first, or retry with hard_reset=true")]
    RollbackRefused,

    #[error("checkpoint '{0}' not found")]
    NotFound(String),

    #[error("vcs operation failed: {0}")]
    Vcs(String),

    #[error(transparent)]
    Store(#[from] PersistenceError),
}

/// Aggregate counters over the session's checkpoint log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointStats {
    pub total: u32,
    pub by_type: HashMap<String, u32>,
    pub latest: Option<String>,
}

/// Failure categories the rollback decision consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Transient,
    Permanent,
    Ambiguous,
}

/// Inputs to the pure rollback decision.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub category: FailureCategory,
    pub error_type: String,
    pub resource_exhaustion: bool,
    pub partial_progress: bool,
    pub validation_failed: bool,
}

impl ErrorContext {
    pub fn new(category: FailureCategory, error_type: impl Into<String>) -> Self {
        Self {
            category,
            error_type: error_type.into(),
            resource_exhaustion: false,
            partial_progress: false,
            validation_failed: false,
        }
    }
}

const UNRECOVERABLE_ERROR_TYPES: &[&str] = &[
    "disk_full",
    "permission_denied",
    "database_connection_lost",
    "network_partition",
];

/// Pure rollback trigger decision; no side effects.
///
/// Rolls back when the failure is permanent, when resource exhaustion
/// co-occurs with partial progress, when a validation failure persists into a
/// second attempt, when the error type is known unrecoverable, or after three
/// attempts of anything else.
pub fn should_trigger_rollback(ctx: &ErrorContext, attempt_number: u32) -> bool {
    if ctx.category == FailureCategory::Permanent {
        return true;
    }
    if ctx.resource_exhaustion && ctx.partial_progress {
        return true;
    }
    if ctx.validation_failed && attempt_number >= 2 {
        return true;
    }
    if UNRECOVERABLE_ERROR_TYPES.contains(&ctx.error_type.as_str()) {
        return true;
    }
    attempt_number >= 3
}

/// Creates immutable recovery points and restores the working state to one
/// under strict safety preconditions. Exclusively owns checkpoint mutation
/// for its session.
pub struct CheckpointManager {
    vcs: Box<dyn VcsOps>,
    store: Arc<dyn CheckpointStore>,
    session: String,
    tag_prefix: String,
    stats: CheckpointStats,
}

impl CheckpointManager {
    pub fn new(vcs: Box<dyn VcsOps>, store: Arc<dyn CheckpointStore>, session: impl Into<String>) -> Self {
        Self {
            vcs,
            store,
            session: session.into(),
            tag_prefix: "pitcrew-checkpoint".to_string(),
            stats: CheckpointStats::default(),
        }
    }

    pub fn with_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tag_prefix = prefix.into();
        self
    }

    pub fn stats(&self) -> &CheckpointStats {
        &self.stats
    }

    /// Create a checkpoint at the current (or freshly committed) state.
    ///
    /// With `commit_first`, dirty local changes are committed before the
    /// checkpoint is taken; otherwise the current HEAD is captured as-is.
    pub async fn create_checkpoint(
        &mut self,
        description: &str,
        phase: &str,
        checkpoint_type: CheckpointType,
        snapshot: Option<StateSnapshot>,
        commit_first: bool,
    ) -> Result<Checkpoint, CheckpointError> {
        self.create_inner(description, phase, checkpoint_type, snapshot, None, commit_first)
            .await
    }

    /// Checkpoint taken immediately before a risky operation, with the
    /// operation context frozen into the record.
    pub async fn create_pre_operation_checkpoint(
        &mut self,
        operation_type: &str,
        operation_description: &str,
        snapshot: Option<StateSnapshot>,
    ) -> Result<Checkpoint, CheckpointError> {
        let context = OperationContext {
            operation_type: operation_type.to_string(),
            operation_description: operation_description.to_string(),
            created_at: Utc::now(),
        };
        self.create_inner(
            &format!("pre-operation safety point: {operation_description}"),
            "pre_operation",
            CheckpointType::PreRiskyOperation,
            snapshot,
            Some(context),
            true,
        )
        .await
    }

    async fn create_inner(
        &mut self,
        description: &str,
        phase: &str,
        checkpoint_type: CheckpointType,
        snapshot: Option<StateSnapshot>,
        operation_context: Option<OperationContext>,
        commit_first: bool,
    ) -> Result<Checkpoint, CheckpointError> {
        if !self.vcs.is_repository() {
            return Err(CheckpointError::NotARepository);
        }

        let dirty = self.vcs.has_local_changes().map_err(vcs_err)?;
        let commit_ref = if commit_first && dirty {
            self.vcs
                .commit_all(&format!("checkpoint: {description}"))
                .map_err(vcs_err)?
        } else {
            self.vcs.head_commit().map_err(vcs_err)?
        };

        let id = Uuid::new_v4().to_string();
        let tag = format!("{}-{}", self.tag_prefix, &id[..8]);
        self.vcs.create_tag(&tag, &commit_ref).map_err(vcs_err)?;

        let checkpoint = Checkpoint {
            id: id.clone(),
            commit_ref,
            timestamp: Utc::now(),
            description: description.to_string(),
            phase: phase.to_string(),
            checkpoint_type,
            tags: vec![tag],
            snapshot,
            operation_context,
            rollback_used: false,
            rollback_count: 0,
        };

        self.store.append(&self.session, &checkpoint).await?;

        self.stats.total += 1;
        *self
            .stats
            .by_type
            .entry(checkpoint_type.as_str().to_string())
            .or_insert(0) += 1;
        self.stats.latest = Some(id.clone());

        info!(
            checkpoint_id = %checkpoint.id,
            checkpoint_type = %checkpoint_type.as_str(),
            commit = %checkpoint.commit_ref,
            phase = %checkpoint.phase,
            "created checkpoint"
        );

        Ok(checkpoint)
    }

    /// Restore the working tree to a checkpoint's commit.
    ///
    /// Refuses (without touching the tree) when uncommitted changes exist and
    /// `hard_reset` is false. On success the checkpoint's `rollback_used` flag
    /// is set, its `rollback_count` incremented, and the recorded snapshot is
    /// returned so callers can report what was reverted.
    pub async fn rollback_to_checkpoint(
        &mut self,
        checkpoint_id: &str,
        hard_reset: bool,
    ) -> Result<Option<StateSnapshot>, CheckpointError> {
        if !self.vcs.is_repository() {
            return Err(CheckpointError::NotARepository);
        }

        let checkpoint = self
            .store
            .get(&self.session, checkpoint_id)
            .await?
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_id.to_string()))?;

        if self.vcs.has_local_changes().map_err(vcs_err)? && !hard_reset {
            warn!(
                checkpoint_id = %checkpoint_id,
                "rollback refused: uncommitted changes present"
            );
            return Err(CheckpointError::RollbackRefused);
        }

        let mode = if hard_reset { ResetMode::Hard } else { ResetMode::Mixed };
        self.vcs.reset_to(&checkpoint.commit_ref, mode).map_err(vcs_err)?;

        let updated = self.store.record_rollback(&self.session, checkpoint_id).await?;

        info!(
            checkpoint_id = %checkpoint_id,
            commit = %checkpoint.commit_ref,
            rollback_count = updated.rollback_count,
            hard_reset,
            "rolled back to checkpoint"
        );

        Ok(checkpoint.snapshot)
    }

    pub async fn get_checkpoint(&self, id: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.store.get(&self.session, id).await?)
    }

    pub async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, CheckpointError> {
        Ok(self.store.list(&self.session).await?)
    }

    pub async fn latest_checkpoint(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.store.list(&self.session).await?.into_iter().last())
    }
}

fn vcs_err(error: anyhow::Error) -> CheckpointError {
    CheckpointError::Vcs(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(category: FailureCategory) -> ErrorContext {
        ErrorContext::new(category, "generic")
    }

    #[test]
    fn permanent_errors_roll_back_immediately() {
        assert!(should_trigger_rollback(&ctx(FailureCategory::Permanent), 1));
    }

    #[test]
    fn transient_errors_roll_back_only_after_three_attempts() {
        assert!(!should_trigger_rollback(&ctx(FailureCategory::Transient), 1));
        assert!(!should_trigger_rollback(&ctx(FailureCategory::Transient), 2));
        assert!(should_trigger_rollback(&ctx(FailureCategory::Transient), 3));
    }

    #[test]
    fn exhaustion_with_partial_progress_rolls_back() {
        let mut context = ctx(FailureCategory::Ambiguous);
        context.resource_exhaustion = true;
        context.partial_progress = true;
        assert!(should_trigger_rollback(&context, 1));

        context.partial_progress = false;
        assert!(!should_trigger_rollback(&context, 1));
    }

    #[test]
    fn persistent_validation_failures_roll_back_at_second_attempt() {
        let mut context = ctx(FailureCategory::Ambiguous);
        context.validation_failed = true;
        assert!(!should_trigger_rollback(&context, 1));
        assert!(should_trigger_rollback(&context, 2));
    }

    #[test]
    fn unrecoverable_error_types_always_roll_back() {
        for error_type in ["disk_full", "permission_denied", "database_connection_lost", "network_partition"] {
            let context = ErrorContext::new(FailureCategory::Transient, error_type);
            assert!(should_trigger_rollback(&context, 1), "{error_type}");
        }
    }
}
