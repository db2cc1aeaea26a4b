//! Checkpoint and rollback management: risk classification for candidate
//! operations, immutable git-backed recovery points, and the safety rules
//! governing when a rollback may run at all.

pub mod manager;
pub mod risk;

pub use manager::{
    should_trigger_rollback, Checkpoint, CheckpointError, CheckpointManager, CheckpointStats,
    CheckpointType, ErrorContext, FailureCategory, OperationContext, StateSnapshot,
};
pub use risk::{OperationRisk, RiskClassifier, RiskLevel, RiskRule};
