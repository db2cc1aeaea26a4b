// Pitcrew Library - Autonomous Workflow Execution Core
// This exposes the core components for testing and integration

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod persistence;
pub mod ports;
pub mod recovery;
pub mod scheduler;
pub mod telemetry;
pub mod vcs;

// Re-export key types for easy access
pub use checkpoint::{
    Checkpoint, CheckpointError, CheckpointManager, CheckpointType, OperationRisk,
    RiskClassifier, RiskLevel, StateSnapshot,
};
pub use config::{CheckpointConfig, PitcrewConfig, RecoveryConfig};
pub use coordinator::{
    BudgetTracker, CoordinationError, CoordinatorConfig, GroupCoordinator,
    GroupExecutionRecord, GroupPhase, GroupStatus, ResourceBudget, TaskResult, TaskStatus,
};
pub use persistence::{CheckpointStore, FileStore, GroupStore, PersistenceError, RecoveryHistoryStore};
pub use ports::{
    ContextRefresher, ExecutionStatus, ExecutorPolicy, SingleExecutor, TaskExecutor,
    TaskSource, TestOutcome, TestRunner,
};
pub use recovery::{
    BackoffPolicy, DetectedError, ErrorCategory, HandlerOutcome, RecoveryAttempt,
    RecoveryContext, RecoveryEngine, RecoveryResult, StrategyHandler, StrategyKind,
};
pub use scheduler::{
    DependencyGraph, ExecutionGroup, ExecutionPlan, OrderingStrategy, PlanStats, Scheduler,
    SchedulerConfig, SchedulerError, Task, TaskId,
};
pub use telemetry::{create_group_span, generate_correlation_id, init_telemetry};
pub use vcs::{Git2Vcs, ResetMode, VcsOps};
