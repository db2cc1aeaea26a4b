//! Recovery strategy engine: failure classification, ordered strategy chains
//! (retry, fix, alternative, rollback) with exponential backoff, and human
//! escalation as the last resort.

pub mod backoff;
pub mod engine;

pub use backoff::BackoffPolicy;
pub use engine::{
    ClassifierRule, DetectedError, ErrorCategory, HandlerOutcome, RecoveryAttempt, RecoveryContext,
    RecoveryEngine, RecoveryResult, StrategyHandler, StrategyKind,
};
