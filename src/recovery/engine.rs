use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backoff::BackoffPolicy;
use crate::persistence::{PersistenceError, RecoveryHistoryStore};

/// Failure categories the strategy chains key off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    CodeQuality,
    TestFailure,
    Dependency,
    Unknown,
}

/// A failure as observed at the point it happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedError {
    pub error_type: String,
    pub message: String,
    pub source: String,
    pub suggestion: Option<String>,
}

impl DetectedError {
    pub fn new(
        error_type: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            source: source.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Retry,
    Fix,
    Alternative,
    Rollback,
    Escalate,
}

/// One handler invocation, recorded win or lose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub attempt: u32,
    pub strategy: StrategyKind,
    pub success: bool,
    pub changes_made: Vec<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate outcome of one recovery invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub id: String,
    pub success: bool,
    pub strategy_used: StrategyKind,
    pub attempts: Vec<RecoveryAttempt>,
    pub escalated_to_human: bool,
    pub error: DetectedError,
    pub completed_at: DateTime<Utc>,
}

/// Where the failure happened, threaded through to handlers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryContext {
    pub session: String,
    pub group_id: Option<String>,
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HandlerOutcome {
    pub success: bool,
    pub changes_made: Vec<String>,
}

impl HandlerOutcome {
    pub fn succeeded(changes_made: Vec<String>) -> Self {
        Self {
            success: true,
            changes_made,
        }
    }

    pub fn failed() -> Self {
        Self::default()
    }
}

/// External implementation of one recovery strategy. The engine owns none of
/// these; it only walks them in order.
#[async_trait]
pub trait StrategyHandler: Send + Sync {
    async fn execute(
        &self,
        error: &DetectedError,
        context: &RecoveryContext,
    ) -> anyhow::Result<HandlerOutcome>;
}

/// One entry in the ordered error-classification table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierRule {
    pub keywords: Vec<String>,
    pub category: ErrorCategory,
}

fn default_classifier_rules() -> Vec<ClassifierRule> {
    let rule = |keywords: &[&str], category| ClassifierRule {
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        category,
    };
    vec![
        rule(
            &["timeout", "connection", "rate limit", "network", "temporar", "unavailable"],
            ErrorCategory::Transient,
        ),
        rule(
            &["test", "assert", "expected", "fixture"],
            ErrorCategory::TestFailure,
        ),
        rule(
            &["lint", "format", "clippy", "style", "warning", "type error", "typecheck"],
            ErrorCategory::CodeQuality,
        ),
        rule(
            &["dependency", "version conflict", "package", "unresolved import", "module not found"],
            ErrorCategory::Dependency,
        ),
    ]
}

/// Classifies failures, walks an ordered chain of recovery strategies with
/// backoff, and escalates to a human only once the chain is exhausted.
pub struct RecoveryEngine {
    retry: Option<Arc<dyn StrategyHandler>>,
    fix: Option<Arc<dyn StrategyHandler>>,
    alternative: Option<Arc<dyn StrategyHandler>>,
    rollback: Option<Arc<dyn StrategyHandler>>,
    backoff: BackoffPolicy,
    max_attempts: u32,
    rules: Vec<ClassifierRule>,
    history: Vec<RecoveryResult>,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryEngine {
    pub fn new() -> Self {
        Self {
            retry: None,
            fix: None,
            alternative: None,
            rollback: None,
            backoff: BackoffPolicy::default(),
            max_attempts: 3,
            rules: default_classifier_rules(),
            history: Vec::new(),
        }
    }

    pub fn with_retry_handler(mut self, handler: Arc<dyn StrategyHandler>) -> Self {
        self.retry = Some(handler);
        self
    }

    pub fn with_fix_handler(mut self, handler: Arc<dyn StrategyHandler>) -> Self {
        self.fix = Some(handler);
        self
    }

    pub fn with_alternative_handler(mut self, handler: Arc<dyn StrategyHandler>) -> Self {
        self.alternative = Some(handler);
        self
    }

    pub fn with_rollback_handler(mut self, handler: Arc<dyn StrategyHandler>) -> Self {
        self.rollback = Some(handler);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_classifier_rules(mut self, rules: Vec<ClassifierRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Keyword classification over error type and message; first rule wins.
    pub fn classify_error(&self, error: &DetectedError) -> ErrorCategory {
        let haystack = format!(
            "{} {}",
            error.error_type.to_lowercase(),
            error.message.to_lowercase()
        );
        for rule in &self.rules {
            if rule.keywords.iter().any(|k| haystack.contains(k.as_str())) {
                return rule.category;
            }
        }
        ErrorCategory::Unknown
    }

    /// Ordered strategy chain for a category, filtered to strategies whose
    /// handler is actually configured. Rollback, when configured, is always
    /// appended as the last automated strategy of a non-empty chain.
    pub fn select_strategies(&self, category: ErrorCategory) -> Vec<StrategyKind> {
        let preferred: &[StrategyKind] = match category {
            ErrorCategory::Transient => &[StrategyKind::Retry, StrategyKind::Fix],
            ErrorCategory::CodeQuality => &[StrategyKind::Fix, StrategyKind::Alternative],
            ErrorCategory::TestFailure => {
                &[StrategyKind::Fix, StrategyKind::Retry, StrategyKind::Alternative]
            }
            ErrorCategory::Dependency => &[StrategyKind::Fix, StrategyKind::Retry],
            ErrorCategory::Unknown => {
                &[StrategyKind::Retry, StrategyKind::Fix, StrategyKind::Alternative]
            }
        };

        let mut chain: Vec<StrategyKind> = preferred
            .iter()
            .copied()
            .filter(|kind| self.handler_for(*kind).is_some())
            .collect();
        if !chain.is_empty() && self.rollback.is_some() {
            chain.push(StrategyKind::Rollback);
        }
        chain
    }

    fn handler_for(&self, kind: StrategyKind) -> Option<&Arc<dyn StrategyHandler>> {
        match kind {
            StrategyKind::Retry => self.retry.as_ref(),
            StrategyKind::Fix => self.fix.as_ref(),
            StrategyKind::Alternative => self.alternative.as_ref(),
            StrategyKind::Rollback => self.rollback.as_ref(),
            StrategyKind::Escalate => None,
        }
    }

    /// Run the recovery chain for a failure.
    ///
    /// Every handler invocation is recorded as a `RecoveryAttempt` regardless
    /// of outcome; the first success terminates the walk. Exhausting
    /// `max_attempts` passes over the chain yields a terminal result with
    /// `escalated_to_human` set — escalation is the only path that makes a
    /// failure human-visible.
    pub async fn attempt_recovery(
        &mut self,
        error: DetectedError,
        context: RecoveryContext,
    ) -> RecoveryResult {
        let category = self.classify_error(&error);
        let chain = self.select_strategies(category);

        info!(
            error_type = %error.error_type,
            category = ?category,
            chain = ?chain,
            max_attempts = self.max_attempts,
            "starting recovery"
        );

        let mut attempts: Vec<RecoveryAttempt> = Vec::new();

        for attempt in 1..=self.max_attempts {
            for kind in &chain {
                let handler = match self.handler_for(*kind) {
                    Some(handler) => Arc::clone(handler),
                    None => continue,
                };

                if *kind == StrategyKind::Retry {
                    let delay = self.backoff.delay(attempt);
                    if !delay.is_zero() {
                        debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before retry");
                        tokio::time::sleep(delay).await;
                    }
                }

                let started = Instant::now();
                let (success, changes_made) = match handler.execute(&error, &context).await {
                    Ok(outcome) => (outcome.success, outcome.changes_made),
                    Err(handler_error) => {
                        warn!(
                            strategy = ?kind,
                            attempt,
                            error = %handler_error,
                            "recovery handler failed"
                        );
                        (false, vec![format!("handler error: {handler_error}")])
                    }
                };

                attempts.push(RecoveryAttempt {
                    attempt,
                    strategy: *kind,
                    success,
                    changes_made,
                    duration_ms: started.elapsed().as_millis() as u64,
                    timestamp: Utc::now(),
                });

                if success {
                    info!(strategy = ?kind, attempt, "recovery succeeded");
                    let result = RecoveryResult {
                        id: Uuid::new_v4().to_string(),
                        success: true,
                        strategy_used: *kind,
                        attempts,
                        escalated_to_human: false,
                        error,
                        completed_at: Utc::now(),
                    };
                    self.history.push(result.clone());
                    return result;
                }
            }
        }

        warn!(
            error_type = %error.error_type,
            attempts = attempts.len(),
            "recovery exhausted; escalating to human"
        );
        let result = RecoveryResult {
            id: Uuid::new_v4().to_string(),
            success: false,
            strategy_used: StrategyKind::Escalate,
            attempts,
            escalated_to_human: true,
            error,
            completed_at: Utc::now(),
        };
        self.history.push(result.clone());
        result
    }

    pub fn history(&self) -> &[RecoveryResult] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Persist the accumulated history for audit, including failures.
    pub async fn persist_history(
        &self,
        store: &dyn RecoveryHistoryStore,
        session: &str,
    ) -> Result<(), PersistenceError> {
        store.persist(session, &self.history).await
    }
}
