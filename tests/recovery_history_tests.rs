//! Recovery audit-log persistence: history survives a store round trip even
//! when every strategy failed and the error escalated.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;

use pitcrew::persistence::{FileStore, RecoveryHistoryStore};
use pitcrew::recovery::{
    DetectedError, HandlerOutcome, RecoveryContext, RecoveryEngine, StrategyHandler, StrategyKind,
};

struct FixOnce;

#[async_trait]
impl StrategyHandler for FixOnce {
    async fn execute(&self, _: &DetectedError, _: &RecoveryContext) -> Result<HandlerOutcome> {
        Ok(HandlerOutcome::succeeded(vec!["patched flaky import".into()]))
    }
}

struct Broken;

#[async_trait]
impl StrategyHandler for Broken {
    async fn execute(&self, _: &DetectedError, _: &RecoveryContext) -> Result<HandlerOutcome> {
        Err(anyhow!("strategy backend offline"))
    }
}

fn context() -> RecoveryContext {
    RecoveryContext {
        session: "session-1".to_string(),
        group_id: Some("group-3".to_string()),
        task_id: None,
    }
}

#[tokio::test]
async fn history_round_trips_through_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());

    let mut engine = RecoveryEngine::new().with_fix_handler(Arc::new(FixOnce));
    let ok = engine
        .attempt_recovery(
            DetectedError::new("test_failure", "assertion failed in parser tests", "group-3"),
            context(),
        )
        .await;
    assert!(ok.success);

    engine.persist_history(&store, "session-1").await.unwrap();

    let loaded = store.load("session-1").await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(loaded[0].success);
    assert_eq!(loaded[0].strategy_used, StrategyKind::Fix);
    assert_eq!(loaded[0].error.error_type, "test_failure");
}

#[tokio::test]
async fn escalated_failures_are_still_written_to_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path());

    let mut engine = RecoveryEngine::new()
        .with_fix_handler(Arc::new(Broken))
        .with_max_attempts(1);
    let failed = engine
        .attempt_recovery(
            DetectedError::new("unknown", "something odd happened", "group-9"),
            context(),
        )
        .await;
    assert!(!failed.success);
    assert!(failed.escalated_to_human);

    engine.persist_history(&store, "session-1").await.unwrap();

    let loaded = store.load("session-1").await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert!(loaded[0].escalated_to_human);
    assert!(!loaded[0].attempts.is_empty());

    // An empty session reads back as an empty log, not an error.
    assert!(store.load("session-2").await.unwrap().is_empty());
}
