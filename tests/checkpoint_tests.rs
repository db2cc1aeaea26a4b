//! Checkpoint manager integration tests against real temporary git
//! repositories and the on-disk checkpoint log.

use git2::{Repository, Signature};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use pitcrew::checkpoint::{
    should_trigger_rollback, CheckpointError, CheckpointManager, CheckpointType, ErrorContext,
    FailureCategory, RiskClassifier, StateSnapshot,
};
use pitcrew::persistence::FileStore;
use pitcrew::vcs::{Git2Vcs, VcsOps};

struct Fixture {
    repo_dir: TempDir,
    _state_dir: TempDir,
    manager: CheckpointManager,
    store: Arc<FileStore>,
}

fn fixture() -> Fixture {
    let repo_dir = TempDir::new().unwrap();
    let repo = Repository::init(repo_dir.path()).unwrap();
    let signature = Signature::now("Test", "test@example.com").unwrap();
    let tree_id = repo.index().unwrap().write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    repo.commit(Some("HEAD"), &signature, &signature, "initial", &tree, &[])
        .unwrap();
    drop(tree);
    drop(repo);

    let state_dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(state_dir.path()));
    let vcs = Box::new(Git2Vcs::open(repo_dir.path()).unwrap());
    let manager = CheckpointManager::new(vcs, store.clone(), "session-1");

    Fixture {
        repo_dir,
        _state_dir: state_dir,
        manager,
        store,
    }
}

fn snapshot() -> StateSnapshot {
    StateSnapshot {
        tasks_completed: vec!["t1".to_string(), "t2".to_string()],
        decisions_made: vec!["kept the old wire format".to_string()],
        files_modified: vec!["src/parser.rs".to_string()],
        files_created: vec![],
        tests_passing: 12,
        tests_failing: 0,
    }
}

#[tokio::test]
async fn checkpoint_round_trips_through_the_store() {
    let mut fx = fixture();

    let created = fx
        .manager
        .create_checkpoint(
            "before refactor",
            "concurrent_execution",
            CheckpointType::TaskGroupComplete,
            Some(snapshot()),
            false,
        )
        .await
        .unwrap();

    let loaded = fx.manager.get_checkpoint(&created.id).await.unwrap().unwrap();
    assert_eq!(loaded.description, "before refactor");
    assert_eq!(loaded.phase, "concurrent_execution");
    assert_eq!(loaded.checkpoint_type, CheckpointType::TaskGroupComplete);
    assert_eq!(loaded.commit_ref, created.commit_ref);
    assert!(!loaded.rollback_used);
    let snap = loaded.snapshot.unwrap();
    assert_eq!(snap.tasks_completed, vec!["t1", "t2"]);
    assert_eq!(snap.tests_passing, 12);
}

#[tokio::test]
async fn dirty_checkpoint_commits_first_when_asked() {
    let mut fx = fixture();
    fs::write(fx.repo_dir.path().join("wip.rs"), "fn main() {}").unwrap();

    let created = fx
        .manager
        .create_checkpoint("save work", "coordination", CheckpointType::SafeState, None, true)
        .await
        .unwrap();

    let vcs = Git2Vcs::open(fx.repo_dir.path()).unwrap();
    assert!(!vcs.has_local_changes().unwrap());
    assert_eq!(vcs.head_commit().unwrap(), created.commit_ref);
}

#[tokio::test]
async fn rollback_restores_the_tagged_commit_and_marks_the_record() {
    let mut fx = fixture();
    let checkpoint = fx
        .manager
        .create_checkpoint("safe point", "pre_execution", CheckpointType::Manual, None, false)
        .await
        .unwrap();

    fs::write(fx.repo_dir.path().join("later.rs"), "// later work").unwrap();
    let vcs = Git2Vcs::open(fx.repo_dir.path()).unwrap();
    vcs.commit_all("later work").unwrap();
    assert_ne!(vcs.head_commit().unwrap(), checkpoint.commit_ref);

    let restored = fx
        .manager
        .rollback_to_checkpoint(&checkpoint.id, true)
        .await
        .unwrap();
    assert!(restored.is_none());
    assert_eq!(vcs.head_commit().unwrap(), checkpoint.commit_ref);

    let updated = fx.manager.get_checkpoint(&checkpoint.id).await.unwrap().unwrap();
    assert!(updated.rollback_used);
    assert_eq!(updated.rollback_count, 1);
}

#[tokio::test]
async fn rollback_refuses_a_dirty_tree_without_hard_reset() {
    let mut fx = fixture();
    let checkpoint = fx
        .manager
        .create_checkpoint("safe point", "pre_execution", CheckpointType::Manual, None, false)
        .await
        .unwrap();

    fs::write(fx.repo_dir.path().join("uncommitted.rs"), "// dirty").unwrap();

    let err = fx
        .manager
        .rollback_to_checkpoint(&checkpoint.id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckpointError::RollbackRefused));
    // Refusal must not have touched the tree.
    assert!(fx.repo_dir.path().join("uncommitted.rs").exists());

    let untouched = fx.manager.get_checkpoint(&checkpoint.id).await.unwrap().unwrap();
    assert!(!untouched.rollback_used);
    assert_eq!(untouched.rollback_count, 0);
}

#[tokio::test]
async fn session_log_is_append_only_and_ordered() {
    let mut fx = fixture();
    for phase in ["pre_execution", "coordination", "post_execution"] {
        fx.manager
            .create_checkpoint("step", phase, CheckpointType::PhaseComplete, None, false)
            .await
            .unwrap();
    }

    let all = fx.manager.list_checkpoints().await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].phase, "pre_execution");
    assert_eq!(all[2].phase, "post_execution");

    // Another session's log is untouched.
    use pitcrew::persistence::CheckpointStore;
    assert!(fx.store.list("session-2").await.unwrap().is_empty());
}

#[tokio::test]
async fn risky_operation_gets_a_pre_operation_checkpoint() {
    let mut fx = fixture();
    let classifier = RiskClassifier::default();

    let risk = classifier.classify("git push --force origin main");
    assert!(risk.is_risky);
    assert!(risk.requires_checkpoint);
    let category = risk.category.unwrap();

    let checkpoint = fx
        .manager
        .create_pre_operation_checkpoint(&category, "git push --force origin main", None)
        .await
        .unwrap();
    assert_eq!(checkpoint.checkpoint_type, CheckpointType::PreRiskyOperation);
    let context = checkpoint.operation_context.unwrap();
    assert_eq!(context.operation_type, category);
}

#[test]
fn rollback_decision_covers_the_documented_cases() {
    let permanent = ErrorContext::new(FailureCategory::Permanent, "compile_error");
    assert!(should_trigger_rollback(&permanent, 1));

    let mut exhausted = ErrorContext::new(FailureCategory::Transient, "quota");
    exhausted.resource_exhaustion = true;
    exhausted.partial_progress = true;
    assert!(should_trigger_rollback(&exhausted, 1));

    let transient = ErrorContext::new(FailureCategory::Transient, "network_blip");
    assert!(!should_trigger_rollback(&transient, 2));
    assert!(should_trigger_rollback(&transient, 3));
}
