//! Durable, session-scoped stores: the append-only checkpoint log, the
//! group-metadata store, and the recovery-history log. JSON documents on
//! disk, one writer per session assumed.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::checkpoint::Checkpoint;
use crate::coordinator::{GroupExecutionRecord, GroupStatus};
use crate::recovery::RecoveryResult;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("checkpoint '{0}' not found")]
    CheckpointNotFound(String),
}

/// Per-session checkpoint log. Append-only except for the rollback fields,
/// which only `record_rollback` may touch.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn append(&self, session: &str, checkpoint: &Checkpoint) -> Result<(), PersistenceError>;

    async fn list(&self, session: &str) -> Result<Vec<Checkpoint>, PersistenceError>;

    async fn get(&self, session: &str, id: &str) -> Result<Option<Checkpoint>, PersistenceError>;

    /// Mark a checkpoint as used for rollback: sets `rollback_used` and
    /// increments `rollback_count` (monotonic). Returns the updated record.
    async fn record_rollback(&self, session: &str, id: &str) -> Result<Checkpoint, PersistenceError>;
}

/// Group-metadata store keyed by group id within a session.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn save(&self, session: &str, record: &GroupExecutionRecord) -> Result<(), PersistenceError>;

    async fn get(
        &self,
        session: &str,
        group_id: &str,
    ) -> Result<Option<GroupExecutionRecord>, PersistenceError>;

    async fn list(&self, session: &str) -> Result<Vec<GroupExecutionRecord>, PersistenceError>;

    async fn list_by_status(
        &self,
        session: &str,
        status: GroupStatus,
    ) -> Result<Vec<GroupExecutionRecord>, PersistenceError>;
}

/// Audit log for recovery outcomes; persisted even on ultimate failure.
#[async_trait]
pub trait RecoveryHistoryStore: Send + Sync {
    async fn persist(&self, session: &str, history: &[RecoveryResult]) -> Result<(), PersistenceError>;

    async fn load(&self, session: &str) -> Result<Vec<RecoveryResult>, PersistenceError>;
}

/// File-system implementation of all three stores. Layout:
/// `<root>/<session>/checkpoints.json`, `<root>/<session>/groups/<id>.json`,
/// `<root>/<session>/recovery_history.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn session_dir(&self, session: &str) -> PathBuf {
        self.root.join(session)
    }

    fn checkpoint_log(&self, session: &str) -> PathBuf {
        self.session_dir(session).join("checkpoints.json")
    }

    fn group_dir(&self, session: &str) -> PathBuf {
        self.session_dir(session).join("groups")
    }

    fn group_file(&self, session: &str, group_id: &str) -> PathBuf {
        self.group_dir(session).join(format!("{group_id}.json"))
    }

    fn recovery_log(&self, session: &str) -> PathBuf {
        self.session_dir(session).join("recovery_history.json")
    }

    async fn read_checkpoints(&self, session: &str) -> Result<Vec<Checkpoint>, PersistenceError> {
        read_json_or_default(&self.checkpoint_log(session)).await
    }

    async fn write_checkpoints(
        &self,
        session: &str,
        checkpoints: &[Checkpoint],
    ) -> Result<(), PersistenceError> {
        write_json(&self.checkpoint_log(session), &checkpoints).await
    }
}

async fn read_json_or_default<T: serde::de::DeserializeOwned + Default>(
    path: &Path,
) -> Result<T, PersistenceError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes).await?;
    debug!(path = %path.display(), "persisted state document");
    Ok(())
}

#[async_trait]
impl CheckpointStore for FileStore {
    async fn append(&self, session: &str, checkpoint: &Checkpoint) -> Result<(), PersistenceError> {
        let mut log = self.read_checkpoints(session).await?;
        log.push(checkpoint.clone());
        self.write_checkpoints(session, &log).await
    }

    async fn list(&self, session: &str) -> Result<Vec<Checkpoint>, PersistenceError> {
        self.read_checkpoints(session).await
    }

    async fn get(&self, session: &str, id: &str) -> Result<Option<Checkpoint>, PersistenceError> {
        Ok(self
            .read_checkpoints(session)
            .await?
            .into_iter()
            .find(|c| c.id == id))
    }

    async fn record_rollback(&self, session: &str, id: &str) -> Result<Checkpoint, PersistenceError> {
        let mut log = self.read_checkpoints(session).await?;
        let entry = log
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| PersistenceError::CheckpointNotFound(id.to_string()))?;
        entry.rollback_used = true;
        entry.rollback_count += 1;
        let updated = entry.clone();
        self.write_checkpoints(session, &log).await?;
        Ok(updated)
    }
}

#[async_trait]
impl GroupStore for FileStore {
    async fn save(&self, session: &str, record: &GroupExecutionRecord) -> Result<(), PersistenceError> {
        write_json(&self.group_file(session, &record.group_id), record).await
    }

    async fn get(
        &self,
        session: &str,
        group_id: &str,
    ) -> Result<Option<GroupExecutionRecord>, PersistenceError> {
        match fs::read(self.group_file(session, group_id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, session: &str) -> Result<Vec<GroupExecutionRecord>, PersistenceError> {
        let dir = self.group_dir(session);
        let mut records = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(entry.path()).await?;
            records.push(serde_json::from_slice(&bytes)?);
        }
        records.sort_by(|a: &GroupExecutionRecord, b: &GroupExecutionRecord| {
            a.created_at.cmp(&b.created_at)
        });
        Ok(records)
    }

    async fn list_by_status(
        &self,
        session: &str,
        status: GroupStatus,
    ) -> Result<Vec<GroupExecutionRecord>, PersistenceError> {
        Ok(GroupStore::list(self, session)
            .await?
            .into_iter()
            .filter(|r| r.status == status)
            .collect())
    }
}

#[async_trait]
impl RecoveryHistoryStore for FileStore {
    async fn persist(&self, session: &str, history: &[RecoveryResult]) -> Result<(), PersistenceError> {
        write_json(&self.recovery_log(session), &history).await
    }

    async fn load(&self, session: &str) -> Result<Vec<RecoveryResult>, PersistenceError> {
        read_json_or_default(&self.recovery_log(session)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointType;
    use chrono::Utc;
    use tempfile::TempDir;

    fn checkpoint(id: &str) -> Checkpoint {
        Checkpoint {
            id: id.to_string(),
            commit_ref: "abc123".to_string(),
            timestamp: Utc::now(),
            description: "test".to_string(),
            phase: "planning".to_string(),
            checkpoint_type: CheckpointType::Manual,
            tags: vec![],
            snapshot: None,
            operation_context: None,
            rollback_used: false,
            rollback_count: 0,
        }
    }

    #[tokio::test]
    async fn checkpoint_log_appends_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());

        store.append("s1", &checkpoint("cp-1")).await.unwrap();
        store.append("s1", &checkpoint("cp-2")).await.unwrap();

        let log = CheckpointStore::list(&store, "s1").await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].id, "cp-1");

        let found = CheckpointStore::get(&store, "s1", "cp-2").await.unwrap();
        assert!(found.is_some());
        assert!(CheckpointStore::get(&store, "s1", "missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn record_rollback_is_monotonic() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store.append("s1", &checkpoint("cp-1")).await.unwrap();

        let first = store.record_rollback("s1", "cp-1").await.unwrap();
        assert!(first.rollback_used);
        assert_eq!(first.rollback_count, 1);

        let second = store.record_rollback("s1", "cp-1").await.unwrap();
        assert_eq!(second.rollback_count, 2);
    }

    #[tokio::test]
    async fn rollback_on_unknown_checkpoint_fails() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let err = store.record_rollback("s1", "missing").await.unwrap_err();
        assert!(matches!(err, PersistenceError::CheckpointNotFound(_)));
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store.append("s1", &checkpoint("cp-1")).await.unwrap();

        assert!(CheckpointStore::list(&store, "s2").await.unwrap().is_empty());
    }
}
