use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::models::task::{OutboxEntry, Task, TaskKind, TaskPage, TaskStats, TaskStatus};
use crate::tasks::lifecycle::TaskUpdate;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error("stale write on task {task_id}: expected version {expected}, found {actual}")]
    StaleVersion {
        task_id: Uuid,
        expected: i32,
        actual: i32,
    },

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("invalid task update: {0}")]
    InvalidUpdate(String),

    #[error("corrupt task row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable record of every task. Reads always hit the backing store.
///
/// Ownership checks are the caller's job; the store only knows ids.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a PENDING task together with its outbox marker.
    async fn create(&self, kind: TaskKind, user_id: Uuid, input: Value) -> Result<Task, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Task, StoreError>;

    async fn update(&self, id: Uuid, update: TaskUpdate) -> Result<Task, StoreError>;

    /// Newest first, at most `limit` rows.
    async fn list_by_owner(&self, user_id: Uuid, limit: i64) -> Result<Vec<Task>, StoreError>;

    /// Newest first. `page` is 1-based.
    async fn list_all(&self, page: i64, limit: i64) -> Result<TaskPage, StoreError>;

    async fn stats(&self) -> Result<TaskStats, StoreError>;

    /// FAILED → PENDING and a fresh outbox marker, in one transaction.
    async fn reset_for_retry(&self, id: Uuid) -> Result<Task, StoreError>;

    /// PENDING → IN_PROGRESS once the job is queued; clears the outbox marker.
    /// A task a worker already claimed is left as is.
    async fn mark_dispatched(&self, id: Uuid) -> Result<Task, StoreError>;

    /// Outbox markers created at or before `older_than`, oldest first.
    async fn pending_outbox(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, StoreError>;

    async fn record_outbox_failure(&self, task_id: Uuid, error: &str) -> Result<(), StoreError>;
}

pub(crate) fn total_pages(total: i64, limit: i64) -> i64 {
    if limit <= 0 {
        return 0;
    }
    (total + limit - 1) / limit
}
