use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::models::task::{
    OutboxEntry, Task, TaskKind, TaskPage, TaskRow, TaskStats, TaskStatus,
};
use crate::tasks::lifecycle::{apply, TaskUpdate};
use crate::tasks::store::{total_pages, StoreError, TaskStore};

pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_task(row: TaskRow) -> Result<Task, StoreError> {
    Task::try_from(row).map_err(StoreError::Corrupt)
}

async fn lock_task(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Task, StoreError> {
    let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StoreError::NotFound(id))?;
    into_task(row)
}

async fn write_task(tx: &mut Transaction<'_, Postgres>, task: &Task) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        UPDATE tasks
        SET status = $2, output_data = $3, output_url = $4, error = $5,
            progress = $6, version = $7, finished_at = $8
        WHERE id = $1
        "#,
    )
    .bind(task.id)
    .bind(task.status.as_str())
    .bind(&task.output_data)
    .bind(&task.output_url)
    .bind(&task.error)
    .bind(i16::from(task.progress))
    .bind(task.version)
    .bind(task.finished_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl TaskStore for PgTaskStore {
    #[instrument(skip(self, input), fields(kind = %kind, user_id = %user_id))]
    async fn create(&self, kind: TaskKind, user_id: Uuid, input: Value) -> Result<Task, StoreError> {
        let task = Task::new(kind, user_id, input);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO tasks (id, user_id, kind, status, input, progress, version, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(task.id)
        .bind(task.user_id)
        .bind(task.kind.as_str())
        .bind(task.status.as_str())
        .bind(&task.input)
        .bind(i16::from(task.progress))
        .bind(task.version)
        .bind(task.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO task_outbox (task_id, created_at) VALUES ($1, $2)")
            .bind(task.id)
            .bind(task.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(task_id = %task.id, "Task created");
        Ok(task)
    }

    async fn get(&self, id: Uuid) -> Result<Task, StoreError> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        into_task(row)
    }

    #[instrument(skip(self, update), fields(task_id = %id))]
    async fn update(&self, id: Uuid, update: TaskUpdate) -> Result<Task, StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = lock_task(&mut tx, id).await?;
        let next = apply(&current, &update, Utc::now())?;
        write_task(&mut tx, &next).await?;
        tx.commit().await?;
        Ok(next)
    }

    async fn list_by_owner(&self, user_id: Uuid, limit: i64) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(into_task).collect()
    }

    async fn list_all(&self, page: i64, limit: i64) -> Result<TaskPage, StoreError> {
        let offset = (page.max(1) - 1) * limit;
        let rows = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM tasks ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(&self.pool)
            .await?;

        Ok(TaskPage {
            tasks: rows.into_iter().map(into_task).collect::<Result<_, _>>()?,
            total,
            page: page.max(1),
            total_pages: total_pages(total, limit),
        })
    }

    async fn stats(&self) -> Result<TaskStats, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = TaskStats::default();
        for (status, count) in rows {
            let status: TaskStatus = status.parse().map_err(StoreError::Corrupt)?;
            match status {
                TaskStatus::Pending => stats.pending = count,
                TaskStatus::InProgress => stats.in_progress = count,
                TaskStatus::Completed => stats.completed = count,
                TaskStatus::Failed => stats.failed = count,
            }
            stats.total += count;
        }
        Ok(stats)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn reset_for_retry(&self, id: Uuid) -> Result<Task, StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = lock_task(&mut tx, id).await?;
        let next = apply(&current, &TaskUpdate::retry(), Utc::now())?;
        write_task(&mut tx, &next).await?;

        sqlx::query(
            r#"
            INSERT INTO task_outbox (task_id, created_at) VALUES ($1, now())
            ON CONFLICT (task_id) DO UPDATE
            SET created_at = now(), attempts = 0, last_error = NULL
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn mark_dispatched(&self, id: Uuid) -> Result<Task, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut task = lock_task(&mut tx, id).await?;
        if task.status == TaskStatus::Pending {
            task = apply(&task, &TaskUpdate::dispatched(), Utc::now())?;
            write_task(&mut tx, &task).await?;
        }

        sqlx::query("DELETE FROM task_outbox WHERE task_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(task)
    }

    async fn pending_outbox(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        Ok(sqlx::query_as::<_, OutboxEntry>(
            r#"
            SELECT task_id, created_at, attempts, last_error
            FROM task_outbox
            WHERE created_at <= $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn record_outbox_failure(&self, task_id: Uuid, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE task_outbox SET attempts = attempts + 1, last_error = $2 WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
