//! Background workers: one per task kind, all driven by [`TaskRunner`].
//!
//! A worker only implements its pipeline. Claiming the task, progress
//! fan-out, completion, failure and notifications are the runner's job.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::candidates::{CandidateStore, RecordError};
use crate::extraction::ExtractionError;
use crate::generation::GenerationError;
use crate::mail::MailService;
use crate::models::task::{Task, TaskKind};
use crate::models::user::User;
use crate::notify::{Notifier, TASK_PROGRESS};
use crate::queue::{JobQueue, QueueName};
use crate::render::RenderError;
use crate::storage::StorageError;
use crate::tasks::lifecycle::TaskOutput;
use crate::tasks::{StoreError, TaskStore, TaskUpdate};

pub mod cover_letter;
pub mod cv_fix;
pub mod cv_parse;
pub mod runner;

pub use cover_letter::CoverLetterWorker;
pub use cv_fix::CvFixWorker;
pub use cv_parse::CvParseWorker;
pub use runner::TaskRunner;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("{0}")]
    MissingEntity(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("PDF rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Records(#[from] RecordError),

    #[error("task was taken over by a newer attempt")]
    Superseded,

    #[error("{0}")]
    Abandoned(String),
}

impl WorkerError {
    /// Whether another delivery of the same job could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Payload(_)
            | WorkerError::MissingEntity(_)
            | WorkerError::Render(_)
            | WorkerError::Superseded
            | WorkerError::Abandoned(_) => false,
            WorkerError::Extraction(e) => matches!(e, ExtractionError::Join(_)),
            WorkerError::Generation(e) => e.is_transient(),
            WorkerError::Storage(e) => !matches!(e, StorageError::NotFound(_)),
            WorkerError::Store(e) => matches!(e, StoreError::Database(_)),
            WorkerError::Records(e) => matches!(e, RecordError::Database(_)),
        }
    }
}

/// Fields every job payload carries besides its kind-specific params.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JobHeader {
    pub task_id: Uuid,
    pub user_id: Uuid,
}

/// Queue payload for a task: its input plus `task_id` and `user_id`.
/// Admin retries rebuild the same payload from the stored input.
pub fn job_payload(task: &Task) -> Value {
    let mut payload = match &task.input {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };
    payload.insert("task_id".to_string(), json!(task.id));
    payload.insert("user_id".to_string(), json!(task.user_id));
    Value::Object(payload)
}

/// Writes a progress checkpoint to the task, the queue job and the user.
pub struct ProgressReporter {
    pub(crate) tasks: Arc<dyn TaskStore>,
    pub(crate) queue: Arc<dyn JobQueue>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) task_id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) kind: TaskKind,
    pub(crate) job_id: Uuid,
    pub(crate) lease: Uuid,
    pub(crate) version: i32,
}

impl ProgressReporter {
    /// A stale version means another attempt owns the task now; the caller
    /// must stop. Queue and notifier failures are only logged.
    pub async fn report(&self, progress: u8) -> Result<(), WorkerError> {
        match self
            .tasks
            .update(self.task_id, TaskUpdate::progress(self.version, progress))
            .await
        {
            Ok(_) => {}
            Err(StoreError::StaleVersion { .. }) => {
                warn!(task_id = %self.task_id, progress, "Progress write is stale, stopping attempt");
                return Err(WorkerError::Superseded);
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self
            .queue
            .report_progress(QueueName::from(self.kind), self.job_id, self.lease, progress)
            .await
        {
            warn!(task_id = %self.task_id, "Failed to report job progress: {e}");
        }

        self.notifier.notify(
            self.user_id,
            TASK_PROGRESS,
            json!({
                "task_id": self.task_id,
                "kind": self.kind,
                "progress": progress,
            }),
        );
        Ok(())
    }
}

/// The owner of `task`, if the account still exists.
pub(crate) async fn task_owner(records: &dyn CandidateStore, task: &Task) -> Option<User> {
    match records.get_user(task.user_id).await {
        Ok(user) => user,
        Err(e) => {
            warn!(task_id = %task.id, "Failed to load task owner: {e}");
            None
        }
    }
}

/// Emails the owner that a finished task's result is ready.
pub(crate) async fn mail_task_completed(
    records: &dyn CandidateStore,
    mail: &MailService,
    task: &Task,
) {
    let Some(owner) = task_owner(records, task).await else {
        return;
    };
    if let Err(e) = mail
        .send_task_completed(&owner.email, task.kind.label(), task.id)
        .await
    {
        warn!(task_id = %task.id, "Failed to send completion email: {e}");
    }
}

#[async_trait]
pub trait TaskWorker: Send + Sync {
    fn kind(&self) -> TaskKind;

    /// Runs the pipeline for one attempt. `payload` is the raw job payload.
    async fn run(
        &self,
        task: &Task,
        payload: &Value,
        progress: &ProgressReporter,
    ) -> Result<TaskOutput, WorkerError>;

    /// Entity reconciliation after the task is COMPLETED. Best-effort.
    async fn on_success(&self, _task: &Task, _payload: &Value) {}

    /// Entity reconciliation after a failed attempt. Best-effort.
    async fn on_failure(&self, _task: &Task, _payload: &Value, _error: &WorkerError) {}
}
