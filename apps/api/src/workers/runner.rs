use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{error, info, info_span, warn, Instrument};

use super::{JobHeader, ProgressReporter, TaskWorker, WorkerError};
use crate::models::task::{Task, TaskStatus};
use crate::notify::{Notifier, TASK_COMPLETED, TASK_FAILED};
use crate::queue::{Delivery, JobFailure, JobHandler, JobQueue};
use crate::tasks::lifecycle::TaskOutput;
use crate::tasks::{StoreError, TaskStore, TaskUpdate};

/// Adapts a [`TaskWorker`] to the queue consumer.
pub struct TaskRunner {
    worker: Arc<dyn TaskWorker>,
    tasks: Arc<dyn TaskStore>,
    queue: Arc<dyn JobQueue>,
    notifier: Arc<dyn Notifier>,
}

impl TaskRunner {
    pub fn new(
        worker: Arc<dyn TaskWorker>,
        tasks: Arc<dyn TaskStore>,
        queue: Arc<dyn JobQueue>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            worker,
            tasks,
            queue,
            notifier,
        }
    }

    async fn execute(&self, header: JobHeader, delivery: &Delivery) -> Result<Value, JobFailure> {
        let task = match self.tasks.get(header.task_id).await {
            Ok(task) => task,
            Err(StoreError::NotFound(id)) => {
                return Err(JobFailure::fatal(format!("task {id} not found")))
            }
            Err(e) => return Err(JobFailure::retryable(e.to_string())),
        };

        if task.kind != self.worker.kind() {
            return Err(JobFailure::fatal(format!(
                "task {} is {}, not {}",
                task.id,
                task.kind,
                self.worker.kind()
            )));
        }

        if task.status == TaskStatus::Completed {
            info!("Task already completed, skipping duplicate delivery");
            return Ok(completed_result(&task));
        }

        let task = match self.tasks.update(task.id, TaskUpdate::claim(task.version)).await {
            Ok(task) => task,
            Err(e @ (StoreError::StaleVersion { .. } | StoreError::InvalidTransition { .. })) => {
                warn!("Task claimed concurrently, dropping delivery: {e}");
                return Err(JobFailure::superseded(e.to_string()));
            }
            Err(e) => return Err(JobFailure::retryable(e.to_string())),
        };

        let reporter = ProgressReporter {
            tasks: self.tasks.clone(),
            queue: self.queue.clone(),
            notifier: self.notifier.clone(),
            task_id: task.id,
            user_id: task.user_id,
            kind: task.kind,
            job_id: delivery.id,
            lease: delivery.lease,
            version: task.version,
        };

        match self.worker.run(&task, &delivery.payload, &reporter).await {
            Ok(output) => self.succeed(&task, &delivery.payload, output).await,
            Err(err) => Err(self.fail(&task, delivery, err).await),
        }
    }

    async fn succeed(
        &self,
        task: &Task,
        payload: &Value,
        output: TaskOutput,
    ) -> Result<Value, JobFailure> {
        let completed = match self
            .tasks
            .update(task.id, TaskUpdate::complete(task.version, output))
            .await
        {
            Ok(completed) => completed,
            Err(e @ StoreError::StaleVersion { .. }) => {
                warn!("Dropping stale completion: {e}");
                return Err(JobFailure::superseded(WorkerError::Superseded.to_string()));
            }
            Err(e) => return Err(JobFailure::retryable(e.to_string())),
        };

        info!("Task completed");
        self.worker.on_success(&completed, payload).await;
        self.notifier.notify(
            completed.user_id,
            TASK_COMPLETED,
            json!({
                "task_id": completed.id,
                "kind": completed.kind,
                "label": completed.kind.label(),
                "status": completed.status,
                "output_data": completed.output_data,
                "output_url": completed.output_url,
            }),
        );
        Ok(completed_result(&completed))
    }

    async fn fail(&self, task: &Task, delivery: &Delivery, err: WorkerError) -> JobFailure {
        let message = err.to_string();
        let retryable = err.is_retryable();
        warn!(retryable, "Task attempt failed: {message}");

        if matches!(err, WorkerError::Superseded) {
            return JobFailure::superseded(message);
        }

        self.worker.on_failure(task, &delivery.payload, &err).await;

        match self
            .tasks
            .update(task.id, TaskUpdate::fail(task.version, message.clone()))
            .await
        {
            Ok(failed) => self.notifier.notify(
                failed.user_id,
                TASK_FAILED,
                json!({
                    "task_id": failed.id,
                    "kind": failed.kind,
                    "label": failed.kind.label(),
                    "error": message,
                    "will_retry": retryable && delivery.attempt < delivery.max_attempts,
                }),
            ),
            Err(e @ StoreError::StaleVersion { .. }) => {
                warn!("Dropping stale failure: {e}");
                return JobFailure::superseded(message);
            }
            Err(e) => error!("Failed to record task failure: {e}"),
        }

        if retryable {
            JobFailure::retryable(message)
        } else {
            JobFailure::fatal(message)
        }
    }

    /// Fails a task whose job will not be delivered again. Only a task still
    /// IN_PROGRESS is touched; anything else was already settled or re-queued.
    async fn abandon_task(&self, header: JobHeader, delivery: &Delivery, reason: &str) {
        let task = match self.tasks.get(header.task_id).await {
            Ok(task) => task,
            Err(e) => {
                error!("Failed to load abandoned task: {e}");
                return;
            }
        };
        if task.status != TaskStatus::InProgress {
            info!(status = %task.status, "Abandoned job's task already settled");
            return;
        }
        self.fail(&task, delivery, WorkerError::Abandoned(reason.to_string()))
            .await;
    }
}

#[async_trait]
impl JobHandler for TaskRunner {
    async fn handle(&self, delivery: &Delivery) -> Result<Value, JobFailure> {
        let header: JobHeader = serde_json::from_value(delivery.payload.clone())
            .map_err(|e| JobFailure::fatal(format!("invalid job payload: {e}")))?;

        let span = self.span(&header, delivery);
        self.execute(header, delivery).instrument(span).await
    }

    async fn abandon(&self, delivery: &Delivery, reason: &str) {
        let header: JobHeader = match serde_json::from_value(delivery.payload.clone()) {
            Ok(header) => header,
            Err(e) => {
                warn!(job_id = %delivery.id, "Abandoned job has no task header: {e}");
                return;
            }
        };
        let span = self.span(&header, delivery);
        self.abandon_task(header, delivery, reason)
            .instrument(span)
            .await
    }
}

impl TaskRunner {
    fn span(&self, header: &JobHeader, delivery: &Delivery) -> tracing::Span {
        info_span!(
            "job",
            task_id = %header.task_id,
            kind = %self.worker.kind(),
            job_id = %delivery.id,
            attempt = delivery.attempt,
        )
    }
}

fn completed_result(task: &Task) -> Value {
    json!({
        "task_id": task.id,
        "status": task.status,
        "output_data": task.output_data,
        "output_url": task.output_url,
    })
}
