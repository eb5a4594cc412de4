use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::candidates::CandidateStore;
use crate::errors::AppError;
use crate::extraction::ACCEPTED_MIME_TYPES;
use crate::generation::Tone;
use crate::models::cv::{CvDetails, CvRow, CvStatus, NewCv};
use crate::models::task::{Task, TaskKind, TaskPage, TaskStats, TaskStatus};
use crate::models::user::UserPage;
use crate::queue::{EnqueueOptions, JobQueue, JobStatusInfo, QueueName};
use crate::storage::BlobStorage;
use crate::tasks::{StoreError, TaskStore};
use crate::workers::job_payload;

pub const MAX_CV_BYTES: usize = 10 * 1024 * 1024;
pub const CV_FOLDER: &str = "cvs";
pub const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(3600);

const DEFAULT_LIST_LIMIT: i64 = 20;
const MAX_LIST_LIMIT: i64 = 100;

/// Whether the job reached the queue before the response went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Processing,
    /// The job is not in the queue yet; the outbox sweeper will hand it over
    /// later.
    Pending,
}

enum HandOff {
    Enqueued,
    /// An earlier job for the task is still live in the queue.
    Deferred,
    Failed,
}

impl From<HandOff> for DispatchStatus {
    fn from(outcome: HandOff) -> Self {
        match outcome {
            HandOff::Enqueued => DispatchStatus::Processing,
            HandOff::Deferred | HandOff::Failed => DispatchStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchResponse {
    pub task_id: Uuid,
    pub status: DispatchStatus,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoverLetterRequest {
    #[serde(default)]
    pub cv_id: Option<Uuid>,
    pub job_text: String,
    #[serde(default)]
    pub job_url: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CvFixRequest {
    pub goal: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A CV file as received from the client.
#[derive(Debug, Clone)]
pub struct CvUpload {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub cv: CvRow,
    pub task: DispatchResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadLink {
    pub url: String,
    pub filename: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub enqueued: usize,
    /// Markers cleared for tasks that had already left PENDING.
    pub reconciled: usize,
    /// Markers kept because the task's previous job is still live.
    pub deferred: usize,
    pub failed: usize,
}

/// Creates tasks and hands their jobs to the queue.
///
/// Every dispatch writes the task and its outbox marker first, so a job that
/// never reaches the queue is still recoverable by [`Dispatcher::sweep_outbox`].
pub struct Dispatcher {
    tasks: Arc<dyn TaskStore>,
    queue: Arc<dyn JobQueue>,
    records: Arc<dyn CandidateStore>,
    storage: Arc<dyn BlobStorage>,
    enqueue_options: EnqueueOptions,
}

impl Dispatcher {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        queue: Arc<dyn JobQueue>,
        records: Arc<dyn CandidateStore>,
        storage: Arc<dyn BlobStorage>,
        enqueue_options: EnqueueOptions,
    ) -> Self {
        Self {
            tasks,
            queue,
            records,
            storage,
            enqueue_options,
        }
    }

    pub async fn request_cover_letter(
        &self,
        owner: Uuid,
        req: CoverLetterRequest,
    ) -> Result<DispatchResponse, AppError> {
        let job_text = req.job_text.trim();
        if job_text.is_empty() {
            return Err(AppError::Validation("job_text is required".to_string()));
        }
        let tone = match req.tone.as_deref() {
            Some(raw) => raw.parse::<Tone>().map_err(AppError::Validation)?,
            None => Tone::default(),
        };

        self.require_user(owner).await?;
        if let Some(cv_id) = req.cv_id {
            self.owned_cv(owner, cv_id).await?;
        }

        let input = json!({
            "cv_id": req.cv_id,
            "job_text": job_text,
            "job_url": req.job_url,
            "tone": tone,
        });
        self.dispatch(
            TaskKind::CoverLetter,
            owner,
            input,
            "Cover letter generation started",
        )
        .await
    }

    pub async fn request_cv_fix(
        &self,
        owner: Uuid,
        cv_id: Uuid,
        req: CvFixRequest,
    ) -> Result<DispatchResponse, AppError> {
        let goal = req.goal.trim();
        if goal.is_empty() {
            return Err(AppError::Validation("goal is required".to_string()));
        }

        let cv = self.owned_cv(owner, cv_id).await?;
        let status = cv
            .cv_status()
            .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
        if !status.is_fixable() {
            return Err(AppError::PreconditionFailed(format!(
                "CV {cv_id} is {status}; it must be parsed before it can be fixed"
            )));
        }

        let input = json!({
            "cv_id": cv_id,
            "goal": goal,
            "notes": req.notes,
        });
        self.dispatch(TaskKind::FixCv, owner, input, "CV fix started")
            .await
    }

    /// Stores the file, registers the CV and starts parsing it.
    pub async fn upload_cv(&self, owner: Uuid, upload: CvUpload) -> Result<UploadResponse, AppError> {
        if !ACCEPTED_MIME_TYPES.contains(&upload.content_type.as_str()) {
            return Err(AppError::Validation(format!(
                "Unsupported file type '{}'. Upload a PDF or Word document",
                upload.content_type
            )));
        }
        if upload.data.is_empty() {
            return Err(AppError::Validation("Uploaded file is empty".to_string()));
        }
        if upload.data.len() > MAX_CV_BYTES {
            return Err(AppError::Validation(
                "Uploaded file exceeds the 10 MB limit".to_string(),
            ));
        }
        self.require_user(owner).await?;

        let size_bytes = upload.data.len() as i64;
        let stored = self
            .storage
            .put(upload.data, &upload.content_type, CV_FOLDER, &upload.filename)
            .await?;

        let inserted = self
            .records
            .insert_cv(NewCv {
                user_id: owner,
                original_filename: upload.filename,
                s3_key: stored.key.clone(),
                mime_type: upload.content_type,
                size_bytes,
            })
            .await;
        let cv = match inserted {
            Ok(cv) => cv,
            Err(e) => {
                if let Err(cleanup) = self.storage.delete(&stored.key).await {
                    warn!(key = %stored.key, "Failed to remove orphaned upload: {cleanup}");
                }
                return Err(e.into());
            }
        };
        info!(cv_id = %cv.id, user_id = %owner, size_bytes, "CV uploaded");

        let (cv, task) = self.dispatch_parse(cv, "CV uploaded, parsing started").await?;
        Ok(UploadResponse { cv, task })
    }

    pub async fn request_cv_reparse(
        &self,
        owner: Uuid,
        cv_id: Uuid,
    ) -> Result<DispatchResponse, AppError> {
        let cv = self.owned_cv(owner, cv_id).await?;
        let (_, task) = self.dispatch_parse(cv, "CV parsing restarted").await?;
        Ok(task)
    }

    pub async fn download_cv(&self, owner: Uuid, cv_id: Uuid) -> Result<DownloadLink, AppError> {
        let cv = self.owned_cv(owner, cv_id).await?;
        let url = self.storage.signed_url(&cv.s3_key, DOWNLOAD_URL_TTL).await?;
        Ok(DownloadLink {
            url,
            filename: cv.original_filename,
            expires_in: DOWNLOAD_URL_TTL.as_secs(),
        })
    }

    pub async fn list_cvs(&self, owner: Uuid) -> Result<Vec<CvDetails>, AppError> {
        Ok(self.records.list_cvs(owner).await?)
    }

    pub async fn get_cv(&self, owner: Uuid, cv_id: Uuid) -> Result<CvDetails, AppError> {
        let cv = self.owned_cv(owner, cv_id).await?;
        let parsed_data = match cv.parsed_resume_id {
            Some(id) => self
                .records
                .get_parsed_resume(id)
                .await?
                .map(|row| row.json_payload),
            None => None,
        };
        Ok(CvDetails { cv, parsed_data })
    }

    /// Deletes the record first; a file left behind by a failed blob delete
    /// is only logged.
    pub async fn delete_cv(&self, owner: Uuid, cv_id: Uuid) -> Result<(), AppError> {
        self.owned_cv(owner, cv_id).await?;
        let cv = self.records.delete_cv(cv_id).await?;
        if let Err(e) = self.storage.delete(&cv.s3_key).await {
            warn!(%cv_id, key = %cv.s3_key, "Failed to delete CV file: {e}");
        }
        info!(%cv_id, user_id = %owner, filename = %cv.original_filename, "CV deleted");
        Ok(())
    }

    pub async fn list_users(
        &self,
        page: Option<i64>,
        limit: Option<i64>,
    ) -> Result<UserPage, AppError> {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        Ok(self.records.list_users(page, limit).await?)
    }

    /// Admin retry of a FAILED task with its original input.
    pub async fn retry_task(&self, task_id: Uuid) -> Result<DispatchResponse, AppError> {
        let task = self.tasks.reset_for_retry(task_id).await?;
        info!(task_id = %task.id, kind = %task.kind, "Task reset for retry");
        let status = self.hand_off(&task).await.into();
        Ok(DispatchResponse {
            task_id: task.id,
            status,
            message: "Task queued for retry".to_string(),
        })
    }

    /// Hands over every outbox marker created at or before `older_than`.
    pub async fn sweep_outbox(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<SweepReport, StoreError> {
        let entries = self.tasks.pending_outbox(older_than, limit).await?;
        let mut report = SweepReport {
            scanned: entries.len(),
            ..SweepReport::default()
        };

        for entry in entries {
            let task = match self.tasks.get(entry.task_id).await {
                Ok(task) => task,
                Err(e) => {
                    warn!(task_id = %entry.task_id, "Outbox sweep could not load task: {e}");
                    report.failed += 1;
                    continue;
                }
            };

            if task.status != TaskStatus::Pending {
                match self.tasks.mark_dispatched(task.id).await {
                    Ok(_) => report.reconciled += 1,
                    Err(e) => {
                        warn!(task_id = %task.id, "Failed to clear outbox marker: {e}");
                        report.failed += 1;
                    }
                }
                continue;
            }

            match self.hand_off(&task).await {
                HandOff::Enqueued => report.enqueued += 1,
                HandOff::Deferred => report.deferred += 1,
                HandOff::Failed => report.failed += 1,
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                enqueued = report.enqueued,
                reconciled = report.reconciled,
                deferred = report.deferred,
                failed = report.failed,
                "Outbox sweep finished"
            );
        }
        Ok(report)
    }

    pub async fn get_task(&self, owner: Uuid, task_id: Uuid) -> Result<Task, AppError> {
        let task = self.tasks.get(task_id).await?;
        if task.user_id != owner {
            return Err(AppError::Forbidden);
        }
        Ok(task)
    }

    pub async fn list_tasks(&self, owner: Uuid, limit: Option<i64>) -> Result<Vec<Task>, AppError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        Ok(self.tasks.list_by_owner(owner, limit).await?)
    }

    pub async fn list_all_tasks(
        &self,
        page: Option<i64>,
        limit: Option<i64>,
    ) -> Result<TaskPage, AppError> {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        Ok(self.tasks.list_all(page, limit).await?)
    }

    pub async fn task_stats(&self) -> Result<TaskStats, AppError> {
        Ok(self.tasks.stats().await?)
    }

    /// Queue-side view of the task's job. Jobs share the task's id.
    pub async fn job_status(&self, task_id: Uuid) -> Result<JobStatusInfo, AppError> {
        let task = self.tasks.get(task_id).await?;
        self.queue
            .status(QueueName::from(task.kind), task.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No queue job for task {task_id}")))
    }

    async fn dispatch(
        &self,
        kind: TaskKind,
        owner: Uuid,
        input: Value,
        message: &str,
    ) -> Result<DispatchResponse, AppError> {
        let task = self.tasks.create(kind, owner, input).await?;
        info!(task_id = %task.id, kind = %kind, user_id = %owner, "Task created");
        let status = self.hand_off(&task).await.into();
        Ok(DispatchResponse {
            task_id: task.id,
            status,
            message: message.to_string(),
        })
    }

    /// The CV is flipped to PARSING before the job exists, so a fast worker
    /// can never have its PARSED overwritten.
    async fn dispatch_parse(
        &self,
        mut cv: CvRow,
        message: &str,
    ) -> Result<(CvRow, DispatchResponse), AppError> {
        self.records
            .set_cv_status(cv.id, CvStatus::Parsing, None)
            .await?;
        cv.status = CvStatus::Parsing.as_str().to_string();
        cv.error_message = None;

        let input = json!({
            "cv_id": cv.id,
            "s3_key": cv.s3_key,
            "mime_type": cv.mime_type,
        });
        let task = self.dispatch(TaskKind::Parse, cv.user_id, input, message).await?;
        Ok((cv, task))
    }

    /// Enqueues the task's job and clears its outbox marker. The marker stays
    /// when enqueue fails or when an older job for the task is still live:
    /// that job either claims the PENDING task itself, and the sweeper then
    /// reconciles the marker, or it ends and the sweeper enqueues afresh.
    async fn hand_off(&self, task: &Task) -> HandOff {
        let queue = QueueName::from(task.kind);
        match self
            .queue
            .enqueue(queue, task.id, job_payload(task), self.enqueue_options)
            .await
        {
            Ok(true) => {
                if let Err(e) = self.tasks.mark_dispatched(task.id).await {
                    warn!(task_id = %task.id, "Failed to mark task dispatched: {e}");
                }
                HandOff::Enqueued
            }
            Ok(false) => {
                info!(task_id = %task.id, %queue, "Previous job still live, deferring hand-off");
                if let Err(e) = self
                    .tasks
                    .record_outbox_failure(task.id, "previous job still live")
                    .await
                {
                    warn!(task_id = %task.id, "Failed to record outbox deferral: {e}");
                }
                HandOff::Deferred
            }
            Err(e) => {
                warn!(task_id = %task.id, %queue, "Enqueue failed, leaving task to the outbox sweeper: {e}");
                if let Err(e) = self.tasks.record_outbox_failure(task.id, &e.to_string()).await {
                    warn!(task_id = %task.id, "Failed to record outbox failure: {e}");
                }
                HandOff::Failed
            }
        }
    }

    async fn require_user(&self, user_id: Uuid) -> Result<(), AppError> {
        match self.records.get_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::NotFound(format!("User {user_id} not found"))),
        }
    }

    async fn owned_cv(&self, owner: Uuid, cv_id: Uuid) -> Result<CvRow, AppError> {
        let cv = self
            .records
            .get_cv(cv_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("CV {cv_id} not found")))?;
        if cv.user_id != owner {
            return Err(AppError::Forbidden);
        }
        Ok(cv)
    }
}
