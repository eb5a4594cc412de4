use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::{mail_task_completed, ProgressReporter, TaskWorker, WorkerError};
use crate::candidates::CandidateStore;
use crate::extraction::MIME_PDF;
use crate::generation::GenerationService;
use crate::mail::MailService;
use crate::models::cv::CvStatus;
use crate::models::task::{Task, TaskKind};
use crate::render::render_markdown_pdf;
use crate::storage::BlobStorage;
use crate::tasks::lifecycle::TaskOutput;

pub const FIXED_CV_FOLDER: &str = "fixed-cvs";

#[derive(Debug, Deserialize)]
struct FixJob {
    cv_id: Uuid,
    goal: String,
    #[serde(default)]
    notes: Option<String>,
}

/// Rewrites a parsed CV toward a goal and publishes it as a PDF.
pub struct CvFixWorker {
    records: Arc<dyn CandidateStore>,
    storage: Arc<dyn BlobStorage>,
    generation: Arc<dyn GenerationService>,
    mail: Arc<MailService>,
}

impl CvFixWorker {
    pub fn new(
        records: Arc<dyn CandidateStore>,
        storage: Arc<dyn BlobStorage>,
        generation: Arc<dyn GenerationService>,
        mail: Arc<MailService>,
    ) -> Self {
        Self {
            records,
            storage,
            generation,
            mail,
        }
    }
}

#[async_trait]
impl TaskWorker for CvFixWorker {
    fn kind(&self) -> TaskKind {
        TaskKind::FixCv
    }

    async fn run(
        &self,
        _task: &Task,
        payload: &Value,
        progress: &ProgressReporter,
    ) -> Result<TaskOutput, WorkerError> {
        let job: FixJob = serde_json::from_value(payload.clone())?;
        progress.report(10).await?;

        let cv = self
            .records
            .get_cv(job.cv_id)
            .await?
            .ok_or_else(|| WorkerError::MissingEntity(format!("CV {} not found", job.cv_id)))?;
        let parsed = match cv.parsed_resume_id {
            Some(id) => self.records.get_parsed_resume(id).await?,
            None => None,
        }
        .ok_or_else(|| {
            WorkerError::MissingEntity(format!("CV {} has no parsed data", job.cv_id))
        })?;
        progress.report(30).await?;

        let fixed = self
            .generation
            .fix_cv(&parsed.json_payload, &job.goal, job.notes.as_deref())
            .await?;
        progress.report(60).await?;

        let pdf = render_markdown_pdf(&fixed.improved_cv_markdown)?;
        progress.report(80).await?;

        let filename = format!("improved-cv-{}.pdf", Utc::now().timestamp_millis());
        let stored = self
            .storage
            .put(Bytes::from(pdf), MIME_PDF, FIXED_CV_FOLDER, &filename)
            .await?;
        progress.report(90).await?;

        info!(cv_id = %cv.id, key = %stored.key, "Improved CV uploaded");
        Ok(TaskOutput {
            data: Some(json!({
                "changelog": fixed.changelog,
                "goal": job.goal,
                "s3_key": stored.key,
            })),
            url: Some(stored.url),
        })
    }

    async fn on_success(&self, task: &Task, payload: &Value) {
        if let Ok(job) = serde_json::from_value::<FixJob>(payload.clone()) {
            if let Err(e) = self
                .records
                .set_cv_status(job.cv_id, CvStatus::Fixed, None)
                .await
            {
                warn!(cv_id = %job.cv_id, "Failed to mark CV as fixed: {e}");
            }
        }
        mail_task_completed(self.records.as_ref(), &self.mail, task).await;
    }
}
