use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::{task_owner, ProgressReporter, TaskWorker, WorkerError};
use crate::candidates::CandidateStore;
use crate::extraction::extract_text;
use crate::generation::{GenerationService, ParsedCv};
use crate::mail::MailService;
use crate::models::cv::{CvStatus, ParsedResumeRow};
use crate::models::task::{Task, TaskKind};
use crate::notify::{Notifier, CV_PARSED};
use crate::storage::BlobStorage;
use crate::tasks::lifecycle::TaskOutput;

/// Stored raw text is capped at this many characters.
pub const RAW_TEXT_LIMIT: usize = 10_000;

#[derive(Debug, Deserialize)]
struct ParseJob {
    cv_id: Uuid,
    s3_key: String,
    mime_type: String,
}

/// Extracts text from an uploaded CV, structures it, stores the parse and
/// fills the empty fields of the owner's profile.
pub struct CvParseWorker {
    records: Arc<dyn CandidateStore>,
    storage: Arc<dyn BlobStorage>,
    generation: Arc<dyn GenerationService>,
    notifier: Arc<dyn Notifier>,
    mail: Arc<MailService>,
}

impl CvParseWorker {
    pub fn new(
        records: Arc<dyn CandidateStore>,
        storage: Arc<dyn BlobStorage>,
        generation: Arc<dyn GenerationService>,
        notifier: Arc<dyn Notifier>,
        mail: Arc<MailService>,
    ) -> Self {
        Self {
            records,
            storage,
            generation,
            notifier,
            mail,
        }
    }

    /// Greets the owner by profile name, falling back to the address.
    async fn mail_cv_processed(&self, task: &Task, cv_id: Uuid) {
        let Some(owner) = task_owner(self.records.as_ref(), task).await else {
            return;
        };
        let name = match self.records.get_profile(owner.id).await {
            Ok(Some(profile)) => profile.full_name.filter(|n| !n.trim().is_empty()),
            _ => None,
        }
        .unwrap_or_else(|| owner.email.clone());
        if let Err(e) = self.mail.send_cv_processed(&owner.email, &name, cv_id).await {
            warn!(%cv_id, "Failed to send CV processed email: {e}");
        }
    }
}

#[async_trait]
impl TaskWorker for CvParseWorker {
    fn kind(&self) -> TaskKind {
        TaskKind::Parse
    }

    async fn run(
        &self,
        task: &Task,
        payload: &Value,
        progress: &ProgressReporter,
    ) -> Result<TaskOutput, WorkerError> {
        let job: ParseJob = serde_json::from_value(payload.clone())?;
        let cv = self
            .records
            .get_cv(job.cv_id)
            .await?
            .ok_or_else(|| WorkerError::MissingEntity(format!("CV {} not found", job.cv_id)))?;
        self.records
            .set_cv_status(cv.id, CvStatus::Parsing, None)
            .await?;
        progress.report(10).await?;

        let data = self.storage.get(&job.s3_key).await?;
        progress.report(30).await?;

        let text = extract_text(data, &job.mime_type).await?;
        progress.report(50).await?;

        let (parsed, fallback) = match self.generation.parse_cv(&text).await {
            Ok(parsed) => (parsed, false),
            Err(e) => {
                warn!(cv_id = %cv.id, "Structured parse failed, keeping raw text only: {e}");
                (ParsedCv::default(), true)
            }
        };
        progress.report(80).await?;

        let mut json_payload = serde_json::to_value(&parsed)?;
        if fallback {
            json_payload["fallback"] = json!(true);
        }
        let row = ParsedResumeRow {
            id: Uuid::new_v4(),
            json_payload,
            skills: parsed.skills.clone(),
            positions: Value::Array(parsed.positions.clone()),
            raw_text: text.chars().take(RAW_TEXT_LIMIT).collect(),
            created_at: Utc::now(),
        };
        self.records.attach_parsed_resume(cv.id, &row).await?;

        let filled = self
            .records
            .fill_profile(task.user_id, &parsed, Utc::now())
            .await?;
        info!(cv_id = %cv.id, ?filled, fallback, "CV parsed");

        Ok(TaskOutput {
            data: Some(json!({
                "cv_id": cv.id,
                "parsed_resume_id": row.id,
                "fallback": fallback,
                "profile_fields_filled": filled,
            })),
            url: None,
        })
    }

    async fn on_success(&self, task: &Task, _payload: &Value) {
        let data = task.output_data.clone().unwrap_or(Value::Null);
        self.notifier.notify(
            task.user_id,
            CV_PARSED,
            json!({
                "task_id": task.id,
                "cv_id": data["cv_id"],
                "parsed_resume_id": data["parsed_resume_id"],
            }),
        );
        if let Some(cv_id) = data["cv_id"].as_str().and_then(|id| Uuid::parse_str(id).ok()) {
            self.mail_cv_processed(task, cv_id).await;
        }
    }

    async fn on_failure(&self, _task: &Task, payload: &Value, error: &WorkerError) {
        let Some(cv_id) = payload
            .get("cv_id")
            .and_then(Value::as_str)
            .and_then(|id| Uuid::parse_str(id).ok())
        else {
            return;
        };
        if let Err(e) = self
            .records
            .set_cv_status(cv_id, CvStatus::Error, Some(&error.to_string()))
            .await
        {
            warn!(%cv_id, "Failed to mark CV as errored: {e}");
        }
    }
}
