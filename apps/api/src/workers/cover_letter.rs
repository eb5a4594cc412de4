use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::{mail_task_completed, ProgressReporter, TaskWorker, WorkerError};
use crate::candidates::profile_merge::{candidate_summary, parsed_cv_from_row};
use crate::candidates::CandidateStore;
use crate::generation::{GenerationService, ParsedCv, Tone};
use crate::mail::MailService;
use crate::models::task::{Task, TaskKind};
use crate::tasks::lifecycle::TaskOutput;

#[derive(Debug, Deserialize)]
struct CoverLetterJob {
    #[serde(default)]
    cv_id: Option<Uuid>,
    job_text: String,
    #[serde(default)]
    tone: Tone,
}

pub struct CoverLetterWorker {
    records: Arc<dyn CandidateStore>,
    generation: Arc<dyn GenerationService>,
    mail: Arc<MailService>,
}

impl CoverLetterWorker {
    pub fn new(
        records: Arc<dyn CandidateStore>,
        generation: Arc<dyn GenerationService>,
        mail: Arc<MailService>,
    ) -> Self {
        Self {
            records,
            generation,
            mail,
        }
    }

    /// Structured data of the referenced CV, if it has been parsed.
    async fn cv_data(&self, user_id: Uuid, cv_id: Uuid) -> Result<Option<ParsedCv>, WorkerError> {
        let cv = self
            .records
            .get_cv(cv_id)
            .await?
            .filter(|cv| cv.user_id == user_id)
            .ok_or_else(|| WorkerError::MissingEntity(format!("CV {cv_id} not found")))?;

        let Some(parsed_id) = cv.parsed_resume_id else {
            warn!(%cv_id, "CV has no parsed data, using profile only");
            return Ok(None);
        };
        Ok(self
            .records
            .get_parsed_resume(parsed_id)
            .await?
            .map(|row| parsed_cv_from_row(&row)))
    }
}

#[async_trait]
impl TaskWorker for CoverLetterWorker {
    fn kind(&self) -> TaskKind {
        TaskKind::CoverLetter
    }

    async fn run(
        &self,
        task: &Task,
        payload: &Value,
        progress: &ProgressReporter,
    ) -> Result<TaskOutput, WorkerError> {
        let job: CoverLetterJob = serde_json::from_value(payload.clone())?;
        progress.report(20).await?;

        let user = self
            .records
            .get_user(task.user_id)
            .await?
            .ok_or_else(|| WorkerError::MissingEntity(format!("User {} not found", task.user_id)))?;
        let profile = self.records.get_profile(task.user_id).await?;
        let cv = match job.cv_id {
            Some(cv_id) => self.cv_data(task.user_id, cv_id).await?,
            None => None,
        };
        let candidate = candidate_summary(Some(&user), profile.as_ref(), cv.as_ref());
        progress.report(40).await?;

        let letter = self
            .generation
            .cover_letter(&candidate, &job.job_text, job.tone)
            .await?;
        progress.report(90).await?;

        info!(bullets = letter.bullets.len(), "Cover letter generated");
        Ok(TaskOutput {
            data: Some(serde_json::to_value(&letter)?),
            url: None,
        })
    }

    async fn on_success(&self, task: &Task, _payload: &Value) {
        mail_task_completed(self.records.as_ref(), &self.mail, task).await;
    }
}
