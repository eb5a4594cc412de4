//! In-memory wiring of the whole pipeline, plus the scenarios that cross
//! dispatcher, queue, workers and notifier.

use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};

use crate::auth::otp::memory::InMemoryOtpStore;
use crate::candidates::memory_store::InMemoryCandidateStore;
use crate::dispatch::Dispatcher;
use crate::generation::{
    CoverLetter, FixedCv, GenerationError, GenerationService, ParsedCv, Tone,
};
use crate::mail::recording::RecordingMailer;
use crate::mail::MailService;
use crate::notify::recording::RecordingNotifier;
use crate::notify::SessionRegistry;
use crate::queue::memory_queue::InMemoryQueue;
use crate::queue::{Backoff, ConsumerSettings, EnqueueOptions, QueueConsumer, QueueName};
use crate::state::AppState;
use crate::storage::memory::InMemoryBlobStorage;
use crate::tasks::memory_store::InMemoryTaskStore;
use crate::workers::{CoverLetterWorker, CvFixWorker, CvParseWorker, TaskRunner, TaskWorker};

/// Scripted [`GenerationService`]. Failures are consumed one call at a time.
pub struct FakeGeneration {
    pub parsed: ParsedCv,
    pub fixed_markdown: String,
    parse_failures: AtomicUsize,
    letter_failures: AtomicUsize,
    letter_calls: AtomicUsize,
    last_letter: Mutex<Option<(Value, String, Tone)>>,
}

impl Default for FakeGeneration {
    fn default() -> Self {
        Self {
            parsed: ParsedCv {
                full_name: Some("Jane Doe".to_string()),
                email: Some("jane@example.com".to_string()),
                location: Some("Berlin".to_string()),
                summary: Some("Backend engineer".to_string()),
                positions: vec![json!({"title": "Engineer", "company": "Acme"})],
                skills: vec!["Rust".to_string(), "Postgres".to_string()],
                ..ParsedCv::default()
            },
            fixed_markdown: "# Jane Doe\n\n## Experience\n\n- Built **queues** at Acme\n".to_string(),
            parse_failures: AtomicUsize::new(0),
            letter_failures: AtomicUsize::new(0),
            letter_calls: AtomicUsize::new(0),
            last_letter: Mutex::new(None),
        }
    }
}

impl FakeGeneration {
    pub fn fail_parses(&self, n: usize) {
        self.parse_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_letters(&self, n: usize) {
        self.letter_failures.store(n, Ordering::SeqCst);
    }

    pub fn letter_calls(&self) -> usize {
        self.letter_calls.load(Ordering::SeqCst)
    }

    pub fn last_letter(&self) -> Option<(Value, String, Tone)> {
        self.last_letter.lock().unwrap().clone()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl GenerationService for FakeGeneration {
    async fn parse_cv(&self, _text: &str) -> Result<ParsedCv, GenerationError> {
        if Self::take_failure(&self.parse_failures) {
            return Err(GenerationError::Malformed("not JSON".to_string()));
        }
        Ok(self.parsed.clone())
    }

    async fn fix_cv(
        &self,
        _parsed: &Value,
        goal: &str,
        _notes: Option<&str>,
    ) -> Result<FixedCv, GenerationError> {
        Ok(FixedCv {
            improved_cv_markdown: self.fixed_markdown.clone(),
            changelog: json!([format!("Refocused on {goal}")]),
        })
    }

    async fn cover_letter(
        &self,
        candidate: &Value,
        job_text: &str,
        tone: Tone,
    ) -> Result<CoverLetter, GenerationError> {
        self.letter_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.letter_failures) {
            return Err(GenerationError::Malformed("empty letter".to_string()));
        }
        *self.last_letter.lock().unwrap() =
            Some((candidate.clone(), job_text.to_string(), tone));
        Ok(CoverLetter {
            short: "Short letter".to_string(),
            full: "Dear hiring manager, ...".to_string(),
            bullets: vec!["Rust".to_string(), "Queues".to_string()],
        })
    }
}

/// Every port in memory, with one consumer per queue driven by hand.
pub struct Pipeline {
    pub tasks: Arc<InMemoryTaskStore>,
    pub queue: Arc<InMemoryQueue>,
    pub records: Arc<InMemoryCandidateStore>,
    pub storage: Arc<InMemoryBlobStorage>,
    pub notifier: Arc<RecordingNotifier>,
    pub generation: Arc<FakeGeneration>,
    pub mailer: Arc<RecordingMailer>,
    pub mail: Arc<MailService>,
    pub dispatcher: Arc<Dispatcher>,
    consumers: Vec<QueueConsumer>,
}

impl Pipeline {
    pub fn new(attempts: u32) -> Self {
        Self::with_generation(attempts, FakeGeneration::default())
    }

    pub fn with_generation(attempts: u32, generation: FakeGeneration) -> Self {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let records = Arc::new(InMemoryCandidateStore::new());
        let storage = Arc::new(InMemoryBlobStorage::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let generation = Arc::new(generation);
        let mailer = Arc::new(RecordingMailer::default());
        let mail = Arc::new(MailService::new(
            mailer.clone(),
            "http://localhost:3000",
            Duration::from_secs(600),
        ));

        let dispatcher = Arc::new(Dispatcher::new(
            tasks.clone(),
            queue.clone(),
            records.clone(),
            storage.clone(),
            EnqueueOptions {
                attempts,
                backoff: Backoff::None,
            },
        ));

        let workers: Vec<Arc<dyn TaskWorker>> = vec![
            Arc::new(CvParseWorker::new(
                records.clone(),
                storage.clone(),
                generation.clone(),
                notifier.clone(),
                mail.clone(),
            )),
            Arc::new(CvFixWorker::new(
                records.clone(),
                storage.clone(),
                generation.clone(),
                mail.clone(),
            )),
            Arc::new(CoverLetterWorker::new(
                records.clone(),
                generation.clone(),
                mail.clone(),
            )),
        ];
        let consumers = workers
            .into_iter()
            .map(|worker| {
                let name = QueueName::from(worker.kind());
                let runner = Arc::new(TaskRunner::new(
                    worker,
                    tasks.clone(),
                    queue.clone(),
                    notifier.clone(),
                ));
                QueueConsumer::new(name, queue.clone(), runner, ConsumerSettings::default())
            })
            .collect();

        Self {
            tasks,
            queue,
            records,
            storage,
            notifier,
            generation,
            mailer,
            mail,
            dispatcher,
            consumers,
        }
    }

    /// Processes at most one job from `queue`. Returns whether one ran.
    pub async fn run_one(&self, queue: QueueName) -> bool {
        let consumer = self
            .consumers
            .iter()
            .find(|c| c.name() == queue)
            .expect("consumer for every queue");
        consumer.poll_once().await.unwrap()
    }

    /// Router state over this pipeline.
    pub fn app_state(&self) -> AppState {
        AppState {
            dispatcher: self.dispatcher.clone(),
            sessions: Arc::new(SessionRegistry::new()),
            otp: Arc::new(InMemoryOtpStore::new(Duration::from_secs(600))),
            mail: self.mail.clone(),
        }
    }
}

pub fn docx(paragraphs: &[&str]) -> Bytes {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
        .collect();
    let xml = format!("<w:document><w:body>{body}</w:body></w:document>");

    let mut buf = Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    Bytes::from(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::candidates::CandidateStore;
    use crate::dispatch::service::{DispatchStatus, UploadResponse};
    use crate::dispatch::{CoverLetterRequest, CvFixRequest, CvUpload};
    use crate::extraction::{MIME_DOC, MIME_DOCX};
    use crate::models::cv::CvStatus;
    use crate::models::task::{Task, TaskStatus};
    use crate::models::user::Profile;
    use crate::notify::TASK_FAILED;
    use crate::queue::{JobQueue, JobState};
    use crate::routes::build_router;
    use crate::tasks::{TaskStore, TaskUpdate};

    fn letter(job_text: &str) -> CoverLetterRequest {
        CoverLetterRequest {
            cv_id: None,
            job_text: job_text.to_string(),
            job_url: Some("https://jobs.example.com/42".to_string()),
            tone: Some("creative".to_string()),
        }
    }

    fn cv_docx() -> CvUpload {
        CvUpload {
            filename: "jane.docx".to_string(),
            content_type: MIME_DOCX.to_string(),
            data: docx(&["Jane Doe", "Backend engineer", "Skills: Rust, Postgres"]),
        }
    }

    async fn upload_and_parse(p: &Pipeline, owner: Uuid) -> UploadResponse {
        let uploaded = p.dispatcher.upload_cv(owner, cv_docx()).await.unwrap();
        assert!(p.run_one(QueueName::CvParse).await);
        uploaded
    }

    async fn task(p: &Pipeline, id: Uuid) -> Task {
        p.tasks.get(id).await.unwrap()
    }

    #[tokio::test]
    async fn test_cover_letter_runs_to_completion() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");

        let response = p
            .dispatcher
            .request_cover_letter(user.id, letter("Senior Rust engineer"))
            .await
            .unwrap();
        assert!(p.run_one(QueueName::CoverLetter).await);

        let done = task(&p, response.task_id).await;
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.finished_at.is_some());
        assert_eq!(done.error, None);
        let output = done.output_data.unwrap();
        assert_eq!(output["short"], "Short letter");
        assert_eq!(output["bullets"], json!(["Rust", "Queues"]));
        assert!(output["full"].as_str().unwrap().starts_with("Dear"));

        let (candidate, job_text, tone) = p.generation.last_letter().unwrap();
        assert_eq!(job_text, "Senior Rust engineer");
        assert_eq!(tone, Tone::Creative);
        assert_eq!(candidate["email"], "jane@example.com");

        let names = p.notifier.names();
        assert!(names.iter().any(|n| n == "task:progress"));
        assert_eq!(names.last().map(String::as_str), Some("task:completed"));

        let job = p
            .queue
            .status(QueueName::CoverLetter, response.task_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.progress, 100);

        let sent = p.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "jane@example.com");
        assert_eq!(sent[0].subject, "Your Cover Letter is ready");
        assert!(sent[0]
            .html
            .contains(&format!("http://localhost:3000/ai/tasks/{}", response.task_id)));
    }

    #[tokio::test]
    async fn test_failed_completion_email_does_not_fail_the_task() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");
        p.mailer.fail_next();

        let response = p
            .dispatcher
            .request_cover_letter(user.id, letter("Data engineer"))
            .await
            .unwrap();
        assert!(p.run_one(QueueName::CoverLetter).await);

        assert_eq!(task(&p, response.task_id).await.status, TaskStatus::Completed);
        assert!(p.mailer.sent().is_empty());
        assert!(!p.run_one(QueueName::CoverLetter).await);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_below_completion() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");
        p.dispatcher
            .request_cover_letter(user.id, letter("Platform engineer"))
            .await
            .unwrap();
        p.run_one(QueueName::CoverLetter).await;

        let progress: Vec<u64> = p
            .notifier
            .events()
            .into_iter()
            .filter(|(_, name, _)| name == "task:progress")
            .map(|(_, _, data)| data["progress"].as_u64().unwrap())
            .collect();
        assert_eq!(progress, vec![20, 40, 90]);
    }

    #[tokio::test]
    async fn test_upload_parses_cv_and_fills_profile() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");

        let uploaded = upload_and_parse(&p, user.id).await;

        let parse = task(&p, uploaded.task.task_id).await;
        assert_eq!(parse.status, TaskStatus::Completed);
        let output = parse.output_data.unwrap();
        assert_eq!(output["fallback"], false);
        assert_eq!(output["cv_id"], json!(uploaded.cv.id));

        let cv = p.records.cv(uploaded.cv.id).unwrap();
        assert_eq!(cv.status, "PARSED");
        assert!(cv.parsed_resume_id.is_some());

        let profile = p.records.profile(user.id).unwrap();
        assert_eq!(profile.full_name.as_deref(), Some("Jane Doe"));
        assert_eq!(profile.skills, vec!["Rust", "Postgres"]);
        assert!(profile.last_parsed_at.is_some());

        assert!(p.notifier.names().iter().any(|n| n == "cv:parsed"));

        let sent = p.mailer.sent();
        assert_eq!(p.mailer.subjects(), vec!["Your CV has been processed"]);
        assert!(sent[0].html.contains("Hi Jane Doe,"));
        assert!(sent[0]
            .html
            .contains(&format!("http://localhost:3000/cvs/{}", uploaded.cv.id)));
    }

    #[tokio::test]
    async fn test_parse_never_overwrites_edited_profile_fields() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");
        let mut profile = Profile::empty(user.id);
        profile.full_name = Some("Jane Q. Doe".to_string());
        profile.skills = vec!["Go".to_string()];
        p.records.set_profile(profile);

        upload_and_parse(&p, user.id).await;

        let profile = p.records.profile(user.id).unwrap();
        assert_eq!(profile.full_name.as_deref(), Some("Jane Q. Doe"));
        assert_eq!(profile.skills, vec!["Go"]);
        assert_eq!(profile.location.as_deref(), Some("Berlin"));
        assert_eq!(profile.about.as_deref(), Some("Backend engineer"));
    }

    #[tokio::test]
    async fn test_parser_failure_falls_back_to_raw_text() {
        let generation = FakeGeneration::default();
        generation.fail_parses(1);
        let p = Pipeline::with_generation(3, generation);
        let user = p.records.add_user("jane@example.com");

        let uploaded = upload_and_parse(&p, user.id).await;

        let parse = task(&p, uploaded.task.task_id).await;
        assert_eq!(parse.status, TaskStatus::Completed);
        assert_eq!(parse.output_data.unwrap()["fallback"], true);
        assert_eq!(p.records.cv(uploaded.cv.id).unwrap().status, "PARSED");
        assert_eq!(p.records.parsed_count(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_document_fails_task_and_cv() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");
        let uploaded = p
            .dispatcher
            .upload_cv(
                user.id,
                CvUpload {
                    filename: "old.doc".to_string(),
                    content_type: MIME_DOC.to_string(),
                    data: Bytes::from_static(b"\xD0\xCF\x11\xE0 legacy"),
                },
            )
            .await
            .unwrap();
        assert!(p.run_one(QueueName::CvParse).await);

        let failed = task(&p, uploaded.task.task_id).await;
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.error.is_some());
        assert!(failed.output_data.is_none());
        assert!(failed.output_url.is_none());
        assert!(failed.finished_at.is_some());

        let cv = p.records.cv(uploaded.cv.id).unwrap();
        assert_eq!(cv.status, "ERROR");
        assert!(cv.error_message.is_some());

        let (_, _, data) = p
            .notifier
            .events()
            .into_iter()
            .find(|(_, name, _)| name == "task:failed")
            .unwrap();
        assert_eq!(data["will_retry"], false);
        // Fatal: no further attempts are queued.
        assert!(!p.run_one(QueueName::CvParse).await);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried_by_the_queue() {
        let generation = FakeGeneration::default();
        generation.fail_letters(1);
        let p = Pipeline::with_generation(3, generation);
        let user = p.records.add_user("jane@example.com");
        let response = p
            .dispatcher
            .request_cover_letter(user.id, letter("SRE"))
            .await
            .unwrap();

        assert!(p.run_one(QueueName::CoverLetter).await);
        let after_first = task(&p, response.task_id).await;
        assert_eq!(after_first.status, TaskStatus::Failed);

        assert!(p.run_one(QueueName::CoverLetter).await);
        let done = task(&p, response.task_id).await;
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.error, None);
        assert_eq!(p.generation.letter_calls(), 2);
    }

    #[tokio::test]
    async fn test_admin_retry_after_exhaustion() {
        let generation = FakeGeneration::default();
        generation.fail_letters(1);
        let p = Pipeline::with_generation(1, generation);
        let user = p.records.add_user("jane@example.com");
        let response = p
            .dispatcher
            .request_cover_letter(user.id, letter("Data engineer"))
            .await
            .unwrap();

        assert!(p.run_one(QueueName::CoverLetter).await);
        assert!(!p.run_one(QueueName::CoverLetter).await);
        let failed = task(&p, response.task_id).await;
        assert_eq!(failed.status, TaskStatus::Failed);

        p.dispatcher.retry_task(response.task_id).await.unwrap();
        let pending = task(&p, response.task_id).await;
        assert!(pending.error.is_none());
        assert_eq!(pending.progress, 0);

        assert!(p.run_one(QueueName::CoverLetter).await);
        let done = task(&p, response.task_id).await;
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.input["job_text"], "Data engineer");
    }

    #[tokio::test]
    async fn test_admin_retry_during_live_attempt_is_not_stranded() {
        let p = Pipeline::new(2);
        let user = p.records.add_user("jane@example.com");
        let response = p
            .dispatcher
            .request_cover_letter(user.id, letter("Data engineer"))
            .await
            .unwrap();

        // A consumer holds the job when the task is reset by an operator.
        let in_flight = p
            .queue
            .reserve(QueueName::CoverLetter, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        let current = task(&p, response.task_id).await;
        let claimed = p
            .tasks
            .update(current.id, TaskUpdate::claim(current.version))
            .await
            .unwrap();
        p.tasks
            .update(current.id, TaskUpdate::fail(claimed.version, "LLM unavailable"))
            .await
            .unwrap();

        let retried = p.dispatcher.retry_task(current.id).await.unwrap();
        assert_eq!(retried.status, DispatchStatus::Pending);
        assert_eq!(task(&p, current.id).await.status, TaskStatus::Pending);
        assert_eq!(p.tasks.outbox_len(), 1);

        p.queue
            .fail(QueueName::CoverLetter, current.id, in_flight.lease, "LLM unavailable", false)
            .await
            .unwrap();

        let report = p.dispatcher.sweep_outbox(Utc::now(), 10).await.unwrap();
        assert_eq!(report.enqueued, 1);
        assert_eq!(p.tasks.outbox_len(), 0);
        assert!(p.run_one(QueueName::CoverLetter).await);
        let done = task(&p, current.id).await;
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.input["job_text"], "Data engineer");
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_attempt_losing_its_lease_fails_the_task() {
        let p = Pipeline::new(1);
        let user = p.records.add_user("jane@example.com");
        let response = p
            .dispatcher
            .request_cover_letter(user.id, letter("SRE"))
            .await
            .unwrap();

        // The only attempt goes to a worker that never reports back.
        p.queue
            .reserve(QueueName::CoverLetter, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(p.run_one(QueueName::CoverLetter).await);

        let failed = task(&p, response.task_id).await;
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("lease expired with no attempts left"));
        assert_eq!(p.generation.letter_calls(), 0);

        let job = p
            .queue
            .status(QueueName::CoverLetter, response.task_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.state, JobState::Failed);

        let (_, name, data) = p.notifier.events().pop().unwrap();
        assert_eq!(name, TASK_FAILED);
        assert_eq!(data["will_retry"], false);
        assert!(!p.run_one(QueueName::CoverLetter).await);
    }

    #[tokio::test]
    async fn test_cover_letter_for_deleted_user_fails_without_retry() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");
        let response = p
            .dispatcher
            .request_cover_letter(user.id, letter("SRE"))
            .await
            .unwrap();
        p.records.remove_user(user.id);

        assert!(p.run_one(QueueName::CoverLetter).await);
        let failed = task(&p, response.task_id).await;
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error, Some(format!("User {} not found", user.id)));
        assert_eq!(p.generation.letter_calls(), 0);
        assert!(!p.run_one(QueueName::CoverLetter).await);
    }

    #[tokio::test]
    async fn test_redelivered_completed_job_is_not_rerun() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");
        let response = p
            .dispatcher
            .request_cover_letter(user.id, letter("SRE"))
            .await
            .unwrap();
        p.run_one(QueueName::CoverLetter).await;

        let done = task(&p, response.task_id).await;
        p.queue
            .enqueue(
                QueueName::CoverLetter,
                done.id,
                crate::workers::job_payload(&done),
                EnqueueOptions::default(),
            )
            .await
            .unwrap();
        assert!(p.run_one(QueueName::CoverLetter).await);

        assert_eq!(p.generation.letter_calls(), 1);
        assert_eq!(task(&p, response.task_id).await, done);
    }

    #[tokio::test]
    async fn test_fix_renders_pdf_and_marks_cv_fixed() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");
        let uploaded = upload_and_parse(&p, user.id).await;

        let response = p
            .dispatcher
            .request_cv_fix(
                user.id,
                uploaded.cv.id,
                CvFixRequest {
                    goal: "Staff engineer".to_string(),
                    notes: None,
                },
            )
            .await
            .unwrap();
        assert!(p.run_one(QueueName::CvFix).await);

        let done = task(&p, response.task_id).await;
        assert_eq!(done.status, TaskStatus::Completed);
        let output = done.output_data.unwrap();
        let key = output["s3_key"].as_str().unwrap().to_string();
        assert!(key.starts_with("fixed-cvs/"));
        assert_eq!(done.output_url, Some(format!("memory://{key}")));
        assert_eq!(output["changelog"], json!(["Refocused on Staff engineer"]));
        assert_eq!(p.storage.content_type(&key).as_deref(), Some("application/pdf"));

        assert_eq!(p.records.cv(uploaded.cv.id).unwrap().status, "FIXED");
        assert_eq!(
            p.mailer.subjects().last().map(String::as_str),
            Some("Your CV Fix is ready")
        );
    }

    #[tokio::test]
    async fn test_cover_letter_uses_parsed_cv() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");
        let uploaded = upload_and_parse(&p, user.id).await;

        let mut req = letter("Backend engineer");
        req.cv_id = Some(uploaded.cv.id);
        p.dispatcher.request_cover_letter(user.id, req).await.unwrap();
        assert!(p.run_one(QueueName::CoverLetter).await);

        let (candidate, _, _) = p.generation.last_letter().unwrap();
        assert_eq!(candidate["full_name"], "Jane Doe");
        assert!(candidate["skills"]
            .as_array()
            .unwrap()
            .iter()
            .any(|s| s == "Rust"));
    }

    #[tokio::test]
    async fn test_reparse_after_error_recovers_cv() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");
        let uploaded = upload_and_parse(&p, user.id).await;
        p.records
            .set_cv_status(uploaded.cv.id, CvStatus::Error, Some("boom"))
            .await
            .unwrap();

        let response = p
            .dispatcher
            .request_cv_reparse(user.id, uploaded.cv.id)
            .await
            .unwrap();
        assert_eq!(p.records.cv(uploaded.cv.id).unwrap().status, "PARSING");
        assert!(p.run_one(QueueName::CvParse).await);

        assert_eq!(task(&p, response.task_id).await.status, TaskStatus::Completed);
        let cv = p.records.cv(uploaded.cv.id).unwrap();
        assert_eq!(cv.status, "PARSED");
        assert_eq!(cv.error_message, None);
        assert_eq!(p.records.parsed_count(), 2);
    }

    async fn send(state: AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = build_router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_http_health() {
        let p = Pipeline::new(3);
        let (status, body) = send(p.app_state(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "hireflow-api");
    }

    #[tokio::test]
    async fn test_http_cover_letter_accepts_and_exposes_public_fields() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");
        let state = p.app_state();

        let (status, body) = send(
            state.clone(),
            post_json(
                "/api/v1/ai/cover-letter",
                json!({"user_id": user.id, "job_text": "Rust role"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "processing");
        let task_id = body["task_id"].as_str().unwrap().to_string();

        let (status, body) = send(
            state.clone(),
            get(&format!("/api/v1/ai/tasks/{task_id}?user_id={}", user.id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "COVER_LETTER");
        assert_eq!(body["status"], "IN_PROGRESS");
        assert!(body.get("version").is_none());

        let (status, body) = send(
            state,
            get(&format!("/api/v1/ai/tasks/{task_id}?user_id={}", Uuid::new_v4())),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_http_errors_map_to_status_codes() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");
        let cv = p
            .dispatcher
            .upload_cv(user.id, cv_docx())
            .await
            .unwrap()
            .cv;
        let state = p.app_state();

        let (status, body) = send(
            state.clone(),
            post_json(
                "/api/v1/ai/cover-letter",
                json!({"user_id": user.id, "job_text": "  "}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, body) = send(
            state.clone(),
            post_json(
                &format!("/api/v1/cvs/{}/fix", cv.id),
                json!({"user_id": user.id, "goal": "Lead"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(body["error"]["code"], "PRECONDITION_FAILED");
        assert_eq!(p.tasks.len(), 1);

        let (status, _) = send(
            state,
            post_json(&format!("/api/v1/admin/tasks/{}/retry", Uuid::new_v4()), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_http_admin_views() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");
        let response = p
            .dispatcher
            .request_cover_letter(user.id, letter("SRE"))
            .await
            .unwrap();
        let state = p.app_state();

        let (status, body) = send(state.clone(), get("/api/v1/admin/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["in_progress"], 1);

        let (status, body) = send(state.clone(), get("/api/v1/admin/tasks?page=1&limit=10")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);

        let (status, body) = send(
            state,
            get(&format!("/api/v1/admin/tasks/{}/job", response.task_id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "pending");
        assert_eq!(body["queue"], "cover-letter");
    }

    #[tokio::test]
    async fn test_http_otp_rejects_wrong_code() {
        let p = Pipeline::new(3);
        let state = p.app_state();

        let (status, body) = send(
            state.clone(),
            post_json("/api/v1/auth/otp", json!({"email": "Jane@Example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "OTP sent successfully");

        let code = state.otp.issue("jane@example.com").await.unwrap();
        let wrong = if code == "123456" { "654321" } else { "123456" };
        let (status, body) = send(
            state.clone(),
            post_json(
                "/api/v1/auth/otp/verify",
                json!({"email": "jane@example.com", "otp": wrong}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["message"], "Invalid or expired OTP");

        let (status, body) = send(
            state,
            post_json(
                "/api/v1/auth/otp/verify",
                json!({"email": "JANE@example.com", "otp": code}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verified"], true);
    }

    /// The six-digit code inside a verification email.
    fn emailed_code(html: &str) -> String {
        html.split(|c: char| !c.is_ascii_digit())
            .find(|run| run.len() == 6)
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_http_otp_is_emailed_and_verifies() {
        let p = Pipeline::new(3);
        let state = p.app_state();

        let (status, _) = send(
            state.clone(),
            post_json("/api/v1/auth/otp", json!({"email": " jane@example.com "})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let sent = p.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "jane@example.com");
        assert_eq!(sent[0].subject, "Hireflow - Verify Your Email");

        let code = emailed_code(&sent[0].html);
        let (status, body) = send(
            state,
            post_json(
                "/api/v1/auth/otp/verify",
                json!({"email": "jane@example.com", "otp": code}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verified"], true);
    }

    #[tokio::test]
    async fn test_http_otp_request_survives_mail_outage() {
        let p = Pipeline::new(3);
        p.mailer.fail_next();

        let (status, body) = send(
            p.app_state(),
            post_json("/api/v1/auth/otp", json!({"email": "jane@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "OTP sent successfully");
        assert!(p.mailer.sent().is_empty());
    }

    fn delete(uri: &str) -> Request<Body> {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_http_cv_list_get_and_delete() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");
        let other = p.records.add_user("max@example.com");
        let uploaded = upload_and_parse(&p, user.id).await;
        let state = p.app_state();

        let list_uri = format!("/api/v1/cvs?user_id={}", user.id);
        let (status, body) = send(state.clone(), get(&list_uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["id"], json!(uploaded.cv.id));
        assert_eq!(body[0]["status"], "PARSED");
        assert_eq!(body[0]["parsed_data"]["full_name"], "Jane Doe");

        let cv_uri = format!("/api/v1/cvs/{}?user_id={}", uploaded.cv.id, user.id);
        let (status, body) = send(state.clone(), get(&cv_uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["original_filename"], "jane.docx");

        let foreign_uri = format!("/api/v1/cvs/{}?user_id={}", uploaded.cv.id, other.id);
        let (status, _) = send(state.clone(), delete(&foreign_uri)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(state.clone(), delete(&cv_uri)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);
        assert!(p.storage.keys().is_empty());

        let (status, _) = send(state, get(&cv_uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_http_admin_lists_users() {
        let p = Pipeline::new(3);
        let user = p.records.add_user("jane@example.com");
        p.records.add_user("max@example.com");
        upload_and_parse(&p, user.id).await;

        let (status, body) =
            send(p.app_state(), get("/api/v1/admin/users?page=1&limit=50")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["total_pages"], 1);
        let jane = body["users"]
            .as_array()
            .unwrap()
            .iter()
            .find(|u| u["email"] == "jane@example.com")
            .unwrap();
        assert_eq!(jane["full_name"], "Jane Doe");
        assert_eq!(jane["cv_count"], 1);
    }
}
