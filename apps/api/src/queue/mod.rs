//! Durable named work queues with at-least-once delivery.
//!
//! The pipeline only depends on the [`JobQueue`] contract: named queues,
//! bounded attempts with exponential backoff, per-job progress, and a
//! state/result query by job id. `RedisQueue` is the production backend.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::task::TaskKind;

pub mod consumer;
pub mod redis_queue;

pub use consumer::{ConsumerSettings, JobFailure, JobHandler, QueueConsumer};
pub use redis_queue::RedisQueue;

/// One queue per task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueName {
    #[serde(rename = "cv-parse")]
    CvParse,
    #[serde(rename = "cv-fix")]
    CvFix,
    #[serde(rename = "cover-letter")]
    CoverLetter,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [QueueName::CvParse, QueueName::CvFix, QueueName::CoverLetter];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::CvParse => "cv-parse",
            QueueName::CvFix => "cv-fix",
            QueueName::CoverLetter => "cover-letter",
        }
    }
}

impl From<TaskKind> for QueueName {
    fn from(kind: TaskKind) -> Self {
        match kind {
            TaskKind::Parse => QueueName::CvParse,
            TaskKind::FixCv => QueueName::CvFix,
            TaskKind::CoverLetter => QueueName::CoverLetter,
        }
    }
}

impl FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cv-parse" => Ok(QueueName::CvParse),
            "cv-fix" => Ok(QueueName::CvFix),
            "cover-letter" => Ok(QueueName::CoverLetter),
            _ => Err(format!("Unknown queue: {s}")),
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delay policy between attempts. `None` is the "fast" mode: redeliver at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "delay_ms", rename_all = "snake_case")]
pub enum Backoff {
    None,
    Fixed(u64),
    Exponential(u64),
}

impl Backoff {
    /// Delay before the attempt following `attempts_made` failed attempts.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(ms) => Duration::from_millis(ms),
            Backoff::Exponential(base_ms) => {
                let exponent = attempts_made.saturating_sub(1).min(16);
                Duration::from_millis(base_ms.saturating_mul(1 << exponent))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    pub attempts: u32,
    pub backoff: Backoff,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::Exponential(2000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Waiting or delayed for backoff.
    Pending,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

/// A leased job handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub queue: QueueName,
    pub payload: Value,
    /// 1-based attempt number of this delivery.
    pub attempt: u32,
    pub max_attempts: u32,
    /// Token of this lease. Only its holder may report progress on, complete
    /// or fail the job.
    pub lease: Uuid,
    /// The previous lease ran out on the last allowed attempt. The job must
    /// be settled as failed instead of run again.
    pub exhausted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Retrying { next_attempt: u32, delay: Duration },
    Exhausted,
}

/// Queue-side view of a job, for operators.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusInfo {
    pub id: Uuid,
    pub queue: QueueName,
    pub state: JobState,
    pub progress: u8,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub data: Value,
    pub result: Option<Value>,
    pub failed_reason: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("job {0} not found")]
    UnknownJob(Uuid),

    #[error("corrupt job record: {0}")]
    Corrupt(String),

    #[error("lease on job {0} is no longer held")]
    LostLease(Uuid),
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Adds a job under a caller-chosen id. Returns `false` without touching
    /// anything when a job with that id is still pending or active, so
    /// re-enqueueing the same task is harmless.
    async fn enqueue(
        &self,
        queue: QueueName,
        job_id: Uuid,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<bool, QueueError>;

    /// Leases the next runnable job for `lease` under a fresh token. Jobs
    /// whose lease ran out are redelivered; due backoff timers are promoted
    /// first.
    async fn reserve(
        &self,
        queue: QueueName,
        lease: Duration,
    ) -> Result<Option<Delivery>, QueueError>;

    /// The write methods below take the delivery's lease token and return
    /// [`QueueError::LostLease`] without touching the job when another
    /// delivery holds it now.
    async fn report_progress(
        &self,
        queue: QueueName,
        job_id: Uuid,
        lease: Uuid,
        progress: u8,
    ) -> Result<(), QueueError>;

    async fn complete(
        &self,
        queue: QueueName,
        job_id: Uuid,
        lease: Uuid,
        result: Value,
    ) -> Result<(), QueueError>;

    /// Records a failed attempt; schedules the next one when `retryable` and
    /// the attempt budget allows it.
    async fn fail(
        &self,
        queue: QueueName,
        job_id: Uuid,
        lease: Uuid,
        reason: &str,
        retryable: bool,
    ) -> Result<FailOutcome, QueueError>;

    async fn status(
        &self,
        queue: QueueName,
        job_id: Uuid,
    ) -> Result<Option<JobStatusInfo>, QueueError>;
}
