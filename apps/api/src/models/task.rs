use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// What a task asks the pipeline to do. Selects the worker and the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    CoverLetter,
    FixCv,
    Parse,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::CoverLetter => "COVER_LETTER",
            TaskKind::FixCv => "FIX_CV",
            TaskKind::Parse => "PARSE",
        }
    }

    /// Human label used in notifications.
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::CoverLetter => "Cover Letter",
            TaskKind::FixCv => "CV Fix",
            TaskKind::Parse => "CV Parse",
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COVER_LETTER" => Ok(TaskKind::CoverLetter),
            "FIX_CV" => Ok(TaskKind::FixCv),
            "PARSE" => Ok(TaskKind::Parse),
            _ => Err(format!("Invalid task kind: {s}")),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted unit of asynchronous work.
///
/// `version` is the optimistic concurrency token; it never leaves the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub input: Value,
    pub output_data: Option<Value>,
    pub output_url: Option<String>,
    pub error: Option<String>,
    pub progress: u8,
    #[serde(skip)]
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(kind: TaskKind, user_id: Uuid, input: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            status: TaskStatus::Pending,
            input,
            output_data: None,
            output_url: None,
            error: None,
            progress: 0,
            version: 1,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// Raw `tasks` row. Enum columns are stored as TEXT.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub status: String,
    pub input: Value,
    pub output_data: Option<Value>,
    pub output_url: Option<String>,
    pub error: Option<String>,
    pub progress: i16,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = String;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(Task {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind.parse()?,
            status: row.status.parse()?,
            input: row.input,
            output_data: row.output_data,
            output_url: row.output_url,
            error: row.error,
            progress: row.progress.clamp(0, 100) as u8,
            version: row.version,
            created_at: row.created_at,
            finished_at: row.finished_at,
        })
    }
}

/// A task whose job still has to be handed to the queue.
#[derive(Debug, Clone, FromRow)]
pub struct OutboxEntry {
    pub task_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

/// Page of tasks for the operator listing.
#[derive(Debug, Clone, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: i64,
    pub page: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskStats {
    pub total: i64,
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
}
