//! Task state machine.
//!
//! ```text
//! PENDING ──dispatch/claim──▶ IN_PROGRESS ──success──▶ COMPLETED
//!    ▲                          │   ▲
//!    │                       error  │ redelivery
//!    │                          ▼   │
//!    └────────admin retry────── FAILED
//! ```
//!
//! Both store implementations funnel every write through [`apply`], so the
//! transition rules, the progress rules and the output/error exclusivity
//! invariant live in one place.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::task::{Task, TaskStatus};
use crate::tasks::store::StoreError;

/// Highest progress a task may report before it is actually completed.
pub const MAX_IN_FLIGHT_PROGRESS: u8 = 99;

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                // re-leased or redelivered job claiming the task again
                | (InProgress, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, InProgress)
                | (Failed, Pending)
        )
    }
}

/// Field-level partial update of a task.
///
/// `None` leaves a field untouched; `Some(None)` clears a nullable field.
/// `finished_at` is never set directly: it follows the status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub output_data: Option<Option<Value>>,
    pub output_url: Option<Option<String>>,
    pub error: Option<Option<String>>,
    pub progress: Option<u8>,
    /// Reject the write unless the stored version still matches.
    pub expected_version: Option<i32>,
    /// Take ownership of the task: later writes holding the old version go stale.
    pub bump_version: bool,
}

/// Output of a successful worker run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutput {
    pub data: Option<Value>,
    pub url: Option<String>,
}

impl TaskUpdate {
    /// Dispatcher flip once the job has been handed to the queue.
    pub fn dispatched() -> Self {
        Self {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        }
    }

    /// A worker attempt taking over the task.
    pub fn claim(version: i32) -> Self {
        Self {
            status: Some(TaskStatus::InProgress),
            output_data: Some(None),
            output_url: Some(None),
            error: Some(None),
            progress: Some(0),
            expected_version: Some(version),
            bump_version: true,
        }
    }

    pub fn progress(version: i32, progress: u8) -> Self {
        Self {
            progress: Some(progress),
            expected_version: Some(version),
            ..Default::default()
        }
    }

    pub fn complete(version: i32, output: TaskOutput) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            output_data: Some(output.data),
            output_url: Some(output.url),
            error: Some(None),
            progress: Some(100),
            expected_version: Some(version),
            bump_version: false,
        }
    }

    pub fn fail(version: i32, error: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            output_data: Some(None),
            output_url: Some(None),
            error: Some(Some(error.into())),
            progress: None,
            expected_version: Some(version),
            bump_version: false,
        }
    }

    /// Administrative retry of a failed task.
    pub fn retry() -> Self {
        Self {
            status: Some(TaskStatus::Pending),
            output_data: Some(None),
            output_url: Some(None),
            error: Some(None),
            progress: Some(0),
            expected_version: None,
            bump_version: true,
        }
    }
}

/// Computes the task that results from applying `update` to `task`.
pub fn apply(task: &Task, update: &TaskUpdate, now: DateTime<Utc>) -> Result<Task, StoreError> {
    if let Some(expected) = update.expected_version {
        if expected != task.version {
            return Err(StoreError::StaleVersion {
                task_id: task.id,
                expected,
                actual: task.version,
            });
        }
    }

    let mut next = task.clone();

    if let Some(status) = update.status {
        if !task.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                task_id: task.id,
                from: task.status,
                to: status,
            });
        }
        next.status = status;
        next.finished_at = status.is_terminal().then_some(now);
    }

    if let Some(data) = &update.output_data {
        next.output_data = data.clone();
    }
    if let Some(url) = &update.output_url {
        next.output_url = url.clone();
    }
    if let Some(error) = &update.error {
        next.error = error.clone();
    }

    if let Some(progress) = update.progress {
        next.progress = match (update.status, next.status) {
            (None, TaskStatus::InProgress) => {
                progress.min(MAX_IN_FLIGHT_PROGRESS).max(task.progress)
            }
            (None, other) => {
                return Err(StoreError::InvalidUpdate(format!(
                    "progress can only move while IN_PROGRESS (task is {other})"
                )))
            }
            (Some(TaskStatus::InProgress), _) => progress.min(MAX_IN_FLIGHT_PROGRESS),
            (Some(_), _) => progress.min(100),
        };
    }

    if update.bump_version {
        next.version += 1;
    }

    check_invariants(&next)?;
    Ok(next)
}

/// Exactly one of output/error on terminal tasks, neither otherwise.
pub fn check_invariants(task: &Task) -> Result<(), StoreError> {
    let has_output = task.output_data.is_some() || task.output_url.is_some();
    let has_error = task.error.as_deref().is_some_and(|e| !e.trim().is_empty());

    let violation = match task.status {
        TaskStatus::Completed if !has_output => Some("completed task without output"),
        TaskStatus::Completed if task.error.is_some() => Some("completed task carries an error"),
        TaskStatus::Completed if task.progress != 100 => Some("completed task below 100%"),
        TaskStatus::Failed if !has_error => Some("failed task without an error message"),
        TaskStatus::Failed if has_output => Some("failed task carries output"),
        TaskStatus::Pending | TaskStatus::InProgress if has_output || task.error.is_some() => {
            Some("unfinished task carries output or error")
        }
        TaskStatus::Pending | TaskStatus::InProgress if task.finished_at.is_some() => {
            Some("unfinished task has finished_at")
        }
        _ => None,
    };

    match violation {
        Some(msg) => Err(StoreError::InvalidUpdate(format!("{msg} (task {})", task.id))),
        None => Ok(()),
    }
}
