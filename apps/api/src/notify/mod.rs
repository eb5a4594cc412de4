//! Best-effort push notifications to live client sessions.
//!
//! A user with no registered session simply misses the event; nothing is
//! queued for later delivery.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod ws;

pub const TASK_PROGRESS: &str = "task:progress";
pub const TASK_COMPLETED: &str = "task:completed";
pub const TASK_FAILED: &str = "task:failed";
pub const CV_PARSED: &str = "cv:parsed";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub event: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(event: &str, data: Value) -> Self {
        Self {
            event: event.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }
}

pub trait Notifier: Send + Sync {
    /// Never fails; delivery problems are logged and swallowed.
    fn notify(&self, user_id: Uuid, event: &str, data: Value);
}

struct Session {
    id: Uuid,
    sender: UnboundedSender<NotificationEvent>,
}

/// One live session per user. A new connection replaces the previous one.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session id to pass back to [`SessionRegistry::unregister`].
    pub fn register(&self, user_id: Uuid, sender: UnboundedSender<NotificationEvent>) -> Uuid {
        let id = Uuid::new_v4();
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if sessions.insert(user_id, Session { id, sender }).is_some() {
            debug!(%user_id, "Replaced existing notification session");
        }
        id
    }

    /// Removes the session only if it is still the one registered under `session_id`.
    pub fn unregister(&self, user_id: Uuid, session_id: Uuid) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if sessions.get(&user_id).is_some_and(|s| s.id == session_id) {
            sessions.remove(&user_id);
        }
    }

    pub fn is_connected(&self, user_id: Uuid) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&user_id)
    }
}

impl Notifier for SessionRegistry {
    fn notify(&self, user_id: Uuid, event: &str, data: Value) {
        let failed_session = {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            let Some(session) = sessions.get(&user_id) else {
                return;
            };
            match session.sender.send(NotificationEvent::new(event, data)) {
                Ok(()) => return,
                Err(_) => session.id,
            }
        };

        warn!(%user_id, event, "Notification session closed, dropping it");
        self.unregister(user_id, failed_session);
    }
}
