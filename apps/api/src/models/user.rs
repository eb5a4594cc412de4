use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// One row of the operator's user listing.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub full_name: Option<String>,
    pub cv_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserPage {
    pub users: Vec<UserSummary>,
    pub total: i64,
    pub page: i64,
    pub total_pages: i64,
}

/// Candidate profile. Parser output only ever fills the empty fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub user_id: Uuid,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub about: Option<String>,
    pub skills: Vec<String>,
    /// JSON array of positions.
    pub experience: Value,
    /// JSON array of education entries.
    pub education: Value,
    pub languages: Vec<String>,
    pub certifications: Vec<String>,
    pub last_parsed_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn empty(user_id: Uuid) -> Self {
        Self {
            user_id,
            full_name: None,
            phone: None,
            location: None,
            about: None,
            skills: Vec::new(),
            experience: Value::Array(Vec::new()),
            education: Value::Array(Vec::new()),
            languages: Vec::new(),
            certifications: Vec::new(),
            last_parsed_at: None,
        }
    }
}
