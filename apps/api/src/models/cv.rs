use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CvStatus {
    Uploaded,
    Parsing,
    Parsed,
    Fixed,
    Error,
}

impl CvStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CvStatus::Uploaded => "UPLOADED",
            CvStatus::Parsing => "PARSING",
            CvStatus::Parsed => "PARSED",
            CvStatus::Fixed => "FIXED",
            CvStatus::Error => "ERROR",
        }
    }

    /// A fix can only be requested once structured data exists.
    pub fn is_fixable(&self) -> bool {
        matches!(self, CvStatus::Parsed | CvStatus::Fixed)
    }
}

impl FromStr for CvStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPLOADED" => Ok(CvStatus::Uploaded),
            "PARSING" => Ok(CvStatus::Parsing),
            "PARSED" => Ok(CvStatus::Parsed),
            "FIXED" => Ok(CvStatus::Fixed),
            "ERROR" => Ok(CvStatus::Error),
            _ => Err(format!("Invalid CV status: {s}")),
        }
    }
}

impl fmt::Display for CvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CvRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub original_filename: String,
    pub s3_key: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub status: String,
    pub parsed_resume_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CvRow {
    pub fn cv_status(&self) -> Result<CvStatus, String> {
        self.status.parse()
    }
}

/// A CV together with its structured parse, as listed to its owner.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CvDetails {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub cv: CvRow,
    pub parsed_data: Option<Value>,
}

/// Fields needed to register a freshly uploaded CV.
#[derive(Debug, Clone)]
pub struct NewCv {
    pub user_id: Uuid,
    pub original_filename: String,
    pub s3_key: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ParsedResumeRow {
    pub id: Uuid,
    pub json_payload: Value,
    pub skills: Vec<String>,
    pub positions: Value,
    pub raw_text: String,
    pub created_at: DateTime<Utc>,
}
