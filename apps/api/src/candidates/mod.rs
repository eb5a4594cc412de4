//! Records the pipeline reads and reconciles: users, profiles, CVs and their
//! parsed resumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::generation::ParsedCv;
use crate::models::cv::{CvDetails, CvRow, CvStatus, NewCv, ParsedResumeRow};
use crate::models::user::{Profile, User, UserPage};

#[cfg(test)]
pub mod memory_store;
pub mod pg_store;
pub mod profile_merge;

pub use pg_store::PgCandidateStore;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("CV {0} not found")]
    CvNotFound(Uuid),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait CandidateStore: Send + Sync {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RecordError>;

    /// Newest first, with a total for paging.
    async fn list_users(&self, page: i64, limit: i64) -> Result<UserPage, RecordError>;

    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, RecordError>;

    /// Fills the empty fields of the user's profile from a parsed CV in one
    /// atomic step, creating the profile when missing. Edits that land while
    /// the CV is parsed are kept. Returns the names of the filled fields.
    async fn fill_profile(
        &self,
        user_id: Uuid,
        parsed: &ParsedCv,
        parsed_at: DateTime<Utc>,
    ) -> Result<Vec<&'static str>, RecordError>;

    async fn insert_cv(&self, cv: NewCv) -> Result<CvRow, RecordError>;

    async fn get_cv(&self, id: Uuid) -> Result<Option<CvRow>, RecordError>;

    /// The owner's CVs, newest first, each with its parsed data if any.
    async fn list_cvs(&self, user_id: Uuid) -> Result<Vec<CvDetails>, RecordError>;

    /// Removes the CV row and its current parse. The stored file is the
    /// caller's to delete.
    async fn delete_cv(&self, id: Uuid) -> Result<CvRow, RecordError>;

    async fn set_cv_status(
        &self,
        id: Uuid,
        status: CvStatus,
        error_message: Option<&str>,
    ) -> Result<(), RecordError>;

    /// Stores the parse result and flips the CV to PARSED atomically.
    async fn attach_parsed_resume(
        &self,
        cv_id: Uuid,
        parsed: &ParsedResumeRow,
    ) -> Result<(), RecordError>;

    async fn get_parsed_resume(&self, id: Uuid) -> Result<Option<ParsedResumeRow>, RecordError>;
}
