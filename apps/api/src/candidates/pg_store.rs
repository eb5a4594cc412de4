use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use super::profile_merge::merge_parsed_into_profile;
use super::{CandidateStore, RecordError};
use crate::generation::ParsedCv;
use crate::models::cv::{CvDetails, CvRow, CvStatus, NewCv, ParsedResumeRow};
use crate::models::user::{Profile, User, UserPage, UserSummary};
use crate::tasks::store::total_pages;

pub struct PgCandidateStore {
    pool: PgPool,
}

impl PgCandidateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandidateStore for PgCandidateStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RecordError> {
        let user = sqlx::query_as::<_, User>("SELECT id, email, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn list_users(&self, page: i64, limit: i64) -> Result<UserPage, RecordError> {
        let page = page.max(1);
        let users = sqlx::query_as::<_, UserSummary>(
            r#"
            SELECT u.id, u.email, u.created_at, p.full_name,
                   (SELECT COUNT(*) FROM cvs c WHERE c.user_id = u.id) AS cv_count
            FROM users u
            LEFT JOIN profiles p ON p.user_id = u.id
            ORDER BY u.created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind((page - 1) * limit)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;

        Ok(UserPage {
            users,
            total,
            page,
            total_pages: total_pages(total, limit),
        })
    }

    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, RecordError> {
        let profile = sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(profile)
    }

    /// The row is locked for the read-merge-write, so a concurrent edit
    /// either lands first and is seen, or waits and lands after.
    #[instrument(skip(self, parsed))]
    async fn fill_profile(
        &self,
        user_id: Uuid,
        parsed: &ParsedCv,
        parsed_at: DateTime<Utc>,
    ) -> Result<Vec<&'static str>, RecordError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        let mut profile = sqlx::query_as::<_, Profile>(
            "SELECT * FROM profiles WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let filled = merge_parsed_into_profile(&mut profile, parsed, parsed_at);
        sqlx::query(
            r#"
            UPDATE profiles SET
                full_name = $2,
                phone = $3,
                location = $4,
                about = $5,
                skills = $6,
                experience = $7,
                education = $8,
                languages = $9,
                certifications = $10,
                last_parsed_at = $11
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(&profile.full_name)
        .bind(&profile.phone)
        .bind(&profile.location)
        .bind(&profile.about)
        .bind(&profile.skills)
        .bind(&profile.experience)
        .bind(&profile.education)
        .bind(&profile.languages)
        .bind(&profile.certifications)
        .bind(profile.last_parsed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(filled)
    }

    #[instrument(skip(self, cv), fields(user_id = %cv.user_id))]
    async fn insert_cv(&self, cv: NewCv) -> Result<CvRow, RecordError> {
        let row = sqlx::query_as::<_, CvRow>(
            r#"
            INSERT INTO cvs (id, user_id, original_filename, s3_key, mime_type, size_bytes, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(cv.user_id)
        .bind(&cv.original_filename)
        .bind(&cv.s3_key)
        .bind(&cv.mime_type)
        .bind(cv.size_bytes)
        .bind(CvStatus::Uploaded.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_cv(&self, id: Uuid) -> Result<Option<CvRow>, RecordError> {
        let row = sqlx::query_as::<_, CvRow>("SELECT * FROM cvs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_cvs(&self, user_id: Uuid) -> Result<Vec<CvDetails>, RecordError> {
        let rows = sqlx::query_as::<_, CvDetails>(
            r#"
            SELECT cvs.*, parsed_resumes.json_payload AS parsed_data
            FROM cvs
            LEFT JOIN parsed_resumes ON parsed_resumes.id = cvs.parsed_resume_id
            WHERE cvs.user_id = $1
            ORDER BY cvs.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    #[instrument(skip(self))]
    async fn delete_cv(&self, id: Uuid) -> Result<CvRow, RecordError> {
        let mut tx = self.pool.begin().await?;

        let cv = sqlx::query_as::<_, CvRow>("DELETE FROM cvs WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RecordError::CvNotFound(id))?;
        if let Some(parsed_id) = cv.parsed_resume_id {
            sqlx::query("DELETE FROM parsed_resumes WHERE id = $1")
                .bind(parsed_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(cv)
    }

    async fn set_cv_status(
        &self,
        id: Uuid,
        status: CvStatus,
        error_message: Option<&str>,
    ) -> Result<(), RecordError> {
        let result = sqlx::query(
            "UPDATE cvs SET status = $2, error_message = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RecordError::CvNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self, parsed), fields(parsed_resume_id = %parsed.id))]
    async fn attach_parsed_resume(
        &self,
        cv_id: Uuid,
        parsed: &ParsedResumeRow,
    ) -> Result<(), RecordError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO parsed_resumes (id, json_payload, skills, positions, raw_text, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(parsed.id)
        .bind(&parsed.json_payload)
        .bind(&parsed.skills)
        .bind(&parsed.positions)
        .bind(&parsed.raw_text)
        .bind(parsed.created_at)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            UPDATE cvs
            SET status = $2, parsed_resume_id = $3, error_message = NULL, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(cv_id)
        .bind(CvStatus::Parsed.as_str())
        .bind(parsed.id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RecordError::CvNotFound(cv_id));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_parsed_resume(&self, id: Uuid) -> Result<Option<ParsedResumeRow>, RecordError> {
        let row = sqlx::query_as::<_, ParsedResumeRow>("SELECT * FROM parsed_resumes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}
