use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::profile_merge::merge_parsed_into_profile;
use super::{CandidateStore, RecordError};
use crate::generation::ParsedCv;
use crate::models::cv::{CvDetails, CvRow, CvStatus, NewCv, ParsedResumeRow};
use crate::models::user::{Profile, User, UserPage, UserSummary};
use crate::tasks::store::total_pages;

#[derive(Default)]
struct State {
    users: HashMap<Uuid, User>,
    profiles: HashMap<Uuid, Profile>,
    cvs: HashMap<Uuid, CvRow>,
    parsed: HashMap<Uuid, ParsedResumeRow>,
}

#[derive(Default)]
pub struct InMemoryCandidateStore {
    state: Mutex<State>,
}

impl InMemoryCandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, email: &str) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            created_at: Utc::now(),
        };
        self.state.lock().unwrap().users.insert(user.id, user.clone());
        user
    }

    pub fn remove_user(&self, id: Uuid) {
        self.state.lock().unwrap().users.remove(&id);
    }

    pub fn cv(&self, id: Uuid) -> Option<CvRow> {
        self.state.lock().unwrap().cvs.get(&id).cloned()
    }

    pub fn profile(&self, user_id: Uuid) -> Option<Profile> {
        self.state.lock().unwrap().profiles.get(&user_id).cloned()
    }

    /// Stores a profile as the user would by editing it.
    pub fn set_profile(&self, profile: Profile) {
        self.state
            .lock()
            .unwrap()
            .profiles
            .insert(profile.user_id, profile);
    }

    pub fn parsed_count(&self) -> usize {
        self.state.lock().unwrap().parsed.len()
    }
}

#[async_trait]
impl CandidateStore for InMemoryCandidateStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, RecordError> {
        Ok(self.state.lock().unwrap().users.get(&id).cloned())
    }

    async fn list_users(&self, page: i64, limit: i64) -> Result<UserPage, RecordError> {
        let state = self.state.lock().unwrap();
        let mut users: Vec<UserSummary> = state
            .users
            .values()
            .map(|user| UserSummary {
                id: user.id,
                email: user.email.clone(),
                created_at: user.created_at,
                full_name: state.profiles.get(&user.id).and_then(|p| p.full_name.clone()),
                cv_count: state.cvs.values().filter(|cv| cv.user_id == user.id).count() as i64,
            })
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = users.len() as i64;
        let page = page.max(1);
        let users = users
            .into_iter()
            .skip(((page - 1) * limit).max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok(UserPage {
            users,
            total,
            page,
            total_pages: total_pages(total, limit),
        })
    }

    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, RecordError> {
        Ok(self.profile(user_id))
    }

    async fn fill_profile(
        &self,
        user_id: Uuid,
        parsed: &ParsedCv,
        parsed_at: DateTime<Utc>,
    ) -> Result<Vec<&'static str>, RecordError> {
        let mut state = self.state.lock().unwrap();
        let profile = state
            .profiles
            .entry(user_id)
            .or_insert_with(|| Profile::empty(user_id));
        Ok(merge_parsed_into_profile(profile, parsed, parsed_at))
    }

    async fn insert_cv(&self, cv: NewCv) -> Result<CvRow, RecordError> {
        let now = Utc::now();
        let row = CvRow {
            id: Uuid::new_v4(),
            user_id: cv.user_id,
            original_filename: cv.original_filename,
            s3_key: cv.s3_key,
            mime_type: cv.mime_type,
            size_bytes: cv.size_bytes,
            status: CvStatus::Uploaded.as_str().to_string(),
            parsed_resume_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().unwrap().cvs.insert(row.id, row.clone());
        Ok(row)
    }

    async fn get_cv(&self, id: Uuid) -> Result<Option<CvRow>, RecordError> {
        Ok(self.cv(id))
    }

    async fn list_cvs(&self, user_id: Uuid) -> Result<Vec<CvDetails>, RecordError> {
        let state = self.state.lock().unwrap();
        let mut cvs: Vec<CvDetails> = state
            .cvs
            .values()
            .filter(|cv| cv.user_id == user_id)
            .map(|cv| CvDetails {
                parsed_data: cv
                    .parsed_resume_id
                    .and_then(|id| state.parsed.get(&id))
                    .map(|row| row.json_payload.clone()),
                cv: cv.clone(),
            })
            .collect();
        cvs.sort_by(|a, b| b.cv.created_at.cmp(&a.cv.created_at));
        Ok(cvs)
    }

    async fn delete_cv(&self, id: Uuid) -> Result<CvRow, RecordError> {
        let mut state = self.state.lock().unwrap();
        let cv = state.cvs.remove(&id).ok_or(RecordError::CvNotFound(id))?;
        if let Some(parsed_id) = cv.parsed_resume_id {
            state.parsed.remove(&parsed_id);
        }
        Ok(cv)
    }

    async fn set_cv_status(
        &self,
        id: Uuid,
        status: CvStatus,
        error_message: Option<&str>,
    ) -> Result<(), RecordError> {
        let mut state = self.state.lock().unwrap();
        let cv = state.cvs.get_mut(&id).ok_or(RecordError::CvNotFound(id))?;
        cv.status = status.as_str().to_string();
        cv.error_message = error_message.map(str::to_string);
        cv.updated_at = Utc::now();
        Ok(())
    }

    async fn attach_parsed_resume(
        &self,
        cv_id: Uuid,
        parsed: &ParsedResumeRow,
    ) -> Result<(), RecordError> {
        let mut state = self.state.lock().unwrap();
        let cv = state.cvs.get_mut(&cv_id).ok_or(RecordError::CvNotFound(cv_id))?;
        cv.status = CvStatus::Parsed.as_str().to_string();
        cv.parsed_resume_id = Some(parsed.id);
        cv.error_message = None;
        cv.updated_at = Utc::now();
        state.parsed.insert(parsed.id, parsed.clone());
        Ok(())
    }

    async fn get_parsed_resume(&self, id: Uuid) -> Result<Option<ParsedResumeRow>, RecordError> {
        Ok(self.state.lock().unwrap().parsed.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn parsed() -> ParsedCv {
        ParsedCv {
            full_name: Some("Ada Lovelace".to_string()),
            location: Some("London".to_string()),
            skills: vec!["Rust".to_string()],
            ..ParsedCv::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_fill_profile_keeps_edits_racing_with_parses() {
        let store = Arc::new(InMemoryCandidateStore::new());
        let user = store.add_user("ada@example.com");

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                if i == 8 {
                    let mut edited = Profile::empty(user.id);
                    edited.full_name = Some("Augusta King".to_string());
                    edited.skills = vec!["Go".to_string()];
                    store.set_profile(edited);
                } else {
                    store.fill_profile(user.id, &parsed(), Utc::now()).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let profile = store.profile(user.id).unwrap();
        assert_eq!(profile.full_name.as_deref(), Some("Augusta King"));
        assert_eq!(profile.skills, vec!["Go".to_string()]);
    }

    #[tokio::test]
    async fn test_fill_profile_creates_missing_profile() {
        let store = InMemoryCandidateStore::new();
        let user = store.add_user("ada@example.com");

        let filled = store.fill_profile(user.id, &parsed(), Utc::now()).await.unwrap();

        assert_eq!(filled, vec!["full_name", "location", "skills"]);
        let profile = store.profile(user.id).unwrap();
        assert_eq!(profile.location.as_deref(), Some("London"));
        assert!(profile.last_parsed_at.is_some());
    }
}
