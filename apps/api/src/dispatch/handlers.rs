use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::dispatch::service::{
    CoverLetterRequest, CvFixRequest, CvUpload, DispatchResponse, DownloadLink, UploadResponse,
};
use crate::errors::AppError;
use crate::models::cv::CvDetails;
use crate::models::task::{Task, TaskPage, TaskStats};
use crate::models::user::UserPage;
use crate::queue::JobStatusInfo;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct TaskListQuery {
    pub user_id: Uuid,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct OwnedBody<T> {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub body: T,
}

/// POST /api/v1/ai/cover-letter
pub async fn handle_cover_letter(
    State(state): State<AppState>,
    Json(req): Json<OwnedBody<CoverLetterRequest>>,
) -> Result<(StatusCode, Json<DispatchResponse>), AppError> {
    let response = state
        .dispatcher
        .request_cover_letter(req.user_id, req.body)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /api/v1/ai/tasks
pub async fn handle_list_tasks(
    State(state): State<AppState>,
    Query(params): Query<TaskListQuery>,
) -> Result<Json<Vec<Task>>, AppError> {
    let tasks = state
        .dispatcher
        .list_tasks(params.user_id, params.limit)
        .await?;
    Ok(Json(tasks))
}

/// GET /api/v1/ai/tasks/:id
pub async fn handle_get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(state.dispatcher.get_task(params.user_id, id).await?))
}

/// POST /api/v1/cvs
///
/// Multipart fields: `user_id` and `file`.
pub async fn handle_upload_cv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut user_id: Option<Uuid> = None;
    let mut upload: Option<CvUpload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read multipart: {e}")))?
    {
        match field.name() {
            Some("user_id") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read user_id: {e}")))?;
                let id = raw
                    .trim()
                    .parse()
                    .map_err(|_| AppError::Validation("user_id must be a UUID".to_string()))?;
                user_id = Some(id);
            }
            Some("file") => {
                let filename = field.file_name().unwrap_or("cv").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read file: {e}")))?;
                tracing::debug!(%filename, %content_type, bytes = data.len(), "CV file received");
                upload = Some(CvUpload {
                    filename,
                    content_type,
                    data,
                });
            }
            _ => {}
        }
    }

    let user_id = user_id.ok_or_else(|| AppError::Validation("user_id is required".to_string()))?;
    let upload = upload.ok_or_else(|| AppError::Validation("No file uploaded".to_string()))?;
    let response = state.dispatcher.upload_cv(user_id, upload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/v1/cvs
pub async fn handle_list_cvs(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<Vec<CvDetails>>, AppError> {
    Ok(Json(state.dispatcher.list_cvs(params.user_id).await?))
}

/// GET /api/v1/cvs/:id
pub async fn handle_get_cv(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<CvDetails>, AppError> {
    Ok(Json(state.dispatcher.get_cv(params.user_id, id).await?))
}

/// DELETE /api/v1/cvs/:id
pub async fn handle_delete_cv(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<StatusCode, AppError> {
    state.dispatcher.delete_cv(params.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/cvs/:id/download
pub async fn handle_download_cv(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<DownloadLink>, AppError> {
    Ok(Json(state.dispatcher.download_cv(params.user_id, id).await?))
}

/// POST /api/v1/cvs/:id/fix
pub async fn handle_fix_cv(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<OwnedBody<CvFixRequest>>,
) -> Result<(StatusCode, Json<DispatchResponse>), AppError> {
    let response = state
        .dispatcher
        .request_cv_fix(req.user_id, id, req.body)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// POST /api/v1/cvs/:id/reparse
pub async fn handle_reparse_cv(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UserIdQuery>,
) -> Result<(StatusCode, Json<DispatchResponse>), AppError> {
    let response = state.dispatcher.request_cv_reparse(req.user_id, id).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /api/v1/admin/tasks
pub async fn handle_admin_list_tasks(
    State(state): State<AppState>,
    Query(params): Query<PageQuery>,
) -> Result<Json<TaskPage>, AppError> {
    let page = state
        .dispatcher
        .list_all_tasks(params.page, params.limit)
        .await?;
    Ok(Json(page))
}

/// GET /api/v1/admin/users
pub async fn handle_admin_list_users(
    State(state): State<AppState>,
    Query(params): Query<PageQuery>,
) -> Result<Json<UserPage>, AppError> {
    let page = state
        .dispatcher
        .list_users(params.page, params.limit)
        .await?;
    Ok(Json(page))
}

/// GET /api/v1/admin/stats
pub async fn handle_admin_stats(
    State(state): State<AppState>,
) -> Result<Json<TaskStats>, AppError> {
    Ok(Json(state.dispatcher.task_stats().await?))
}

/// POST /api/v1/admin/tasks/:id/retry
pub async fn handle_admin_retry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<DispatchResponse>), AppError> {
    let response = state.dispatcher.retry_task(id).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /api/v1/admin/tasks/:id/job
pub async fn handle_admin_job_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobStatusInfo>, AppError> {
    Ok(Json(state.dispatcher.job_status(id).await?))
}
