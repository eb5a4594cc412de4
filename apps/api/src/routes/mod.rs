pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::auth::handlers as auth;
use crate::dispatch::handlers;
use crate::dispatch::service::MAX_CV_BYTES;
use crate::notify::ws::ws_handler;
use crate::state::AppState;

/// Room for the multipart envelope around a maximum-size CV.
const UPLOAD_BODY_LIMIT: usize = MAX_CV_BYTES + 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/ws", get(ws_handler))
        // Auth
        .route("/api/v1/auth/otp", post(auth::handle_request_otp))
        .route("/api/v1/auth/otp/verify", post(auth::handle_verify_otp))
        // AI tasks
        .route("/api/v1/ai/cover-letter", post(handlers::handle_cover_letter))
        .route("/api/v1/ai/tasks", get(handlers::handle_list_tasks))
        .route("/api/v1/ai/tasks/:id", get(handlers::handle_get_task))
        // CVs
        .route(
            "/api/v1/cvs",
            get(handlers::handle_list_cvs).merge(
                post(handlers::handle_upload_cv).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
            ),
        )
        .route(
            "/api/v1/cvs/:id",
            get(handlers::handle_get_cv).delete(handlers::handle_delete_cv),
        )
        .route("/api/v1/cvs/:id/download", get(handlers::handle_download_cv))
        .route("/api/v1/cvs/:id/fix", post(handlers::handle_fix_cv))
        .route("/api/v1/cvs/:id/reparse", post(handlers::handle_reparse_cv))
        // Admin
        .route("/api/v1/admin/tasks", get(handlers::handle_admin_list_tasks))
        .route("/api/v1/admin/users", get(handlers::handle_admin_list_users))
        .route("/api/v1/admin/stats", get(handlers::handle_admin_stats))
        .route(
            "/api/v1/admin/tasks/:id/retry",
            post(handlers::handle_admin_retry),
        )
        .route(
            "/api/v1/admin/tasks/:id/job",
            get(handlers::handle_admin_job_status),
        )
        .with_state(state)
}
