use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct OtpRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct OtpVerifyRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Serialize)]
pub struct OtpResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct OtpVerifyResponse {
    pub verified: bool,
    pub message: String,
}

fn validate_email(email: &str) -> Result<&str, AppError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AppError::Validation("A valid email is required".to_string())),
    }
}

/// POST /api/v1/auth/otp
pub async fn handle_request_otp(
    State(state): State<AppState>,
    Json(req): Json<OtpRequest>,
) -> Result<Json<OtpResponse>, AppError> {
    let email = validate_email(&req.email)?;
    let code = state.otp.issue(email).await.map_err(anyhow::Error::from)?;
    // The response does not reveal whether delivery worked.
    match state.mail.send_otp(email, &code).await {
        Ok(()) => info!(email, "OTP issued"),
        Err(e) => warn!(email, "OTP issued but email delivery failed: {e}"),
    }
    Ok(Json(OtpResponse {
        message: "OTP sent successfully".to_string(),
    }))
}

/// POST /api/v1/auth/otp/verify
pub async fn handle_verify_otp(
    State(state): State<AppState>,
    Json(req): Json<OtpVerifyRequest>,
) -> Result<Json<OtpVerifyResponse>, AppError> {
    let email = validate_email(&req.email)?;
    let verified = state
        .otp
        .verify(email, &req.otp)
        .await
        .map_err(anyhow::Error::from)?;
    if !verified {
        return Err(AppError::Validation("Invalid or expired OTP".to_string()));
    }
    info!(email, "OTP verified");
    Ok(Json(OtpVerifyResponse {
        verified: true,
        message: "Email verified successfully".to_string(),
    }))
}
