use std::str::FromStr;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub s3_region: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub queue_attempts: u32,
    pub queue_backoff_ms: u64,
    pub worker_concurrency: usize,
    pub worker_poll_ms: u64,
    pub job_lease_secs: u64,
    pub outbox_sweep_after_secs: u64,
    pub otp_ttl_secs: u64,
    /// No relay means emails are logged instead of sent.
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_starttls: bool,
    pub email_from: String,
    pub frontend_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            database_max_connections: optional_env("DATABASE_MAX_CONNECTIONS", 10)?,
            redis_url: require_env("REDIS_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            s3_region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: optional_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            queue_attempts: optional_env("QUEUE_ATTEMPTS", 3)?,
            queue_backoff_ms: optional_env("QUEUE_BACKOFF_MS", 2000)?,
            worker_concurrency: optional_env("WORKER_CONCURRENCY", 2)?,
            worker_poll_ms: optional_env("WORKER_POLL_MS", 500)?,
            job_lease_secs: optional_env("JOB_LEASE_SECS", 300)?,
            outbox_sweep_after_secs: optional_env("OUTBOX_SWEEP_AFTER_SECS", 60)?,
            otp_ttl_secs: optional_env("OTP_TTL_SECS", 600)?,
            smtp_host: non_empty_env("SMTP_HOST"),
            smtp_port: optional_env("SMTP_PORT", 587)?,
            smtp_user: non_empty_env("SMTP_USER"),
            smtp_password: non_empty_env("SMTP_PASSWORD"),
            smtp_starttls: optional_env("SMTP_STARTTLS", true)?,
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "noreply@hireflow.dev".to_string()),
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn optional_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("Environment variable '{key}' has an invalid value: {raw}"))
}
