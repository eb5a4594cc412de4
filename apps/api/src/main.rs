mod auth;
mod candidates;
mod config;
mod db;
mod dispatch;
mod errors;
mod extraction;
mod generation;
mod llm_client;
mod mail;
mod models;
mod notify;
mod queue;
mod render;
mod routes;
mod state;
mod storage;
mod tasks;
#[cfg(test)]
mod test_support;
mod workers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::auth::RedisOtpStore;
use crate::candidates::{CandidateStore, PgCandidateStore};
use crate::config::Config;
use crate::db::create_pool;
use crate::dispatch::{run_sweeper, Dispatcher, SweeperSettings};
use crate::generation::{GenerationService, LlmGenerationService};
use crate::llm_client::LlmClient;
use crate::mail::{LogMailer, MailService, Mailer, SmtpMailer, SmtpSettings};
use crate::notify::{Notifier, SessionRegistry};
use crate::queue::{
    Backoff, ConsumerSettings, EnqueueOptions, JobQueue, QueueConsumer, QueueName, RedisQueue,
};
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::{BlobStorage, S3BlobStorage};
use crate::tasks::{PgTaskStore, TaskStore};
use crate::workers::{CoverLetterWorker, CvFixWorker, CvParseWorker, TaskRunner, TaskWorker};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Hireflow API v{}", env!("CARGO_PKG_VERSION"));

    // PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url, config.database_max_connections).await?;
    let tasks: Arc<dyn TaskStore> = Arc::new(PgTaskStore::new(db.clone()));
    let records: Arc<dyn CandidateStore> = Arc::new(PgCandidateStore::new(db));

    // Redis: job queue and OTP codes
    let redis = redis::Client::open(config.redis_url.clone())?;
    let queue: Arc<dyn JobQueue> = Arc::new(RedisQueue::connect(&redis).await?);
    let otp = Arc::new(
        RedisOtpStore::connect(&redis, Duration::from_secs(config.otp_ttl_secs)).await?,
    );
    info!("Redis connections established");

    // S3 / MinIO
    let s3 = build_s3_client(&config).await;
    let storage: Arc<dyn BlobStorage> = Arc::new(S3BlobStorage::new(
        s3,
        config.s3_bucket.clone(),
        config.s3_endpoint.clone(),
    ));
    info!("S3 client initialized");

    // LLM
    let llm = LlmClient::new(config.anthropic_api_key.clone())?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);
    let generation: Arc<dyn GenerationService> = Arc::new(LlmGenerationService::new(llm));

    // Email
    let mailer: Arc<dyn Mailer> = match &config.smtp_host {
        Some(host) => {
            let mailer = SmtpMailer::new(&SmtpSettings {
                host: host.clone(),
                port: config.smtp_port,
                username: config.smtp_user.clone(),
                password: config.smtp_password.clone(),
                starttls: config.smtp_starttls,
                from: config.email_from.clone(),
            })?;
            info!("SMTP relay configured ({host}:{})", config.smtp_port);
            Arc::new(mailer)
        }
        None => {
            warn!("SMTP_HOST not set, emails will only be logged");
            Arc::new(LogMailer)
        }
    };
    let mail = Arc::new(MailService::new(
        mailer,
        &config.frontend_url,
        Duration::from_secs(config.otp_ttl_secs),
    ));

    let sessions = Arc::new(SessionRegistry::new());
    let notifier: Arc<dyn Notifier> = sessions.clone();

    let enqueue_options = EnqueueOptions {
        attempts: config.queue_attempts.max(1),
        backoff: Backoff::Exponential(config.queue_backoff_ms),
    };
    let dispatcher = Arc::new(Dispatcher::new(
        tasks.clone(),
        queue.clone(),
        records.clone(),
        storage.clone(),
        enqueue_options,
    ));

    // Background workers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer_settings = ConsumerSettings {
        concurrency: config.worker_concurrency,
        poll_interval: Duration::from_millis(config.worker_poll_ms),
        lease: Duration::from_secs(config.job_lease_secs),
    };
    let workers: Vec<Arc<dyn TaskWorker>> = vec![
        Arc::new(CvParseWorker::new(
            records.clone(),
            storage.clone(),
            generation.clone(),
            notifier.clone(),
            mail.clone(),
        )),
        Arc::new(CvFixWorker::new(
            records.clone(),
            storage.clone(),
            generation.clone(),
            mail.clone(),
        )),
        Arc::new(CoverLetterWorker::new(
            records.clone(),
            generation.clone(),
            mail.clone(),
        )),
    ];

    let mut background: Vec<JoinHandle<()>> = Vec::new();
    for worker in workers {
        let name = QueueName::from(worker.kind());
        let runner = Arc::new(TaskRunner::new(
            worker,
            tasks.clone(),
            queue.clone(),
            notifier.clone(),
        ));
        let consumer = QueueConsumer::new(name, queue.clone(), runner, consumer_settings);
        background.push(tokio::spawn(consumer.run(shutdown_rx.clone())));
    }
    background.push(tokio::spawn(run_sweeper(
        dispatcher.clone(),
        SweeperSettings {
            sweep_after: Duration::from_secs(config.outbox_sweep_after_secs),
            ..SweeperSettings::default()
        },
        shutdown_rx,
    )));

    let state = AppState {
        dispatcher,
        sessions,
        otp,
        mail,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining workers");
    let _ = shutdown_tx.send(true);
    for handle in background {
        if let Err(e) = handle.await {
            warn!("Background task ended abnormally: {e}");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "hireflow-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(config.s3_region.clone()))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&s3_config)
        .force_path_style(true)
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}
