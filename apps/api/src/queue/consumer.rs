use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use super::{Delivery, FailOutcome, JobQueue, QueueError, QueueName};

/// Why a job attempt failed and whether another attempt could help.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub reason: String,
    pub retryable: bool,
    /// A newer attempt owns the work. The job is left to its current holder.
    pub superseded: bool,
}

impl JobFailure {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: true,
            superseded: false,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
            superseded: false,
        }
    }

    pub fn superseded(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
            superseded: true,
        }
    }
}

/// Reason recorded on jobs whose last attempt lost its lease.
pub const LEASE_EXPIRED: &str = "lease expired with no attempts left";

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> Result<Value, JobFailure>;

    /// Called instead of `handle` for a job that will not run again, before
    /// the queue marks it failed.
    async fn abandon(&self, _delivery: &Delivery, _reason: &str) {}
}

#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub lease: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(500),
            lease: Duration::from_secs(300),
        }
    }
}

/// Pulls deliveries from one named queue and runs them on a bounded pool.
pub struct QueueConsumer {
    name: QueueName,
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    settings: ConsumerSettings,
}

impl QueueConsumer {
    pub fn new(
        name: QueueName,
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            name,
            queue,
            handler,
            settings,
        }
    }

    pub fn name(&self) -> QueueName {
        self.name
    }

    /// Runs until `shutdown` flips to true, then waits for in-flight jobs.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let concurrency = self.settings.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        info!(queue = %self.name, concurrency, "Queue consumer started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            match self.queue.reserve(self.name, self.settings.lease).await {
                Ok(Some(delivery)) => {
                    let queue = self.queue.clone();
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        process(queue.as_ref(), handler.as_ref(), delivery).await;
                        drop(permit);
                    });
                    continue;
                }
                Ok(None) => drop(permit),
                Err(e) => {
                    drop(permit);
                    warn!(queue = %self.name, "Failed to reserve job: {e}");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        let _ = permits.acquire_many(concurrency as u32).await;
        info!(queue = %self.name, "Queue consumer stopped");
    }

    /// Reserves and fully processes at most one job. Returns whether one ran.
    pub async fn poll_once(&self) -> Result<bool, QueueError> {
        match self.queue.reserve(self.name, self.settings.lease).await? {
            Some(delivery) => {
                process(self.queue.as_ref(), self.handler.as_ref(), delivery).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

async fn process(queue: &dyn JobQueue, handler: &dyn JobHandler, delivery: Delivery) {
    if delivery.exhausted {
        handler.abandon(&delivery, LEASE_EXPIRED).await;
        record_failure(queue, &delivery, &JobFailure::fatal(LEASE_EXPIRED)).await;
        return;
    }

    match handler.handle(&delivery).await {
        Ok(result) => match queue
            .complete(delivery.queue, delivery.id, delivery.lease, result)
            .await
        {
            Ok(()) => {}
            Err(QueueError::LostLease(_)) => {
                warn!(job_id = %delivery.id, "Lease lost before completion, result dropped")
            }
            Err(e) => error!(job_id = %delivery.id, "Failed to mark job completed: {e}"),
        },
        Err(failure) if failure.superseded => info!(
            job_id = %delivery.id,
            attempt = delivery.attempt,
            "Attempt superseded, leaving job to its current holder: {}",
            failure.reason
        ),
        Err(failure) => record_failure(queue, &delivery, &failure).await,
    }
}

async fn record_failure(queue: &dyn JobQueue, delivery: &Delivery, failure: &JobFailure) {
    match queue
        .fail(
            delivery.queue,
            delivery.id,
            delivery.lease,
            &failure.reason,
            failure.retryable,
        )
        .await
    {
        Ok(FailOutcome::Retrying { next_attempt, delay }) => info!(
            job_id = %delivery.id,
            next_attempt,
            delay_ms = delay.as_millis() as u64,
            "Job attempt failed, retrying: {}",
            failure.reason
        ),
        Ok(FailOutcome::Exhausted) => warn!(
            job_id = %delivery.id,
            attempts = delivery.attempt,
            "Job failed permanently: {}",
            failure.reason
        ),
        Err(QueueError::LostLease(_)) => {
            warn!(job_id = %delivery.id, "Lease lost before failure was recorded")
        }
        Err(e) => error!(job_id = %delivery.id, "Failed to record job failure: {e}"),
    }
}
