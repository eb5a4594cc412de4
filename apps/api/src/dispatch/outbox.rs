use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::Dispatcher;

const SWEEP_BATCH: i64 = 100;

#[derive(Debug, Clone, Copy)]
pub struct SweeperSettings {
    /// Markers younger than this belong to dispatches still in flight.
    pub sweep_after: Duration,
    pub interval: Duration,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            sweep_after: Duration::from_secs(60),
            interval: Duration::from_secs(30),
        }
    }
}

/// Periodically re-enqueues tasks whose dispatch never reached the queue.
pub async fn run_sweeper(
    dispatcher: Arc<Dispatcher>,
    settings: SweeperSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        sweep_after_secs = settings.sweep_after.as_secs(),
        "Outbox sweeper started"
    );
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let cutoff = match chrono::Duration::from_std(settings.sweep_after) {
            Ok(age) => Utc::now() - age,
            Err(_) => Utc::now(),
        };
        if let Err(e) = dispatcher.sweep_outbox(cutoff, SWEEP_BATCH).await {
            warn!("Outbox sweep failed: {e}");
        }
    }

    info!("Outbox sweeper stopped");
}
