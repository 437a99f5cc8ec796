//! Reading retention sweeper.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::config::RetentionConfig;
use crate::error::MonitorError;
use crate::repositories::ReadingStore;

/// Deletes readings older than the configured retention window.
pub struct RetentionSweeper {
    readings: Arc<dyn ReadingStore>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(readings: Arc<dyn ReadingStore>, config: RetentionConfig) -> Self {
        Self { readings, config }
    }

    /// Deletes everything timestamped before `now - retention`; returns rows removed.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<u64, MonitorError> {
        let cutoff = now - self.config.retention();
        let started = Instant::now();
        let deleted = self.readings.delete_older_than(cutoff).await?;

        histogram!("retention_sweep_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        counter!("readings_expired_total").increment(deleted);
        info!(deleted, cutoff = %cutoff, "Retention sweep complete");
        Ok(deleted)
    }

    /// Sweeps every `sweep_interval_seconds` until shutdown.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            retention_days = self.config.reading_retention_days,
            "Starting retention sweeper"
        );
        let interval = self.config.sweep_interval();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Retention sweeper shutdown requested");
                    break;
                }
                _ = sleep(interval) => {
                    if let Err(err) = self.sweep_once(Utc::now()).await {
                        error!(error = ?err, "Retention sweep failed");
                    }
                }
            }
        }

        info!("Retention sweeper stopped");
    }
}
