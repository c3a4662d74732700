use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::ports::{JobRepository, RepositoryError};

/// Periodically deletes terminal jobs older than the retention window.
/// Pending and Processing jobs are never touched, whatever their age.
pub struct RetentionSweeper {
    repository: Arc<dyn JobRepository>,
    retention_window: Duration,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(repository: Arc<dyn JobRepository>, config: &EngineConfig) -> Self {
        Self {
            repository,
            retention_window: config.retention_window,
            interval: config.retention_sweep_interval,
        }
    }

    /// Run one sweep. Returns the number of deleted jobs.
    pub async fn sweep_once(&self) -> Result<usize, RepositoryError> {
        let window = chrono::Duration::from_std(self.retention_window)
            .unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = Utc::now().checked_sub_signed(window) else {
            return Ok(0);
        };

        let deleted = self.repository.delete_terminal_older_than(cutoff).await?;
        if deleted > 0 {
            tracing::info!(deleted, cutoff = %cutoff, "Retention sweep removed terminal jobs");
        } else {
            tracing::debug!(cutoff = %cutoff, "Retention sweep found nothing to remove");
        }
        Ok(deleted)
    }

    /// Sweep on every interval tick until shutdown. The first sweep runs immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::error!(error = %e, "Retention sweep failed");
                    }
                }
            }
        }
        tracing::info!("Retention sweeper stopped");
    }
}
