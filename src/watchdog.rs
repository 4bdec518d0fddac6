//! Recovery for jobs abandoned by a dead worker. A Pending or Running job
//! whose deadline plus grace period has elapsed is forced to TimedOut;
//! the store's conditional update makes a race against a tardy worker
//! resolve in favor of whoever writes first.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::WatchdogConfig;
use crate::error::Result;
use crate::store::{JobStore, Transition};

pub struct LostJobWatchdog {
    store: Arc<dyn JobStore>,
    config: WatchdogConfig,
}

impl LostJobWatchdog {
    pub fn new(store: Arc<dyn JobStore>, config: WatchdogConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(&self, token: CancellationToken) {
        if !self.config.enabled {
            tracing::info!("lost-job watchdog disabled");
            return;
        }
        tracing::info!(
            scan_interval = ?self.config.scan_interval,
            lost_grace = ?self.config.lost_grace,
            "lost-job watchdog started"
        );

        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.sweep().await {
                // A failed sweep must never kill the loop.
                tracing::error!(error = %e, "lost-job sweep failed");
            }
        }
        tracing::info!("lost-job watchdog stopped");
    }

    async fn sweep(&self) -> Result<()> {
        let overdue = self.store.overdue(self.config.lost_grace).await?;
        for job_id in overdue {
            match self.store.force_timeout(job_id).await {
                Ok(Transition::Applied) => {
                    tracing::warn!(job_id = %job_id, "lost job forced to timed out");
                }
                Ok(Transition::Ignored) => {
                    tracing::debug!(job_id = %job_id, "overdue job resolved before sweep");
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "failed to time out lost job");
                }
            }
        }
        Ok(())
    }
}
