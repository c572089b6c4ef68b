//! Periodic subscription cleanup.
//!
//! Deactivates subscriptions whose persisted fail count crossed the
//! configured threshold and prunes old dispatch log rows.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Result;
use crate::database::repositories::{DispatchLogRepository, SubscriptionRepository};
use crate::database::time::{cutoff_ms, now_ms};

#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// Deactivate at or above this many consecutive failures.
    pub fail_threshold: i64,
    pub interval: Duration,
    /// Dispatch log rows older than this are deleted.
    pub log_retention: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            fail_threshold: 5,
            interval: Duration::from_secs(60 * 60),
            log_retention: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Result of one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JanitorReport {
    pub deactivated: u64,
    pub logs_deleted: u64,
}

pub struct SubscriptionJanitor {
    subscriptions: Arc<dyn SubscriptionRepository>,
    dispatch_logs: Option<Arc<dyn DispatchLogRepository>>,
    config: JanitorConfig,
}

impl SubscriptionJanitor {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        dispatch_logs: Option<Arc<dyn DispatchLogRepository>>,
        config: JanitorConfig,
    ) -> Self {
        Self {
            subscriptions,
            dispatch_logs,
            config,
        }
    }

    /// Run the cleanup loop until `cancel` fires. The first pass runs immediately.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Subscription janitor stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!(error = %e, "Subscription cleanup failed");
                        }
                    }
                }
            }
        })
    }

    pub async fn run_once(&self) -> Result<JanitorReport> {
        let deactivated = self
            .subscriptions
            .deactivate_failing(self.config.fail_threshold)
            .await?;
        if deactivated > 0 {
            info!(
                deactivated,
                threshold = self.config.fail_threshold,
                "Deactivated failing push subscriptions"
            );
        }

        let mut logs_deleted = 0;
        if let Some(logs) = &self.dispatch_logs {
            logs_deleted = logs
                .cleanup_older_than(cutoff_ms(now_ms(), self.config.log_retention))
                .await?;
            if logs_deleted > 0 {
                info!(logs_deleted, "Pruned old dispatch log entries");
            }
        }

        Ok(JanitorReport {
            deactivated,
            logs_deleted,
        })
    }
}
