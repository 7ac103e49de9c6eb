//! Retry scheduling for failed deliveries.
//!
//! Failed attempts leave a [`PendingRetry`] row in the [`RetryQueue`]. The
//! scheduler polls for rows that are due, claims them under a lease, and
//! runs each one through the [`DeliveryWorker`] with a bounded number in
//! flight. Because rows live in the queue rather than in timers, retries
//! survive a restart and several instances can share one queue.
//!
//! Per (webhook, occurrence):
//!
//! ```text
//! pending ──claim──▶ in-flight ──2xx──────────────▶ succeeded
//!                        │──fail, retries left──▶ pending (attempt + 1)
//!                        └──fail, ceiling hit───▶ exhausted
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::StoreError;
use crate::store::{RetryQueue, WebhookStore};
use crate::webhooks::{DeliveryWorker, PendingRetry};

/// Polling and concurrency limits for the scheduler.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub lease: chrono::Duration,
    pub concurrency: usize,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 50,
            lease: chrono::Duration::seconds(60),
            concurrency: 32,
        }
    }
}

/// Claims due retries and re-enters the delivery worker.
#[derive(Clone)]
pub struct RetryScheduler {
    retries: Arc<dyn RetryQueue>,
    webhooks: Arc<dyn WebhookStore>,
    worker: Arc<DeliveryWorker>,
    semaphore: Arc<Semaphore>,
    settings: RetrySettings,
}

impl RetryScheduler {
    pub fn new(
        retries: Arc<dyn RetryQueue>,
        webhooks: Arc<dyn WebhookStore>,
        worker: Arc<DeliveryWorker>,
        settings: RetrySettings,
    ) -> Self {
        Self {
            retries,
            webhooks,
            worker,
            semaphore: Arc::new(Semaphore::new(settings.concurrency.max(1))),
            settings,
        }
    }

    /// Poll until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        tokio::pin!(shutdown);

        info!(
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            batch_size = self.settings.batch_size,
            concurrency = self.settings.concurrency,
            "retry_scheduler_started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("retry_scheduler_stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_due(Utc::now()).await {
                        error!(error = %e, "retry_claim_failed");
                    }
                }
            }
        }
    }

    /// Claim every retry due at `now` (up to the batch size) and run them.
    ///
    /// Returns the number of rows claimed. Completes once all claimed retries
    /// have been handled.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let claimed = self
            .retries
            .claim_due(now, self.settings.batch_size, self.settings.lease)
            .await?;

        if claimed.is_empty() {
            return Ok(0);
        }

        let count = claimed.len();
        info!(claimed = count, "retry_batch_claimed");

        let tasks = claimed.into_iter().map(|retry| async move {
            let _permit = self.semaphore.acquire().await;
            self.fire(retry).await;
        });
        futures::future::join_all(tasks).await;

        Ok(count)
    }

    /// Handle one claimed row.
    ///
    /// The subscription is re-read first, so a webhook deleted or disabled
    /// after the retry was armed gets no further attempts.
    async fn fire(&self, retry: PendingRetry) {
        match self.webhooks.get_webhook(&retry.webhook_id).await {
            Ok(Some(webhook)) if webhook.is_active => {
                self.worker
                    .deliver(&webhook, &retry.occurrence, retry.attempt_number)
                    .await;
            }
            Ok(Some(_)) => {
                info!(
                    webhook_id = %retry.webhook_id,
                    occurrence_id = %retry.occurrence.id,
                    attempt_number = retry.attempt_number,
                    "retry_dropped_inactive"
                );
            }
            Ok(None) => {
                info!(
                    webhook_id = %retry.webhook_id,
                    occurrence_id = %retry.occurrence.id,
                    attempt_number = retry.attempt_number,
                    "retry_dropped_deleted"
                );
            }
            Err(e) => {
                // Row stays leased; it becomes claimable again when the lease runs out.
                warn!(webhook_id = %retry.webhook_id, error = %e, "retry_webhook_lookup_failed");
                return;
            }
        }

        if let Err(e) = self.retries.complete(&retry.id).await {
            error!(retry_id = %retry.id, error = %e, "retry_complete_failed");
        }
    }
}
