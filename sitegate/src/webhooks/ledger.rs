//! Delivery ledger records: logged attempts, stats outcomes and pending retries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::EventKind;
use crate::webhooks::{Occurrence, WebhookSubscription};

/// One logged HTTP try for one (webhook, occurrence) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: String,
    pub webhook_id: String,
    pub occurrence_id: String,
    pub event: EventKind,
    pub payload: serde_json::Value,
    /// 1-based.
    pub attempt_number: u32,
    /// `None` when the request never produced a response.
    pub status_code: Option<u16>,
    pub response_time_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
    pub attempted_at: DateTime<Utc>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Result of one attempt as it affects the subscription's rolling stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub at: DateTime<Utc>,
}

impl DeliveryOutcome {
    /// Fold this outcome into a subscription's counters.
    pub fn apply(&self, webhook: &mut WebhookSubscription) {
        if self.success {
            webhook.success_count += 1;
            webhook.failure_count = 0;
        } else {
            webhook.failure_count += 1;
        }
        webhook.last_triggered_at = Some(self.at);
        webhook.last_status_code = self.status_code;
    }
}

/// A scheduled retry, persisted until a worker claims and completes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRetry {
    pub id: String,
    pub webhook_id: String,
    pub occurrence: Occurrence,
    /// Attempt number the retry will run as.
    pub attempt_number: u32,
    pub due_at: DateTime<Utc>,
    pub claimed_until: Option<DateTime<Utc>>,
}

impl PendingRetry {
    /// Whether a claimer at `now` may take this row.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now && self.claimed_until.map(|until| until <= now).unwrap_or(true)
    }
}
