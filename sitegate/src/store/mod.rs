//! Storage seams for keys, sites, webhooks, the delivery ledger and pending retries.
//!
//! Every trait is object-safe and shared as `Arc<dyn Trait>` so the gateway
//! can run against the in-process [`MemoryStore`] or a database-backed
//! implementation without changing callers.
//!
//! Operations that must not interleave with concurrent callers (quota
//! consumption, stats updates, retry claims) are single trait methods so an
//! implementation can make each one atomic.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::StoreError;
use crate::events::EventKind;
use crate::keys::{ApiKey, QuotaDecision};
use crate::webhooks::{DeliveryAttempt, DeliveryOutcome, PendingRetry, WebhookSubscription};

pub use memory::MemoryStore;

/// Persisted API keys.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Insert a new key. Fails with `Conflict` if the hash already exists.
    async fn insert_key(&self, key: ApiKey) -> Result<(), StoreError>;

    async fn get_key(&self, key_id: &str) -> Result<Option<ApiKey>, StoreError>;

    /// Look up an active key by digest. Inactive keys are invisible.
    async fn find_active_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError>;

    /// Atomically apply the fixed-window quota rule to one key.
    ///
    /// Window unset or elapsed: counter becomes 1 and the window restarts at
    /// `now + window`. Otherwise a counter at or above the key's limit is
    /// refused without change, and anything below is incremented.
    async fn consume_quota(
        &self,
        key_id: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<QuotaDecision, StoreError>;

    async fn record_usage(
        &self,
        key_id: &str,
        at: DateTime<Utc>,
        ip: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn set_key_active(&self, key_id: &str, active: bool) -> Result<(), StoreError>;
}

/// Site ownership lookup.
#[async_trait]
pub trait SiteDirectory: Send + Sync {
    /// Owning organization of a site, if the site exists.
    async fn site_owner(&self, site_id: &str) -> Result<Option<String>, StoreError>;

    async fn register_site(&self, site_id: &str, organization_id: &str) -> Result<(), StoreError>;
}

/// The webhook registry.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn insert_webhook(&self, webhook: WebhookSubscription) -> Result<(), StoreError>;

    async fn get_webhook(&self, webhook_id: &str) -> Result<Option<WebhookSubscription>, StoreError>;

    async fn list_for_site(&self, site_id: &str) -> Result<Vec<WebhookSubscription>, StoreError>;

    /// Active subscriptions of a site whose event set contains `event`.
    async fn find_active_for_event(
        &self,
        site_id: &str,
        event: EventKind,
    ) -> Result<Vec<WebhookSubscription>, StoreError>;

    async fn set_webhook_active(
        &self,
        webhook_id: &str,
        active: bool,
    ) -> Result<Option<WebhookSubscription>, StoreError>;

    /// Remove a subscription. Logged attempts are kept.
    async fn delete_webhook(&self, webhook_id: &str) -> Result<bool, StoreError>;

    /// Atomically fold one delivery outcome into the rolling stats.
    async fn record_outcome(
        &self,
        webhook_id: &str,
        outcome: &DeliveryOutcome,
    ) -> Result<(), StoreError>;
}

/// Append-only log of delivery attempts.
#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    async fn append_attempt(&self, attempt: DeliveryAttempt) -> Result<(), StoreError>;

    /// Attempts for one webhook, oldest first.
    async fn attempts_for_webhook(&self, webhook_id: &str) -> Result<Vec<DeliveryAttempt>, StoreError>;
}

/// Durable queue of scheduled retries.
#[async_trait]
pub trait RetryQueue: Send + Sync {
    async fn schedule(&self, retry: PendingRetry) -> Result<(), StoreError>;

    /// Claim up to `limit` rows due at `now` for `lease`.
    ///
    /// A claimed row is invisible to other claimers until the lease expires,
    /// so a worker that dies mid-delivery leaves the row claimable again.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<PendingRetry>, StoreError>;

    /// Remove a claimed row once it has been handled.
    async fn complete(&self, retry_id: &str) -> Result<(), StoreError>;

    async fn pending_count(&self) -> Result<usize, StoreError>;
}
