//! In-process store backing every storage trait.
//!
//! Each table sits behind its own tokio lock. Read-modify-write operations
//! take the write lock once for the whole operation, which is what makes
//! quota consumption, stats updates and retry claims atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::error::StoreError;
use crate::events::EventKind;
use crate::keys::{ApiKey, QuotaDecision};
use crate::store::{DeliveryLedger, KeyStore, RetryQueue, SiteDirectory, WebhookStore};
use crate::webhooks::{DeliveryAttempt, DeliveryOutcome, PendingRetry, WebhookSubscription};

/// Memory-backed implementation of all storage traits.
#[derive(Default)]
pub struct MemoryStore {
    keys: RwLock<HashMap<String, ApiKey>>,
    sites: RwLock<HashMap<String, String>>,
    webhooks: RwLock<HashMap<String, WebhookSubscription>>,
    attempts: RwLock<Vec<DeliveryAttempt>>,
    retries: Mutex<HashMap<String, PendingRetry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn insert_key(&self, key: ApiKey) -> Result<(), StoreError> {
        let mut keys = self.keys.write().await;
        if keys.values().any(|k| k.key_hash == key.key_hash) {
            return Err(StoreError::Conflict("api key hash".to_string()));
        }
        if keys.contains_key(&key.id) {
            return Err(StoreError::Conflict(format!("api key {}", key.id)));
        }
        keys.insert(key.id.clone(), key);
        Ok(())
    }

    async fn get_key(&self, key_id: &str) -> Result<Option<ApiKey>, StoreError> {
        Ok(self.keys.read().await.get(key_id).cloned())
    }

    async fn find_active_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, StoreError> {
        Ok(self
            .keys
            .read()
            .await
            .values()
            .find(|k| k.is_active && k.key_hash == key_hash)
            .cloned())
    }

    async fn consume_quota(
        &self,
        key_id: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<QuotaDecision, StoreError> {
        let mut keys = self.keys.write().await;
        let key = keys
            .get_mut(key_id)
            .ok_or_else(|| StoreError::NotFound(format!("api key {}", key_id)))?;

        let decision = match key.window_reset_at {
            Some(reset_at) if reset_at > now => {
                if key.requests_this_window >= key.rate_limit {
                    QuotaDecision::Exceeded { reset_at }
                } else {
                    key.requests_this_window += 1;
                    QuotaDecision::Allowed {
                        count: key.requests_this_window,
                        reset_at,
                    }
                }
            }
            _ => {
                let reset_at = now + window;
                key.requests_this_window = 1;
                key.window_reset_at = Some(reset_at);
                QuotaDecision::Allowed { count: 1, reset_at }
            }
        };

        Ok(decision)
    }

    async fn record_usage(
        &self,
        key_id: &str,
        at: DateTime<Utc>,
        ip: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut keys = self.keys.write().await;
        let key = keys
            .get_mut(key_id)
            .ok_or_else(|| StoreError::NotFound(format!("api key {}", key_id)))?;
        key.last_used_at = Some(at);
        if let Some(ip) = ip {
            key.last_used_ip = Some(ip.to_string());
        }
        Ok(())
    }

    async fn set_key_active(&self, key_id: &str, active: bool) -> Result<(), StoreError> {
        let mut keys = self.keys.write().await;
        let key = keys
            .get_mut(key_id)
            .ok_or_else(|| StoreError::NotFound(format!("api key {}", key_id)))?;
        key.is_active = active;
        Ok(())
    }
}

#[async_trait]
impl SiteDirectory for MemoryStore {
    async fn site_owner(&self, site_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.sites.read().await.get(site_id).cloned())
    }

    async fn register_site(&self, site_id: &str, organization_id: &str) -> Result<(), StoreError> {
        let mut sites = self.sites.write().await;
        if sites.contains_key(site_id) {
            return Err(StoreError::Conflict(format!("site {}", site_id)));
        }
        sites.insert(site_id.to_string(), organization_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl WebhookStore for MemoryStore {
    async fn insert_webhook(&self, webhook: WebhookSubscription) -> Result<(), StoreError> {
        let mut webhooks = self.webhooks.write().await;
        if webhooks.contains_key(&webhook.id) {
            return Err(StoreError::Conflict(format!("webhook {}", webhook.id)));
        }
        webhooks.insert(webhook.id.clone(), webhook);
        Ok(())
    }

    async fn get_webhook(&self, webhook_id: &str) -> Result<Option<WebhookSubscription>, StoreError> {
        Ok(self.webhooks.read().await.get(webhook_id).cloned())
    }

    async fn list_for_site(&self, site_id: &str) -> Result<Vec<WebhookSubscription>, StoreError> {
        let mut items: Vec<_> = self
            .webhooks
            .read()
            .await
            .values()
            .filter(|w| w.site_id == site_id)
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items)
    }

    async fn find_active_for_event(
        &self,
        site_id: &str,
        event: EventKind,
    ) -> Result<Vec<WebhookSubscription>, StoreError> {
        Ok(self
            .webhooks
            .read()
            .await
            .values()
            .filter(|w| w.site_id == site_id && w.is_active && w.subscribes_to(event))
            .cloned()
            .collect())
    }

    async fn set_webhook_active(
        &self,
        webhook_id: &str,
        active: bool,
    ) -> Result<Option<WebhookSubscription>, StoreError> {
        let mut webhooks = self.webhooks.write().await;
        Ok(webhooks.get_mut(webhook_id).map(|w| {
            w.is_active = active;
            w.clone()
        }))
    }

    async fn delete_webhook(&self, webhook_id: &str) -> Result<bool, StoreError> {
        Ok(self.webhooks.write().await.remove(webhook_id).is_some())
    }

    async fn record_outcome(
        &self,
        webhook_id: &str,
        outcome: &DeliveryOutcome,
    ) -> Result<(), StoreError> {
        let mut webhooks = self.webhooks.write().await;
        let webhook = webhooks
            .get_mut(webhook_id)
            .ok_or_else(|| StoreError::NotFound(format!("webhook {}", webhook_id)))?;
        outcome.apply(webhook);
        Ok(())
    }
}

#[async_trait]
impl DeliveryLedger for MemoryStore {
    async fn append_attempt(&self, attempt: DeliveryAttempt) -> Result<(), StoreError> {
        self.attempts.write().await.push(attempt);
        Ok(())
    }

    async fn attempts_for_webhook(&self, webhook_id: &str) -> Result<Vec<DeliveryAttempt>, StoreError> {
        Ok(self
            .attempts
            .read()
            .await
            .iter()
            .filter(|a| a.webhook_id == webhook_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RetryQueue for MemoryStore {
    async fn schedule(&self, retry: PendingRetry) -> Result<(), StoreError> {
        let mut retries = self.retries.lock().await;
        if retries.contains_key(&retry.id) {
            return Err(StoreError::Conflict(format!("retry {}", retry.id)));
        }
        retries.insert(retry.id.clone(), retry);
        Ok(())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> Result<Vec<PendingRetry>, StoreError> {
        let mut retries = self.retries.lock().await;

        let mut due: Vec<&mut PendingRetry> = retries
            .values_mut()
            .filter(|r| r.is_claimable(now))
            .collect();
        due.sort_by(|a, b| a.due_at.cmp(&b.due_at));

        Ok(due
            .into_iter()
            .take(limit)
            .map(|retry| {
                retry.claimed_until = Some(now + lease);
                retry.clone()
            })
            .collect())
    }

    async fn complete(&self, retry_id: &str) -> Result<(), StoreError> {
        self.retries.lock().await.remove(retry_id);
        Ok(())
    }

    async fn pending_count(&self) -> Result<usize, StoreError> {
        Ok(self.retries.lock().await.len())
    }
}
