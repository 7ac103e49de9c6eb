//! Event fan-out to matching webhook subscriptions.
//!
//! ```text
//! dispatch(site, event, data) → matching active webhooks → one Occurrence
//!     → concurrent DeliveryWorker::deliver(.., attempt 1)
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::events::EventKind;
use crate::store::WebhookStore;
use crate::webhooks::{DeliveryWorker, Occurrence};

/// Outcome of fanning out one occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub occurrence_id: Option<String>,
    pub matched: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Entry point for domain code that wants to announce an event.
#[derive(Clone)]
pub struct Dispatcher {
    webhooks: Arc<dyn WebhookStore>,
    worker: Arc<DeliveryWorker>,
}

impl Dispatcher {
    pub fn new(webhooks: Arc<dyn WebhookStore>, worker: Arc<DeliveryWorker>) -> Self {
        Self { webhooks, worker }
    }

    /// Start delivering `event` for `site_id` in the background.
    ///
    /// Returns as soon as the fan-out task is spawned. Delivery failures are
    /// never reported to the caller; the handle exists for callers that want
    /// to observe the summary, and dropping it is fine.
    pub fn dispatch(
        &self,
        site_id: &str,
        event: EventKind,
        data: serde_json::Value,
    ) -> JoinHandle<DispatchSummary> {
        let this = self.clone();
        let site_id = site_id.to_string();
        tokio::spawn(async move { this.fan_out(&site_id, event, &data).await })
    }

    /// Resolve subscribers and deliver attempt 1 to each of them concurrently.
    pub async fn fan_out(
        &self,
        site_id: &str,
        event: EventKind,
        data: &serde_json::Value,
    ) -> DispatchSummary {
        let webhooks = match self.webhooks.find_active_for_event(site_id, event).await {
            Ok(webhooks) => webhooks,
            Err(e) => {
                error!(site_id = %site_id, event = %event, error = %e, "dispatch_lookup_failed");
                return DispatchSummary::default();
            }
        };

        if webhooks.is_empty() {
            debug!(site_id = %site_id, event = %event, "dispatch_no_subscribers");
            return DispatchSummary::default();
        }

        let occurrence = match Occurrence::new(site_id, event, data) {
            Ok(occurrence) => occurrence,
            Err(e) => {
                error!(site_id = %site_id, event = %event, error = %e, "dispatch_serialize_failed");
                return DispatchSummary::default();
            }
        };

        info!(
            site_id = %site_id,
            event = %event,
            occurrence_id = %occurrence.id,
            subscriber_count = webhooks.len(),
            body_length = occurrence.body.len(),
            "dispatch_fan_out"
        );

        let deliveries = webhooks
            .iter()
            .map(|webhook| self.worker.deliver(webhook, &occurrence, 1));
        let reports = futures::future::join_all(deliveries).await;

        let succeeded = reports.iter().filter(|r| r.success).count();
        let summary = DispatchSummary {
            occurrence_id: Some(occurrence.id.clone()),
            matched: reports.len(),
            succeeded,
            failed: reports.len() - succeeded,
        };

        info!(
            occurrence_id = %occurrence.id,
            matched = summary.matched,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "dispatch_complete"
        );

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DeliveryLedger, MemoryStore};
    use crate::webhooks::test_subscription;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn dispatcher(store: &Arc<MemoryStore>) -> Dispatcher {
        let worker = DeliveryWorker::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Duration::from_secs(5),
        )
        .unwrap();
        Dispatcher::new(store.clone(), Arc::new(worker))
    }

    #[tokio::test]
    async fn test_only_active_matching_subscriptions_receive() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());

        Mock::given(method("POST"))
            .and(path("/match"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/other"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let matching = test_subscription("site-1", &format!("{}/match", server.uri()), 3, 60);

        let mut wrong_event = test_subscription("site-1", &format!("{}/other", server.uri()), 3, 60);
        wrong_event.events = [EventKind::TermCreated].into_iter().collect();

        let mut inactive = test_subscription("site-1", &format!("{}/other", server.uri()), 3, 60);
        inactive.is_active = false;

        let other_site = test_subscription("site-2", &format!("{}/other", server.uri()), 3, 60);

        for webhook in [matching.clone(), wrong_event, inactive, other_site] {
            store.insert_webhook(webhook).await.unwrap();
        }

        let summary = dispatcher(&store)
            .dispatch("site-1", EventKind::EntryCreated, json!({"id": 1}))
            .await
            .unwrap();

        assert_eq!(summary.matched, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(store.attempts_for_webhook(&matching.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_subscribers_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let summary = dispatcher(&store)
            .dispatch("site-1", EventKind::DesignUpdated, json!({}))
            .await
            .unwrap();
        assert_eq!(summary, DispatchSummary::default());
    }

    #[tokio::test]
    async fn test_fan_out_shares_one_occurrence() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let a = test_subscription("site-1", &server.uri(), 3, 60);
        let b = test_subscription("site-1", &server.uri(), 3, 60);
        store.insert_webhook(a.clone()).await.unwrap();
        store.insert_webhook(b.clone()).await.unwrap();

        let summary = dispatcher(&store)
            .fan_out("site-1", EventKind::EntryCreated, &json!({"id": 2}))
            .await;
        assert_eq!(summary.matched, 2);

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].body, received[1].body);

        let first = store.attempts_for_webhook(&a.id).await.unwrap();
        let second = store.attempts_for_webhook(&b.id).await.unwrap();
        assert_eq!(first[0].occurrence_id, second[0].occurrence_id);
        assert_eq!(summary.occurrence_id.as_deref(), Some(first[0].occurrence_id.as_str()));
    }

    #[tokio::test]
    async fn test_deactivation_keeps_logged_attempts() {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let webhook = test_subscription("site-1", &server.uri(), 3, 60);
        store.insert_webhook(webhook.clone()).await.unwrap();
        let dispatcher = dispatcher(&store);

        dispatcher
            .fan_out("site-1", EventKind::EntryCreated, &json!({}))
            .await;
        store.set_webhook_active(&webhook.id, false).await.unwrap();
        let summary = dispatcher
            .fan_out("site-1", EventKind::EntryCreated, &json!({}))
            .await;

        assert_eq!(summary.matched, 0);
        let attempts = store.attempts_for_webhook(&webhook.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].success);
    }
}
