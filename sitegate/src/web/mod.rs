//! HTTP API.
//!
//! This module provides the axum router for:
//! - Key issuance and revocation
//! - Site registration
//! - Webhook registration, toggling, deletion and delivery history
//! - Event submission, which hands off to the dispatcher and returns 202
//!
//! All `/api/v1` routes authenticate with `Authorization: Bearer <key>`.

pub mod auth;
pub mod error;
pub mod handlers;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::access::AccessValidator;
use crate::keys::Authenticator;
use crate::store::{DeliveryLedger, KeyStore, RetryQueue, SiteDirectory, WebhookStore};
use crate::webhooks::{DeliveryWorker, Dispatcher, RetryScheduler};
use crate::Config;

pub use auth::Caller;
pub use error::{ApiError, ErrorResponse};
pub use handlers::health;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub authenticator: Authenticator,
    pub access: AccessValidator,
    pub dispatcher: Dispatcher,
    pub retry_scheduler: RetryScheduler,
    pub sites: Arc<dyn SiteDirectory>,
    pub webhooks: Arc<dyn WebhookStore>,
    pub ledger: Arc<dyn DeliveryLedger>,
}

impl AppState {
    /// Wire every component against one store implementing all storage traits.
    pub fn new<S>(config: Config, store: Arc<S>) -> Result<Self>
    where
        S: KeyStore + SiteDirectory + WebhookStore + DeliveryLedger + RetryQueue + 'static,
    {
        let worker = Arc::new(DeliveryWorker::new(
            store.clone(),
            store.clone(),
            store.clone(),
            config.webhook_timeout(),
        )?);

        Ok(Self {
            authenticator: Authenticator::new(
                store.clone(),
                config.min_token_length,
                config.default_rate_limit,
            ),
            access: AccessValidator::new(store.clone()),
            dispatcher: Dispatcher::new(store.clone(), worker.clone()),
            retry_scheduler: RetryScheduler::new(
                store.clone(),
                store.clone(),
                worker,
                config.retry_settings(),
            ),
            sites: store.clone(),
            webhooks: store.clone(),
            ledger: store,
            config: Arc::new(config),
        })
    }
}

/// Build the full router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/keys", post(handlers::create_key))
        .route("/api/v1/keys/:key_id", delete(handlers::revoke_key))
        .route("/api/v1/sites", post(handlers::register_site))
        .route(
            "/api/v1/sites/:site_id/webhooks",
            get(handlers::list_webhooks).post(handlers::create_webhook),
        )
        .route(
            "/api/v1/sites/:site_id/webhooks/:webhook_id",
            delete(handlers::delete_webhook).patch(handlers::update_webhook),
        )
        .route(
            "/api/v1/sites/:site_id/webhooks/:webhook_id/deliveries",
            get(handlers::list_deliveries),
        )
        .route("/api/v1/sites/:site_id/events", post(handlers::trigger_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{NewApiKey, Permission, PermissionSet};
    use crate::store::MemoryStore;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct TestApp {
        base: String,
        client: reqwest::Client,
        store: Arc<MemoryStore>,
        state: AppState,
    }

    impl TestApp {
        async fn start() -> Self {
            let store = Arc::new(MemoryStore::new());
            let state = AppState::new(Config::default(), store.clone()).unwrap();

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let app = router(state.clone());
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            Self {
                base: format!("http://{}", addr),
                client: reqwest::Client::new(),
                store,
                state,
            }
        }

        async fn key(&self, org: &str, permissions: &[Permission], sites: &[&str], limit: u32) -> String {
            self.state
                .authenticator
                .issue_key(
                    org,
                    NewApiKey {
                        permissions: PermissionSet::new(permissions.iter().copied()),
                        allowed_site_ids: sites.iter().map(|s| s.to_string()).collect(),
                        rate_limit: Some(limit),
                        expires_at: None,
                    },
                )
                .await
                .unwrap()
                .key
        }

        async fn site(&self, site_id: &str, org: &str) {
            self.store.register_site(site_id, org).await.unwrap();
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::start().await;
        let resp = app.client.get(app.url("/health")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_and_malformed_auth() {
        let app = TestApp::start().await;
        app.site("site-1", "org-1").await;

        let resp = app
            .client
            .get(app.url("/api/v1/sites/site-1/webhooks"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "MISSING_AUTH_HEADER");

        let resp = app
            .client
            .get(app.url("/api/v1/sites/site-1/webhooks"))
            .header("Authorization", "Basic abc")
            .send()
            .await
            .unwrap();
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "INVALID_AUTH_FORMAT");
    }

    #[tokio::test]
    async fn test_rate_limited_call_returns_429() {
        let app = TestApp::start().await;
        app.site("site-1", "org-1").await;
        let key = app.key("org-1", &[Permission::Read], &[], 2).await;

        let mut statuses = Vec::new();
        for _ in 0..3 {
            let resp = app
                .client
                .get(app.url("/api/v1/sites/site-1/webhooks"))
                .bearer_auth(&key)
                .send()
                .await
                .unwrap();
            statuses.push(resp.status().as_u16());
        }
        assert_eq!(statuses, vec![200, 200, 429]);
    }

    #[tokio::test]
    async fn test_cross_tenant_and_missing_sites_look_alike() {
        let app = TestApp::start().await;
        app.site("site-other", "org-2").await;
        let key = app.key("org-1", &[Permission::Read], &[], 100).await;

        let mut bodies = Vec::new();
        for site in ["site-other", "site-missing"] {
            let resp = app
                .client
                .get(app.url(&format!("/api/v1/sites/{}/webhooks", site)))
                .bearer_auth(&key)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 403);
            bodies.push(resp.json::<Value>().await.unwrap());
        }
        assert_eq!(bodies[0], bodies[1]);
        assert_eq!(bodies[0]["error"], "SITE_ACCESS_DENIED");
    }

    #[tokio::test]
    async fn test_read_key_cannot_register_webhook() {
        let app = TestApp::start().await;
        app.site("site-1", "org-1").await;
        let key = app.key("org-1", &[Permission::Read], &[], 100).await;

        let resp = app
            .client
            .post(app.url("/api/v1/sites/site-1/webhooks"))
            .bearer_auth(&key)
            .json(&json!({"url": "https://hooks.example.com/x", "events": ["entry.created"]}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 403);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "INSUFFICIENT_PERMISSION");
    }

    #[tokio::test]
    async fn test_webhook_lifecycle() {
        let app = TestApp::start().await;
        app.site("site-1", "org-1").await;
        let key = app.key("org-1", &[Permission::Admin], &[], 100).await;
        let base = app.url("/api/v1/sites/site-1/webhooks");

        let resp = app
            .client
            .post(&base)
            .bearer_auth(&key)
            .json(&json!({"url": "http://insecure.example.com", "events": ["entry.created"]}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = app
            .client
            .post(&base)
            .bearer_auth(&key)
            .json(&json!({
                "url": "https://hooks.example.com/x",
                "events": ["entry.created", "css.updated"],
                "max_retries": 1
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let created: Value = resp.json().await.unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        assert!(created["secret"].as_str().unwrap().starts_with("whsec_"));

        let listed: Value = app
            .client
            .get(&base)
            .bearer_auth(&key)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert!(listed[0].get("secret").is_none());

        let resp = app
            .client
            .patch(format!("{}/{}", base, id))
            .bearer_auth(&key)
            .json(&json!({"is_active": false}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let patched: Value = resp.json().await.unwrap();
        assert_eq!(patched["is_active"], false);

        let resp = app
            .client
            .delete(format!("{}/{}", base, id))
            .bearer_auth(&key)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);
        assert!(app.store.get_webhook(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_event_submission_delivers() {
        let app = TestApp::start().await;
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        app.site("site-1", "org-1").await;
        let key = app.key("org-1", &[Permission::Write], &[], 100).await;
        let webhook = crate::webhooks::test_subscription("site-1", &server.uri(), 0, 60);
        app.store.insert_webhook(webhook.clone()).await.unwrap();

        let resp = app
            .client
            .post(app.url("/api/v1/sites/site-1/events"))
            .bearer_auth(&key)
            .json(&json!({"event": "entry.created", "data": {"id": "e-1"}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 202);

        let mut attempts = Vec::new();
        for _ in 0..50 {
            attempts = app.store.attempts_for_webhook(&webhook.id).await.unwrap();
            if !attempts.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].success);

        let resp = app
            .client
            .post(app.url("/api/v1/sites/site-1/events"))
            .bearer_auth(&key)
            .json(&json!({"event": "entry.exploded"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn test_issue_and_revoke_key() {
        let app = TestApp::start().await;
        app.site("site-1", "org-1").await;
        app.site("site-x", "org-2").await;
        let admin = app.key("org-1", &[Permission::Admin], &[], 100).await;

        let resp = app
            .client
            .post(app.url("/api/v1/keys"))
            .bearer_auth(&admin)
            .json(&json!({"permissions": ["read"], "allowed_site_ids": ["site-x"]}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 403);

        let resp = app
            .client
            .post(app.url("/api/v1/keys"))
            .bearer_auth(&admin)
            .json(&json!({"permissions": ["read"], "allowed_site_ids": ["site-1"]}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let issued: Value = resp.json().await.unwrap();
        let new_key = issued["key"].as_str().unwrap().to_string();
        let new_id = issued["id"].as_str().unwrap().to_string();

        let resp = app
            .client
            .get(app.url("/api/v1/sites/site-1/webhooks"))
            .bearer_auth(&new_key)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let resp = app
            .client
            .delete(app.url(&format!("/api/v1/keys/{}", new_id)))
            .bearer_auth(&admin)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 204);

        let resp = app
            .client
            .get(app.url("/api/v1/sites/site-1/webhooks"))
            .bearer_auth(&new_key)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "INVALID_KEY");
    }

    #[tokio::test]
    async fn test_register_site_hides_other_tenants() {
        let app = TestApp::start().await;
        app.site("secret-site", "org-2").await;
        app.site("own-site", "org-1").await;
        let key = app.key("org-1", &[Permission::Write], &[], 100).await;

        let register = |site: &'static str| {
            app.client
                .post(app.url("/api/v1/sites"))
                .bearer_auth(&key)
                .json(&json!({ "site_id": site }))
                .send()
        };

        let resp = register("secret-site").await.unwrap();
        assert_eq!(resp.status(), 403);
        let taken: Value = resp.json().await.unwrap();
        assert_eq!(taken["error"], "SITE_ACCESS_DENIED");

        let foreign: Value = app
            .client
            .get(app.url("/api/v1/sites/secret-site/webhooks"))
            .bearer_auth(&key)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(taken, foreign);

        let resp = register("own-site").await.unwrap();
        assert_eq!(resp.status(), 409);

        let resp = register("never-seen").await.unwrap();
        assert_eq!(resp.status(), 201);
        assert_eq!(
            app.store.site_owner("secret-site").await.unwrap(),
            Some("org-2".to_string())
        );
    }

    #[tokio::test]
    async fn test_restricted_admin_cannot_widen_scope() {
        let app = TestApp::start().await;
        app.site("site-a", "org-1").await;
        app.site("site-b", "org-1").await;
        let scoped = app.key("org-1", &[Permission::Admin], &["site-a"], 100).await;
        let open = app.key("org-1", &[Permission::Read], &[], 100).await;
        let open_id = app
            .store
            .find_active_by_hash(&crate::keys::hash_api_key(&open))
            .await
            .unwrap()
            .unwrap()
            .id;

        for body in [
            json!({"permissions": ["admin"]}),
            json!({"permissions": ["read"], "allowed_site_ids": ["site-a", "site-b"]}),
        ] {
            let resp = app
                .client
                .post(app.url("/api/v1/keys"))
                .bearer_auth(&scoped)
                .json(&body)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 403);
            let err: Value = resp.json().await.unwrap();
            assert_eq!(err["error"], "KEY_SCOPE_EXCEEDED");
        }

        let resp = app
            .client
            .post(app.url("/api/v1/keys"))
            .bearer_auth(&scoped)
            .json(&json!({"permissions": ["read"], "allowed_site_ids": ["site-a"]}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);

        let resp = app
            .client
            .delete(app.url(&format!("/api/v1/keys/{}", open_id)))
            .bearer_auth(&scoped)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 403);

        let resp = app
            .client
            .get(app.url("/api/v1/sites/site-a/webhooks"))
            .bearer_auth(&open)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }
}
