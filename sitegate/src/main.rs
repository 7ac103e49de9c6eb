//! Sitegate server - HTTP API plus the webhook retry loop.
//!
//! Runs the axum API and the retry scheduler side by side against one store,
//! and stops both on SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal, sync::watch};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sitegate::error::StoreError;
use sitegate::keys::{NewApiKey, Permission, PermissionSet};
use sitegate::store::SiteDirectory;
use sitegate::web::router;
use sitegate::{AppState, Config, MemoryStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("sitegate_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        webhook_timeout_ms = config.webhook_timeout_ms,
        retry_poll_interval_ms = config.retry_poll_interval_ms,
        retry_concurrency = config.retry_concurrency,
        default_rate_limit = config.default_rate_limit,
        bootstrap_configured = config.bootstrap_organization_id.is_some(),
        "config_loaded"
    );

    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(config.clone(), store.clone()).context("Failed to build app state")?;

    if let Some(organization_id) = &config.bootstrap_organization_id {
        bootstrap(&state, store.as_ref(), organization_id, &config).await?;
    }

    // Retry loop stops when the server does
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let scheduler = state.retry_scheduler.clone();
    let retry_task = tokio::spawn(async move {
        scheduler
            .run(async move {
                let _ = stop_rx.changed().await;
            })
            .await;
    });

    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let _ = stop_tx.send(true);
    if let Err(e) = retry_task.await {
        warn!(error = %e, "retry_scheduler_join_failed");
    }

    info!("sitegate_shutdown_complete");

    Ok(())
}

/// Register the bootstrap sites and mint one admin key for the bootstrap organization.
///
/// The plaintext key goes to stdout, not the log stream, and is never shown again.
async fn bootstrap(
    state: &AppState,
    sites: &dyn SiteDirectory,
    organization_id: &str,
    config: &Config,
) -> Result<()> {
    for site_id in config.bootstrap_site_ids.iter().flatten() {
        match sites.register_site(site_id, organization_id).await {
            Ok(()) | Err(StoreError::Conflict(_)) => {}
            Err(e) => return Err(e).context("Failed to register bootstrap site"),
        }
    }

    let issued = state
        .authenticator
        .issue_key(
            organization_id,
            NewApiKey {
                permissions: PermissionSet::new([Permission::Admin]),
                allowed_site_ids: Vec::new(),
                rate_limit: None,
                expires_at: None,
            },
        )
        .await
        .context("Failed to issue bootstrap key")?;

    info!(
        organization_id = %organization_id,
        key_id = %issued.id,
        key_prefix = %issued.key_prefix,
        site_count = config.bootstrap_site_ids.as_ref().map(Vec::len).unwrap_or(0),
        "bootstrap_key_issued"
    );
    println!("bootstrap admin key: {}", issued.key);

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
