//! Configuration module for environment variable parsing.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::webhooks::RetrySettings;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the HTTP API to listen on
    pub port: u16,

    /// Per-attempt timeout for outbound webhook POSTs, in milliseconds
    pub webhook_timeout_ms: u64,

    /// How often the retry scheduler polls for due rows, in milliseconds
    pub retry_poll_interval_ms: u64,

    /// Maximum rows claimed per poll
    pub retry_batch_size: usize,

    /// How long a claimed retry stays invisible to other pollers, in seconds
    pub retry_lease_secs: i64,

    /// Maximum retries in flight at once
    pub retry_concurrency: usize,

    /// Hourly request quota given to keys issued without an explicit limit
    pub default_rate_limit: u32,

    /// Shortest bearer token accepted before any lookup
    pub min_token_length: usize,

    /// Take the client address from `X-Forwarded-For`; only set behind a proxy that rewrites it
    pub trust_forwarded_for: bool,

    /// Organization that receives an admin key at startup, if set
    pub bootstrap_organization_id: Option<String>,

    /// Sites registered to the bootstrap organization at startup
    pub bootstrap_site_ids: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            webhook_timeout_ms: 10_000,
            retry_poll_interval_ms: 1_000,
            retry_batch_size: 50,
            retry_lease_secs: 60,
            retry_concurrency: 32,
            default_rate_limit: 1_000,
            min_token_length: 32,
            trust_forwarded_for: false,
            bootstrap_organization_id: None,
            bootstrap_site_ids: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Config {
            port: parse_var("PORT", defaults.port),

            webhook_timeout_ms: parse_positive("WEBHOOK_TIMEOUT_MS", defaults.webhook_timeout_ms),

            retry_poll_interval_ms: parse_positive(
                "RETRY_POLL_INTERVAL_MS",
                defaults.retry_poll_interval_ms,
            ),

            retry_batch_size: parse_positive("RETRY_BATCH_SIZE", defaults.retry_batch_size),

            retry_lease_secs: parse_positive("RETRY_LEASE_SECS", defaults.retry_lease_secs),

            retry_concurrency: parse_positive("RETRY_CONCURRENCY", defaults.retry_concurrency),

            default_rate_limit: parse_positive("DEFAULT_RATE_LIMIT", defaults.default_rate_limit),

            min_token_length: parse_var("MIN_TOKEN_LENGTH", defaults.min_token_length),

            trust_forwarded_for: parse_var("TRUST_FORWARDED_FOR", defaults.trust_forwarded_for),

            bootstrap_organization_id: env::var("BOOTSTRAP_ORGANIZATION_ID")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),

            bootstrap_site_ids: parse_csv("BOOTSTRAP_SITE_IDS"),
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_millis(self.webhook_timeout_ms)
    }

    /// Scheduler limits derived from the `RETRY_*` variables.
    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings {
            poll_interval: Duration::from_millis(self.retry_poll_interval_ms),
            batch_size: self.retry_batch_size,
            lease: chrono::Duration::seconds(self.retry_lease_secs),
            concurrency: self.retry_concurrency,
        }
    }
}

/// Parse a variable, falling back to `default` when unset or malformed.
fn parse_var<T: FromStr + Copy>(name: &str, default: T) -> T {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, using default");
            default
        }
    }
}

/// Like [`parse_var`], but zero and negative values are rejected too.
fn parse_positive<T: FromStr + Copy + PartialOrd + Default>(name: &str, default: T) -> T {
    let value = parse_var(name, default);
    if value > T::default() {
        value
    } else {
        warn!(env_var = name, "Value must be positive, using default");
        default
    }
}

/// Parse a comma-separated list of strings.
fn parse_csv(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}
