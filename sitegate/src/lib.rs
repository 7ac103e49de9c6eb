//! Sitegate - API-key gateway and signed webhook delivery for the site builder.
//!
//! This library provides the two halves of the platform's external trust boundary:
//! - Inbound: bearer API keys with hashed storage, an hourly per-key quota,
//!   a read/write/delete/admin permission lattice and per-site access checks
//! - Outbound: HMAC-signed webhook deliveries with a delivery ledger and
//!   persisted, lease-claimed retries
//!
//! ## Architecture
//!
//! ```text
//! Bearer token → Authenticator → AccessValidator → handler
//! dispatch(site, event, data) → Dispatcher → DeliveryWorker → ledger
//!                                                  └─ failure → RetryQueue → RetryScheduler
//! ```

pub mod access;
pub mod config;
pub mod error;
pub mod events;
pub mod keys;
pub mod store;
pub mod web;
pub mod webhooks;

// Re-export commonly used types
pub use access::{AccessValidator, SiteAccess};
pub use config::Config;
pub use error::{AccessDenied, AuthError, StoreError, ValidationError};
pub use events::EventKind;
pub use keys::{has_permission, AuthContext, Authenticator, Permission};
pub use store::MemoryStore;
pub use web::AppState;
pub use webhooks::{Dispatcher, RetryScheduler};
