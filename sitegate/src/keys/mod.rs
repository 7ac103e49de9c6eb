//! Programmatic API keys.
//!
//! This module provides:
//! - Key records and the read/write/delete/admin permission lattice
//! - Key generation and one-way hashing
//! - The [`Authenticator`], which turns a bearer header into an
//!   [`AuthContext`] while enforcing the per-key hourly quota

pub mod authenticator;
pub mod generate;
pub mod model;

pub use authenticator::{Authenticator, IssuedKey, NewApiKey, Revocation, QUOTA_WINDOW_SECS};
pub use generate::{generate_api_key, hash_api_key, GeneratedKey};
pub use model::{has_permission, ApiKey, AuthContext, Permission, PermissionSet, QuotaDecision};
