//! Outbound HTTP: client construction, destination policy, auth, signing.

pub mod auth;
pub mod client;
pub mod signing;

pub use auth::AuthManager;
pub use client::{build_client, check_url_policy, clamp_timeout_ms, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS};
pub use signing::sign_body;
