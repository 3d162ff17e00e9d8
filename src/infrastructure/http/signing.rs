//! Outbound body signing.
//!
//! HMAC-SHA256 over the request body, placed in the configured header.
//! Dual-secret rotation: while an old secret is still active, both
//! signatures are emitted so receivers can verify with either.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::domain::models::SigningSpec;

type HmacSha256 = Hmac<Sha256>;

fn signature(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Compute the signature header value for a request body.
///
/// Returns `sha256=<sig>` for a single active secret, or
/// `sha256=<sig>,sha256=<old sig>` while the previous secret has not
/// passed its phase-out date.
pub fn sign_body(spec: &SigningSpec, body: &[u8], now: DateTime<Utc>) -> String {
    let mut value = format!("sha256={}", signature(&spec.secret, body));

    if let Some(previous) = &spec.previous_secret {
        let still_active = spec
            .previous_secret_expires_at
            .map_or(true, |expires_at| now < expires_at);
        if still_active {
            value.push_str(&format!(",sha256={}", signature(previous, body)));
        }
    }

    value
}
