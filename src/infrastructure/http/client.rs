//! Outbound HTTP client construction and destination policy.

use std::net::IpAddr;

use reqwest::redirect::Policy;
use reqwest::{Client, Url};
use std::time::Duration;

use crate::domain::models::failure::DeliveryError;
use crate::domain::models::{HttpClientConfig, SecurityConfig};

/// Timeout bounds applied to per-rule overrides.
pub const MIN_TIMEOUT_MS: u64 = 500;
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// Clamp a per-rule timeout into the allowed band.
pub fn clamp_timeout_ms(timeout_ms: u64) -> u64 {
    timeout_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
}

/// Build the shared outbound client. Per-request timeouts override the
/// default at send time.
pub fn build_client(config: &HttpClientConfig) -> Result<Client, DeliveryError> {
    Client::builder()
        .timeout(Duration::from_millis(clamp_timeout_ms(config.timeout_ms)))
        .redirect(Policy::limited(config.max_redirects as usize))
        .build()
        .map_err(|e| DeliveryError::config(format!("HTTP client build failed: {e}")))
}

fn ip_is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // Unique-local fc00::/7 and link-local fe80::/10.
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Enforce the global security policy on a target URL before sending.
pub async fn check_url_policy(url: &str, security: &SecurityConfig) -> Result<Url, DeliveryError> {
    let parsed = Url::parse(url)
        .map_err(|e| DeliveryError::config(format!("Invalid target URL '{url}': {e}")))?;

    if security.enforce_https && parsed.scheme() != "https" {
        return Err(DeliveryError::policy(format!(
            "Target '{url}' is not HTTPS and enforce_https is set"
        )));
    }

    if security.block_private_networks {
        let Some(host) = parsed.host_str() else {
            return Err(DeliveryError::config(format!("Target '{url}' has no host")));
        };

        if let Ok(ip) = host.parse::<IpAddr>() {
            if ip_is_private(ip) {
                return Err(DeliveryError::policy(format!(
                    "Target '{url}' resolves to a private network"
                )));
            }
        } else if host == "localhost" {
            return Err(DeliveryError::policy(format!(
                "Target '{url}' resolves to a private network"
            )));
        } else {
            let port = parsed.port_or_known_default().unwrap_or(443);
            let addrs = tokio::net::lookup_host((host, port))
                .await
                .map_err(|e| DeliveryError::dns(format!("{host}: {e}")))?;
            for addr in addrs {
                if ip_is_private(addr.ip()) {
                    return Err(DeliveryError::policy(format!(
                        "Target '{url}' resolves to a private network"
                    )));
                }
            }
        }
    }

    Ok(parsed)
}
