//! Outgoing authentication.
//!
//! Applies a rule's auth spec to the outbound request. OAuth2 tokens are
//! fetched with the client-credentials grant and cached per rule with
//! expiry tracking; the executor invalidates the cache on 401 and retries
//! once.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use reqwest::RequestBuilder;
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::failure::DeliveryError;
use crate::domain::models::AuthSpec;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Process-wide OAuth2 token cache plus auth application.
pub struct AuthManager {
    client: reqwest::Client,
    tokens: RwLock<HashMap<Uuid, CachedToken>>,
}

/// Safety margin subtracted from token lifetimes.
const EXPIRY_SKEW_SECS: i64 = 60;

impl AuthManager {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client, tokens: RwLock::new(HashMap::new()) }
    }

    /// Apply the auth spec to a request builder.
    pub async fn apply(
        &self,
        builder: RequestBuilder,
        auth: &AuthSpec,
        rule_id: Uuid,
    ) -> Result<RequestBuilder, DeliveryError> {
        match auth {
            AuthSpec::None => Ok(builder),
            AuthSpec::ApiKey { header, key } => Ok(builder.header(header, key)),
            AuthSpec::Basic { username, password } => {
                Ok(builder.basic_auth(username, Some(password)))
            }
            AuthSpec::Bearer { token } => Ok(builder.bearer_auth(token)),
            AuthSpec::Custom { headers } => {
                let mut builder = builder;
                for (name, value) in headers {
                    builder = builder.header(name.as_str(), value.as_str());
                }
                Ok(builder)
            }
            AuthSpec::Oauth1 { consumer_key, consumer_secret, token, token_secret } => {
                // PLAINTEXT signature method: no nonce-hashing round trips,
                // the signature is the concatenated secrets.
                let header = format!(
                    "OAuth oauth_consumer_key=\"{consumer_key}\", oauth_token=\"{token}\", \
                     oauth_signature_method=\"PLAINTEXT\", oauth_signature=\"{consumer_secret}&{token_secret}\", \
                     oauth_version=\"1.0\""
                );
                Ok(builder.header(reqwest::header::AUTHORIZATION, header))
            }
            AuthSpec::Oauth2 { token_url, client_id, client_secret, scope } => {
                let token = self
                    .oauth2_token(rule_id, token_url, client_id, client_secret, scope.as_deref())
                    .await?;
                Ok(builder.bearer_auth(token))
            }
        }
    }

    async fn oauth2_token(
        &self,
        rule_id: Uuid,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        scope: Option<&str>,
    ) -> Result<String, DeliveryError> {
        {
            let tokens = self.tokens.read().await;
            if let Some(cached) = tokens.get(&rule_id) {
                if cached.expires_at > Utc::now() {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        if let Some(scope) = scope {
            form.push(("scope", scope));
        }

        let response = self
            .client
            .post(token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| DeliveryError::config(format!("OAuth2 token fetch failed: {e}")))?;

        if !response.status().is_success() {
            return Err(DeliveryError::config(format!(
                "OAuth2 token endpoint returned {}",
                response.status().as_u16()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::config(format!("OAuth2 token response invalid: {e}")))?;

        let lifetime = token.expires_in.unwrap_or(3_600) as i64;
        let expires_at = Utc::now() + Duration::seconds((lifetime - EXPIRY_SKEW_SECS).max(0));

        self.tokens.write().await.insert(
            rule_id,
            CachedToken { access_token: token.access_token.clone(), expires_at },
        );

        tracing::debug!(rule_id = %rule_id, "OAuth2 token refreshed");
        Ok(token.access_token)
    }

    /// Drop the cached token for a rule (refresh-on-401).
    pub async fn invalidate(&self, rule_id: Uuid) {
        self.tokens.write().await.remove(&rule_id);
    }

    /// Clear all tokens on shutdown.
    pub async fn clear(&self) {
        self.tokens.write().await.clear();
    }
}
