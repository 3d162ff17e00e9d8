//! Delivery executor.
//!
//! Sends one transformed event to a rule's target under rate-limit and
//! circuit-breaker control, classifies the outcome, and persists the
//! execution log, per-attempt records, and DLQ entries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;

use crate::domain::errors::DomainResult;
use crate::domain::models::failure::{DeliveryError, ErrorCategory};
use crate::domain::models::{
    AuthSpec, DeliveryAttempt, DlqEntry, Event, ExecutionLog, IntegrationRule, LogStatus,
    ResponseInfo, SecurityConfig, SubAction, TriggerType,
};
use crate::domain::ports::{DlqRepository, ExecutionLogRepository};
use crate::infrastructure::http::{check_url_policy, clamp_timeout_ms, sign_body, AuthManager};

use super::circuit_breaker::{CircuitBreakerRegistry, CircuitDecision};
use super::rate_limit::{RateDecision, RateLimiterRegistry};
use super::sandbox::ScriptContext;
use super::transformer::Transformer;

/// Response body snippet stored on the log.
const RESPONSE_SNIPPET_BYTES: usize = 2_000;

/// Cap for the DLQ next-retry-at suggestion.
const DLQ_RETRY_CAP_MS: u64 = 3_600_000;

pub struct DeliveryExecutor {
    client: reqwest::Client,
    auth: Arc<AuthManager>,
    transformer: Arc<Transformer>,
    breakers: Arc<CircuitBreakerRegistry>,
    rate_limits: Arc<RateLimiterRegistry>,
    logs: Arc<dyn ExecutionLogRepository>,
    dlq: Arc<dyn DlqRepository>,
    security: SecurityConfig,
}

/// Outcome of one HTTP send.
struct SendOutcome {
    status: u16,
    body: String,
    headers: Value,
    duration_ms: u64,
}

impl DeliveryExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: reqwest::Client,
        auth: Arc<AuthManager>,
        transformer: Arc<Transformer>,
        breakers: Arc<CircuitBreakerRegistry>,
        rate_limits: Arc<RateLimiterRegistry>,
        logs: Arc<dyn ExecutionLogRepository>,
        dlq: Arc<dyn DlqRepository>,
        security: SecurityConfig,
    ) -> Self {
        Self { client, auth, transformer, breakers, rate_limits, logs, dlq, security }
    }

    /// Deliver an event through every action of a rule. Returns the final
    /// log of each action.
    pub async fn deliver(
        &self,
        rule: &IntegrationRule,
        event: &Event,
        trigger: TriggerType,
    ) -> DomainResult<Vec<ExecutionLog>> {
        let actions = rule.effective_actions();
        let multi = actions.len() > 1;

        if rule.parallel_actions && multi {
            let futures = actions.iter().map(|action| {
                self.deliver_action(rule, action, event, trigger, multi)
            });
            let mut logs = Vec::new();
            for result in join_all(futures).await {
                logs.push(result?);
            }
            return Ok(logs);
        }

        let mut logs = Vec::new();
        for (i, action) in actions.iter().enumerate() {
            if i > 0 && rule.action_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(rule.action_delay_ms)).await;
            }

            let log = self.deliver_action(rule, action, event, trigger, multi).await?;
            let failed = !matches!(log.status, LogStatus::Success);
            logs.push(log);

            if failed && action.critical_path && i + 1 < actions.len() {
                tracing::warn!(
                    rule_id = %rule.id,
                    action = %action.name,
                    "Critical-path action failed; aborting remaining actions"
                );
                break;
            }
        }

        Ok(logs)
    }

    async fn deliver_action(
        &self,
        rule: &IntegrationRule,
        action: &SubAction,
        event: &Event,
        trigger: TriggerType,
        multi: bool,
    ) -> DomainResult<ExecutionLog> {
        let mut log = ExecutionLog::new(
            rule.tenant.clone(),
            rule.id,
            event.id.clone(),
            event.event_type.clone(),
            event.payload.clone(),
        )
        .with_trigger(trigger)
        .with_org_unit(event.org_unit.clone());
        if multi {
            log = log.with_action(action.name.clone());
        }

        self.logs.create(&log).await?;
        self.attempt(rule, action, event.org_unit.as_deref(), &mut log).await?;
        Ok(log)
    }

    /// Run one attempt of a delivery against an existing log: rate limit,
    /// circuit, transform, send, classify, persist.
    pub async fn attempt(
        &self,
        rule: &IntegrationRule,
        action: &SubAction,
        org_unit: Option<&str>,
        log: &mut ExecutionLog,
    ) -> DomainResult<()> {
        // 1. Rate limit. A deferral consumes no attempt.
        if let RateDecision::Delay(wait) =
            self.rate_limits.check(rule.id, rule.rate_limit.as_ref()).await
        {
            let err = DeliveryError::new(
                ErrorCategory::RateLimited,
                "RATE_LIMIT_LOCAL",
                format!("Rule rate limit exceeded; retry in {} s", wait.as_secs().max(1)),
            )
            .with_retry_after(wait.as_secs().max(1));

            log.status = LogStatus::Retrying;
            log.should_retry = true;
            log.last_attempt_at = Some(Utc::now());
            log.error = Some(err);
            self.logs.update(log).await?;
            return Ok(());
        }

        // 2. Circuit breaker.
        let decision = self.breakers.check(rule.id, &rule.circuit_breaker).await;
        if decision.is_blocked() {
            log.mark_skipped(DeliveryError::circuit_open());
            self.logs.update(log).await?;
            return Ok(());
        }
        if decision == CircuitDecision::AllowProbe {
            tracing::info!(rule_id = %rule.id, "Half-open probe delivery");
        }

        // 3. Transform.
        let context = ScriptContext {
            tenant: rule.tenant.clone(),
            event_type: log.event_type.clone(),
            rule_id: rule.id.to_string(),
            correlation_id: log.correlation_id.clone(),
            ..ScriptContext::default()
        };
        let body = match self
            .transformer
            .transform(
                &action.transform,
                action.lookup.as_ref(),
                &log.original_payload,
                &context,
                org_unit,
                Utc::now(),
            )
            .await
        {
            Ok(body) => body,
            Err(err) => {
                return self.finish_failure(rule, log, err, 0).await;
            }
        };
        log.request_payload = Some(body.clone());

        // 4. Destination policy.
        if let Err(err) = check_url_policy(&action.target.url, &self.security).await {
            return self.finish_failure(rule, log, err, 0).await;
        }

        // 5-6. Send, with a single OAuth2 refresh on 401.
        let outcome = match self.send(rule, action, &body).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.record_attempt(log, None, Some(&err.code), 0).await?;
                self.breakers.record_failure(rule.id, &rule.circuit_breaker).await;
                let retries_remaining = log.attempt_count < rule.retry_count;
                log.mark_failure(err.clone(), retries_remaining, 0);
                return self.persist_terminal(rule, log, err).await;
            }
        };

        // 7. Classify.
        self.record_attempt(
            log,
            Some(outcome.status),
            (outcome.status >= 400).then(|| format!("HTTP_{}", outcome.status)).as_deref(),
            outcome.duration_ms,
        )
        .await?;

        if (200..300).contains(&outcome.status) {
            self.breakers.record_success(rule.id).await;
            log.mark_success(
                ResponseInfo {
                    status: outcome.status,
                    body: Some(truncate(&outcome.body, RESPONSE_SNIPPET_BYTES)),
                    headers: Some(outcome.headers),
                },
                outcome.duration_ms,
            );
            self.logs.update(log).await?;
            tracing::info!(
                rule_id = %rule.id,
                status = outcome.status,
                duration_ms = outcome.duration_ms,
                "Delivery succeeded"
            );
            return Ok(());
        }

        let mut err = DeliveryError::from_status(outcome.status);
        if let Some(retry_after) = parse_retry_after(&outcome.headers) {
            err = err.with_retry_after(retry_after);
        }

        self.breakers.record_failure(rule.id, &rule.circuit_breaker).await;
        log.response = Some(ResponseInfo {
            status: outcome.status,
            body: Some(truncate(&outcome.body, RESPONSE_SNIPPET_BYTES)),
            headers: Some(outcome.headers),
        });
        let retries_remaining = log.attempt_count < rule.retry_count;
        log.mark_failure(err.clone(), retries_remaining, outcome.duration_ms);
        self.persist_terminal(rule, log, err).await
    }

    /// Build and send the HTTP request. Returns a classified error for
    /// transport-level failures.
    async fn send(
        &self,
        rule: &IntegrationRule,
        action: &SubAction,
        body: &Value,
    ) -> Result<SendOutcome, DeliveryError> {
        let timeout_ms = clamp_timeout_ms(rule.timeout_ms);
        let mut refreshed = false;

        loop {
            let method = reqwest::Method::from_bytes(action.target.method.as_str().as_bytes())
                .map_err(|e| DeliveryError::config(format!("Invalid HTTP method: {e}")))?;

            let body_bytes = serde_json::to_vec(body)
                .map_err(|e| DeliveryError::config(format!("Body serialisation failed: {e}")))?;

            let mut builder = self
                .client
                .request(method, &action.target.url)
                .timeout(Duration::from_millis(timeout_ms))
                .header(
                    reqwest::header::CONTENT_TYPE,
                    action.target.content_type.as_deref().unwrap_or("application/json"),
                );

            for (name, value) in &action.target.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            if let Some(signing) = &rule.signing {
                builder = builder
                    .header(signing.header.as_str(), sign_body(signing, &body_bytes, Utc::now()));
            }

            builder = self.auth.apply(builder, &action.auth, rule.id).await?;
            builder = builder.body(body_bytes);

            let started = Instant::now();
            let response = match builder.send().await {
                Ok(r) => r,
                Err(e) => return Err(classify_transport_error(&e, timeout_ms)),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let status = response.status().as_u16();

            // Expired OAuth2 token: one refresh, one retry. A second 401 is
            // terminal through normal classification.
            if status == 401 && !refreshed && matches!(action.auth, AuthSpec::Oauth2 { .. }) {
                tracing::info!(rule_id = %rule.id, "401 with OAuth2 auth; refreshing token");
                self.auth.invalidate(rule.id).await;
                refreshed = true;
                continue;
            }

            let headers = headers_to_json(response.headers());
            let body = response.text().await.unwrap_or_default();

            return Ok(SendOutcome { status, body, headers, duration_ms });
        }
    }

    async fn record_attempt(
        &self,
        log: &ExecutionLog,
        status: Option<u16>,
        error_code: Option<&str>,
        duration_ms: u64,
    ) -> DomainResult<()> {
        self.logs
            .record_attempt(&DeliveryAttempt::new(
                log.id,
                log.attempt_count + 1,
                status,
                error_code.map(str::to_string),
                duration_ms,
            ))
            .await
    }

    async fn finish_failure(
        &self,
        rule: &IntegrationRule,
        log: &mut ExecutionLog,
        err: DeliveryError,
        duration_ms: u64,
    ) -> DomainResult<()> {
        // Config/script/policy failures never retry; no HTTP attempt happened.
        log.mark_failure(err.clone(), false, duration_ms);
        self.persist_terminal(rule, log, err).await
    }

    /// Persist a failed log, promoting exhausted transient failures to
    /// ABANDONED, and park terminal failures in the DLQ.
    async fn persist_terminal(
        &self,
        rule: &IntegrationRule,
        log: &mut ExecutionLog,
        err: DeliveryError,
    ) -> DomainResult<()> {
        if !log.should_retry {
            if err.category.should_retry() {
                // Transient but the retry budget is exhausted.
                log.mark_abandoned(err.category);
            }

            let next_retry_ms = (rule.retry_backoff_ms.max(100))
                .saturating_mul(2_u64.saturating_pow(log.attempt_count))
                .min(DLQ_RETRY_CAP_MS);
            let entry = DlqEntry::new(
                log.id,
                rule.id,
                rule.tenant.clone(),
                err.category,
                err.code.clone(),
                err.message.clone(),
                log.attempt_count,
            )
            .with_next_retry_at(Utc::now() + chrono::Duration::milliseconds(next_retry_ms as i64));
            self.dlq.create(&entry).await?;

            tracing::warn!(
                rule_id = %rule.id,
                log_id = %log.id,
                category = %err.category,
                code = %err.code,
                "Delivery parked in DLQ"
            );
        }

        self.logs.update(log).await?;
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn headers_to_json(headers: &reqwest::header::HeaderMap) -> Value {
    let map: serde_json::Map<String, Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                Value::String(value.to_str().unwrap_or_default().to_string()),
            )
        })
        .collect();
    Value::Object(map)
}

fn parse_retry_after(headers: &Value) -> Option<u64> {
    headers.get("retry-after")?.as_str()?.parse().ok()
}

fn classify_transport_error(e: &reqwest::Error, timeout_ms: u64) -> DeliveryError {
    if e.is_timeout() {
        return DeliveryError::timeout(timeout_ms);
    }
    let text = e.to_string();
    if text.contains("dns") || text.contains("resolve") {
        return DeliveryError::dns(
            e.url().and_then(|u| u.host_str()).unwrap_or("unknown host").to_string(),
        );
    }
    DeliveryError::network(format!("Request failed: {text}"))
}

/// Used by the scheduler and retry worker to rebuild an event view from a
/// persisted log or snapshot.
pub fn event_from_snapshot(
    tenant: &str,
    event_id: &str,
    event_type: &str,
    org_unit: Option<String>,
    payload: Value,
) -> Event {
    let mut event = Event::new(
        tenant,
        event_type,
        payload,
        crate::domain::models::SourceKind::HttpPush,
        "snapshot",
    )
    .with_id(event_id);
    event.org_unit = org_unit;
    event
}
