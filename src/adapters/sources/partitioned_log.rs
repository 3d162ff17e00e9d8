//! Partitioned-log adapter.
//!
//! Consumes a Kafka topic with a per-tenant consumer group so different
//! tenants commit independently. Offsets are committed manually on ack;
//! uncommitted offsets are redelivered on rebalance. Committed positions
//! are mirrored into `source_checkpoints` per partition for observability.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Event, SourceCheckpoint, SourceKind};
use crate::domain::ports::{AckDecision, CheckpointRepository, EventHandler, EventSource};

/// Behaviour knobs for the log consumer.
#[derive(Debug, Clone)]
pub struct PartitionedLogConfig {
    pub brokers: String,
    pub topic: String,
    /// Consumer group prefix; the tenant id is appended.
    pub group_prefix: String,
    pub drain_timeout: Duration,
}

/// Fields extracted from a log message, tolerant of legacy aliases.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub event_type: String,
    pub payload: Value,
    pub tenant: Option<String>,
    pub org_unit: Option<String>,
    pub event_id: Option<String>,
}

/// Decode a log message value. Legacy producers use `transaction_type`,
/// `org_id`, `entity_rid`, `entity_parent_rid`; the gateway reads either
/// but writes only the modern names.
pub fn decode_log_message(value: &Value) -> Option<DecodedMessage> {
    let get_str = |keys: &[&str]| -> Option<String> {
        keys.iter().find_map(|k| value.get(*k).and_then(Value::as_str).map(str::to_string))
    };

    let event_type = get_str(&["eventType", "event_type", "transaction_type", "type"])?;
    let payload = value
        .get("payload")
        .or_else(|| value.get("data"))
        .cloned()
        .unwrap_or_else(|| value.clone());
    let tenant = get_str(&["tenant-id", "org_id", "entity_parent_rid"]);
    let org_unit = get_str(&["orgUnitId", "entity_rid"]);
    let event_id = get_str(&["eventId"]);

    Some(DecodedMessage { event_type, payload, tenant, org_unit, event_id })
}

struct Inner {
    name: String,
    tenant: String,
    config: PartitionedLogConfig,
    checkpoints: Arc<dyn CheckpointRepository>,
    running: AtomicBool,
    heartbeat: RwLock<Option<DateTime<Utc>>>,
}

/// Event source over a Kafka topic for one tenant.
pub struct PartitionedLogSource {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PartitionedLogSource {
    pub fn new(
        name: impl Into<String>,
        tenant: impl Into<String>,
        config: PartitionedLogConfig,
        checkpoints: Arc<dyn CheckpointRepository>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                tenant: tenant.into(),
                config,
                checkpoints,
                running: AtomicBool::new(false),
                heartbeat: RwLock::new(None),
            }),
            handle: Mutex::new(None),
        }
    }
}

impl Inner {
    fn build_consumer(&self) -> DomainResult<StreamConsumer> {
        let group_id = format!("{}-{}", self.config.group_prefix, self.tenant);
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.brokers)
            .set("group.id", &group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", "30000")
            .create()
            .map_err(|e| DomainError::SourceError(format!("Kafka consumer creation failed: {e}")))?;

        consumer
            .subscribe(&[self.config.topic.as_str()])
            .map_err(|e| DomainError::SourceError(format!("Kafka subscribe failed: {e}")))?;

        Ok(consumer)
    }

    fn reconnect_backoff() -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(30),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    async fn run(&self, handler: Arc<dyn EventHandler>) {
        let mut backoff = Self::reconnect_backoff();

        'reconnect: while self.running.load(Ordering::SeqCst) {
            let consumer = match self.build_consumer() {
                Ok(c) => c,
                Err(e) => {
                    let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                    tracing::error!(source = %self.name, error = %e, wait_secs = wait.as_secs(), "Kafka connect failed; backing off");
                    tokio::time::sleep(wait).await;
                    continue;
                }
            };

            tracing::info!(source = %self.name, tenant = %self.tenant, topic = %self.config.topic, "Log consumer connected");

            while self.running.load(Ordering::SeqCst) {
                *self.heartbeat.write().await = Some(Utc::now());

                let message = match tokio::time::timeout(Duration::from_secs(1), consumer.recv()).await {
                    // Idle window with no traffic; loop to refresh the heartbeat.
                    Err(_) => continue,
                    Ok(Err(e)) => {
                        let wait = backoff.next_backoff().unwrap_or(Duration::from_secs(30));
                        tracing::error!(source = %self.name, error = %e, wait_secs = wait.as_secs(), "Kafka receive failed; reconnecting");
                        tokio::time::sleep(wait).await;
                        continue 'reconnect;
                    }
                    Ok(Ok(m)) => m,
                };
                backoff.reset();

                let key_tenant = message
                    .key()
                    .and_then(|k| std::str::from_utf8(k).ok())
                    .map(str::to_string);

                let value: Value = match message
                    .payload()
                    .and_then(|p| serde_json::from_slice(p).ok())
                {
                    Some(v) => v,
                    None => {
                        tracing::warn!(source = %self.name, offset = message.offset(), "Undecodable log message; committing past it");
                        let _ = consumer.commit_message(&message, CommitMode::Async);
                        continue;
                    }
                };

                let Some(decoded) = decode_log_message(&value) else {
                    tracing::warn!(source = %self.name, offset = message.offset(), "Log message without an event type; committing past it");
                    let _ = consumer.commit_message(&message, CommitMode::Async);
                    continue;
                };

                let tenant = decoded.tenant.clone().or(key_tenant);
                if tenant.as_deref() != Some(self.tenant.as_str()) {
                    // Another tenant's message: this group's offset still moves.
                    let _ = consumer.commit_message(&message, CommitMode::Async);
                    continue;
                }

                let offset = format!("{}", message.offset());
                let partition_name = format!("{}#{}", self.config.topic, message.partition());

                let mut event = Event::new(
                    self.tenant.clone(),
                    decoded.event_type,
                    decoded.payload,
                    SourceKind::PartitionedLog,
                    self.name.clone(),
                )
                .with_source_offset(format!("{}:{}", message.partition(), message.offset()));
                event.org_unit = decoded.org_unit;
                if let Some(id) = decoded.event_id {
                    event = event.with_id(id);
                }

                let ctx = crate::domain::ports::AckContext::new();
                let result = handler.handle(event, &ctx).await;

                match (result, ctx.decision().await) {
                    (Ok(()), Some(AckDecision::Ack)) => {
                        if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                            tracing::error!(source = %self.name, error = %e, "Offset commit failed");
                        }
                        let _ = self
                            .checkpoints
                            .advance(&SourceCheckpoint::new(
                                SourceKind::PartitionedLog,
                                &partition_name,
                                &self.tenant,
                                &offset,
                            ))
                            .await;
                    }
                    (Ok(()), Some(AckDecision::Nack { retry_after })) => {
                        // Leave the offset uncommitted; redelivery happens on
                        // rebalance or restart.
                        if let Some(delay) = retry_after {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    (Ok(()), None) | (Err(_), _) => {
                        tracing::error!(source = %self.name, offset = %offset, "Handler made no progress; offset left uncommitted");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl EventSource for PartitionedLogSource {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn start(&self, handler: Arc<dyn EventHandler>) -> DomainResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.run(handler).await;
        });

        *self.handle.lock().await = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> DomainResult<()> {
        self.inner.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.handle.lock().await.take() {
            if tokio::time::timeout(self.inner.config.drain_timeout, handle).await.is_err() {
                tracing::warn!(source = %self.inner.name, "Drain deadline exceeded; consumer task aborted");
            }
        }

        Ok(())
    }

    fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.inner.heartbeat.try_read().ok().and_then(|hb| *hb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_modern_field_names() {
        let value = json!({
            "eventType": "ORDER_CREATED",
            "payload": {"orderId": "A1"},
            "tenant-id": "t-100",
            "orgUnitId": "ou-5",
            "eventId": "evt-9"
        });
        let decoded = decode_log_message(&value).unwrap();
        assert_eq!(decoded.event_type, "ORDER_CREATED");
        assert_eq!(decoded.payload, json!({"orderId": "A1"}));
        assert_eq!(decoded.tenant.as_deref(), Some("t-100"));
        assert_eq!(decoded.org_unit.as_deref(), Some("ou-5"));
        assert_eq!(decoded.event_id.as_deref(), Some("evt-9"));
    }

    #[test]
    fn decodes_legacy_aliases() {
        let value = json!({
            "transaction_type": "RESULT_READY",
            "data": {"sample": 1},
            "entity_parent_rid": "t-7",
            "entity_rid": "ou-2"
        });
        let decoded = decode_log_message(&value).unwrap();
        assert_eq!(decoded.event_type, "RESULT_READY");
        assert_eq!(decoded.payload, json!({"sample": 1}));
        assert_eq!(decoded.tenant.as_deref(), Some("t-7"));
        assert_eq!(decoded.org_unit.as_deref(), Some("ou-2"));
    }

    #[test]
    fn alias_precedence_prefers_modern_names() {
        let value = json!({
            "eventType": "MODERN",
            "transaction_type": "LEGACY",
            "payload": {"x": 1},
            "data": {"y": 2}
        });
        let decoded = decode_log_message(&value).unwrap();
        assert_eq!(decoded.event_type, "MODERN");
        assert_eq!(decoded.payload, json!({"x": 1}));
    }

    #[test]
    fn message_without_type_is_rejected() {
        assert!(decode_log_message(&json!({"payload": {}})).is_none());
    }

    #[test]
    fn whole_value_is_payload_when_no_payload_field() {
        let value = json!({"type": "PING", "n": 3});
        let decoded = decode_log_message(&value).unwrap();
        assert_eq!(decoded.payload, value);
    }
}
