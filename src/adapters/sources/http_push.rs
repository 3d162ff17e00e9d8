//! HTTP-push adapter.
//!
//! Drains the `pending_events` queue written by the external ingress
//! endpoint. Ack marks the document `done`; nack marks it `failed` so the
//! 7-day TTL purge eventually removes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Event, PendingStatus, SourceKind};
use crate::domain::ports::{
    AckDecision, EventHandler, EventSource, PendingEventRepository,
};

/// Behaviour knobs for the push-queue drain loop.
#[derive(Debug, Clone)]
pub struct HttpPushConfig {
    pub poll_interval: Duration,
    pub batch_size: u32,
    pub drain_timeout: Duration,
}

struct Inner {
    name: String,
    tenant: String,
    config: HttpPushConfig,
    queue: Arc<dyn PendingEventRepository>,
    running: AtomicBool,
    tick_in_flight: AtomicBool,
    heartbeat: RwLock<Option<DateTime<Utc>>>,
}

/// Event source over the HTTP ingress queue for one tenant.
pub struct HttpPushSource {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HttpPushSource {
    pub fn new(
        name: impl Into<String>,
        tenant: impl Into<String>,
        config: HttpPushConfig,
        queue: Arc<dyn PendingEventRepository>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                tenant: tenant.into(),
                config,
                queue,
                running: AtomicBool::new(false),
                tick_in_flight: AtomicBool::new(false),
                heartbeat: RwLock::new(None),
            }),
            handle: Mutex::new(None),
        }
    }
}

impl Inner {
    async fn tick(&self, handler: &Arc<dyn EventHandler>) -> DomainResult<()> {
        *self.heartbeat.write().await = Some(Utc::now());

        let pending = self.queue.fetch_new(self.config.batch_size).await?;

        for doc in pending {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if doc.tenant != self.tenant {
                continue;
            }

            let mut event = Event::new(
                doc.tenant.clone(),
                doc.event_type.clone(),
                doc.payload.clone(),
                SourceKind::HttpPush,
                self.name.clone(),
            )
            .with_id(doc.id.to_string())
            .with_source_offset(doc.id.to_string());
            event.org_unit = doc.org_unit.clone();

            let ctx = crate::domain::ports::AckContext::new();
            let result = handler.handle(event, &ctx).await;

            match (result, ctx.decision().await) {
                (Ok(()), Some(AckDecision::Ack)) => {
                    self.queue.set_status(doc.id, PendingStatus::Done).await?;
                }
                (Ok(()), Some(AckDecision::Nack { .. })) => {
                    self.queue.set_status(doc.id, PendingStatus::Failed).await?;
                }
                (Ok(()), None) => break,
                (Err(e), _) => {
                    tracing::error!(source = %self.name, doc_id = %doc.id, error = %e, "Handler infrastructure error");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventSource for HttpPushSource {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn start(&self, handler: Arc<dyn EventHandler>) -> DomainResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.config.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            while inner.running.load(Ordering::SeqCst) {
                interval.tick().await;

                if inner
                    .tick_in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    continue;
                }

                if let Err(e) = inner.tick(&handler).await {
                    tracing::error!(source = %inner.name, error = %e, "Push-queue tick failed");
                }

                inner.tick_in_flight.store(false, Ordering::SeqCst);
            }
        });

        *self.handle.lock().await = Some(handle);
        tracing::info!(source = %self.inner.name, tenant = %self.inner.tenant, "HTTP push source started");
        Ok(())
    }

    async fn stop(&self) -> DomainResult<()> {
        self.inner.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.handle.lock().await.take() {
            if tokio::time::timeout(self.inner.config.drain_timeout, handle).await.is_err() {
                tracing::warn!(source = %self.inner.name, "Drain deadline exceeded; push task aborted");
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
    use crate::adapters::sqlite::connection::create_test_pool;
    use crate::adapters::sqlite::migrations::Migrator;
    use crate::adapters::sqlite::SqlitePendingEventRepository;
    use crate::domain::models::PendingEvent;
    use crate::domain::ports::AckContext;
    use serde_json::json;

    struct AckingHandler {
        events: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventHandler for AckingHandler {
        async fn handle(&self, event: Event, ctx: &AckContext) -> DomainResult<()> {
            self.events.lock().await.push(event);
            ctx.ack().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn drains_only_matching_tenant_and_marks_done() {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run().await.unwrap();
        let queue = Arc::new(SqlitePendingEventRepository::new(pool));

        let mine = PendingEvent::new("t-1", "ORDER_CREATED", json!({"n": 1}));
        let other = PendingEvent::new("t-2", "ORDER_CREATED", json!({"n": 2}));
        queue.create(&mine).await.unwrap();
        queue.create(&other).await.unwrap();

        let source = HttpPushSource::new(
            "ingress",
            "t-1",
            HttpPushConfig {
                poll_interval: Duration::from_millis(20),
                batch_size: 10,
                drain_timeout: Duration::from_secs(5),
            },
            queue.clone(),
        );
        source.inner.running.store(true, Ordering::SeqCst);

        let handler = Arc::new(AckingHandler { events: Mutex::new(vec![]) });
        source.inner.tick(&(handler.clone() as Arc<dyn EventHandler>)).await.unwrap();

        let events = handler.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tenant, "t-1");
        assert_eq!(events[0].source, SourceKind::HttpPush);
        drop(events);

        // Mine is done; the other tenant's doc is still queued.
        let remaining = queue.fetch_new(10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].tenant, "t-2");
    }
}
