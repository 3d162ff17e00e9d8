//! Event source port.
//!
//! An event source owns the stream of events for exactly one
//! `(tenant, source)` pair. The gateway interacts with external systems
//! exclusively through this trait, keeping the domain layer decoupled from
//! any specific transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::errors::DomainResult;
use crate::domain::models::Event;

/// Progress decision made by the handler for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Commit progress past this event.
    Ack,
    /// Do not commit; the source may redeliver after the optional delay.
    Nack { retry_after: Option<Duration> },
}

/// Per-event acknowledgement context handed to the handler.
///
/// If neither `ack` nor `nack` is called (handler crash), the decision stays
/// empty and the source treats the event as in-flight: progress is not
/// committed and redelivery is possible.
#[derive(Debug, Default)]
pub struct AckContext {
    decision: Mutex<Option<AckDecision>>,
}

impl AckContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit progress past this event.
    pub async fn ack(&self) {
        *self.decision.lock().await = Some(AckDecision::Ack);
    }

    /// Decline to commit; redelivery is possible after `retry_after`.
    pub async fn nack(&self, retry_after: Option<Duration>) {
        *self.decision.lock().await = Some(AckDecision::Nack { retry_after });
    }

    /// The decision recorded by the handler, if any.
    pub async fn decision(&self) -> Option<AckDecision> {
        *self.decision.lock().await
    }
}

/// Downstream consumer of normalised events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Process one event. Implementations record progress through `ctx`;
    /// the returned error is reserved for infrastructure failures of the
    /// handler itself (store down), which sources treat as a nack.
    async fn handle(&self, event: Event, ctx: &AckContext) -> DomainResult<()>;
}

/// Port implemented by every ingestion adapter.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Stable identifier for checkpoints and observability.
    fn name(&self) -> &str;

    /// Begin producing events into `handler`. Returns once the internal
    /// task(s) are running.
    async fn start(&self, handler: Arc<dyn EventHandler>) -> DomainResult<()>;

    /// Drain in-flight work (bounded by the configured deadline) and
    /// release resources.
    async fn stop(&self) -> DomainResult<()>;

    /// Last tick heartbeat, used by the supervisor to detect stalls.
    fn last_heartbeat(&self) -> Option<DateTime<Utc>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ack_context_records_latest_decision() {
        let ctx = AckContext::new();
        assert_eq!(ctx.decision().await, None);
        ctx.ack().await;
        assert_eq!(ctx.decision().await, Some(AckDecision::Ack));
        ctx.nack(Some(Duration::from_secs(5))).await;
        assert_eq!(
            ctx.decision().await,
            Some(AckDecision::Nack { retry_after: Some(Duration::from_secs(5)) })
        );
    }
}
