//! Pending (HTTP-pushed) event repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{PendingEvent, PendingStatus};

/// Repository interface for the HTTP ingress queue.
#[async_trait]
pub trait PendingEventRepository: Send + Sync {
    async fn create(&self, event: &PendingEvent) -> DomainResult<()>;

    /// Oldest `new` documents, up to `batch`.
    async fn fetch_new(&self, batch: u32) -> DomainResult<Vec<PendingEvent>>;

    async fn set_status(&self, id: Uuid, status: PendingStatus) -> DomainResult<()>;

    /// Purge terminal rows older than `cutoff` (7-day TTL). Returns rows
    /// removed.
    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64>;
}
