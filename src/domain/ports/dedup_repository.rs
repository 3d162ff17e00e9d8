//! Deduplication and audit store ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::Event;

/// TTL'd seen-set of event fingerprints (idempotency window).
#[async_trait]
pub trait ProcessedEventRepository: Send + Sync {
    /// Insert the fingerprint if absent. Returns `true` when inserted
    /// (first sighting), `false` when the event is a duplicate.
    async fn insert_if_absent(
        &self,
        fingerprint: &str,
        tenant: &str,
        event_type: &str,
    ) -> DomainResult<bool>;

    /// Purge entries processed before `cutoff`. Returns rows removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64>;
}

/// Append-only audit of accepted events.
#[async_trait]
pub trait EventAuditRepository: Send + Sync {
    /// Record an accepted event keyed by `(source, source_offset)`, falling
    /// back to `(tenant, fingerprint, received-at bucket)` when the offset
    /// is unknown.
    async fn record(&self, event: &Event, fingerprint: &str) -> DomainResult<()>;

    /// Retention purge. Returns rows removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64>;
}
