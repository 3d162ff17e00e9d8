//! Event deduplication and audit.
//!
//! Every event is fingerprinted before any processing. First sighting
//! within the TTL window is recorded in the audit store; repeats are
//! dropped as duplicates.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::Event;
use crate::domain::ports::{EventAuditRepository, ProcessedEventRepository};

/// Idempotency window for the fingerprint seen-set.
pub const DEDUP_TTL_HOURS: i64 = 6;

/// Audit retention.
pub const AUDIT_RETENTION_DAYS: i64 = 90;

/// Outcome of the dedup check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First sighting; processing continues.
    Fresh { fingerprint: String },
    /// Seen within the TTL window; the event is acked and dropped.
    Duplicate { fingerprint: String },
}

pub struct DedupService {
    processed: Arc<dyn ProcessedEventRepository>,
    audit: Arc<dyn EventAuditRepository>,
}

impl DedupService {
    pub fn new(
        processed: Arc<dyn ProcessedEventRepository>,
        audit: Arc<dyn EventAuditRepository>,
    ) -> Self {
        Self { processed, audit }
    }

    /// Fingerprint the event, consult the seen-set, and record fresh events
    /// in the audit store.
    pub async fn check_and_record(&self, event: &Event) -> DomainResult<DedupOutcome> {
        let fingerprint = event.fingerprint();

        let fresh = self
            .processed
            .insert_if_absent(&fingerprint, &event.tenant, &event.event_type)
            .await?;

        if !fresh {
            tracing::debug!(
                tenant = %event.tenant,
                event_type = %event.event_type,
                fingerprint = %fingerprint,
                "Duplicate event dropped"
            );
            return Ok(DedupOutcome::Duplicate { fingerprint });
        }

        self.audit.record(event, &fingerprint).await?;
        Ok(DedupOutcome::Fresh { fingerprint })
    }

    /// Maintenance pass emulating the store's TTL indexes.
    pub async fn purge_expired(&self) -> DomainResult<(u64, u64)> {
        let now = Utc::now();
        let dedup_purged = self
            .processed
            .purge_older_than(now - Duration::hours(DEDUP_TTL_HOURS))
            .await?;
        let audit_purged = self
            .audit
            .purge_older_than(now - Duration::days(AUDIT_RETENTION_DAYS))
            .await?;
        Ok((dedup_purged, audit_purged))
    }
}
