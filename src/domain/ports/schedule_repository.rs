//! Scheduled delivery repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ScheduleStatus, ScheduledDelivery};

/// Filter criteria for listing scheduled deliveries.
#[derive(Debug, Clone, Default)]
pub struct ScheduleFilter {
    pub tenant: Option<String>,
    pub rule_id: Option<Uuid>,
    pub status: Option<ScheduleStatus>,
    pub limit: Option<u32>,
}

/// Repository interface for scheduled deliveries.
#[async_trait]
pub trait ScheduledDeliveryRepository: Send + Sync {
    async fn create(&self, delivery: &ScheduledDelivery) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<ScheduledDelivery>>;

    async fn list(&self, filter: ScheduleFilter) -> DomainResult<Vec<ScheduledDelivery>>;

    /// Atomically claim due rows: `status = PENDING AND due_at <= now` move
    /// to `PROCESSING`, oldest due first, up to `batch`. Returns the claimed
    /// rows. Parallel claimers never receive the same row.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        batch: u32,
    ) -> DomainResult<Vec<ScheduledDelivery>>;

    /// Write the terminal state of a fired entry.
    async fn complete(&self, id: Uuid, status: ScheduleStatus) -> DomainResult<()>;

    /// Cancel a pending entry. Fails on terminal entries.
    async fn cancel(&self, id: Uuid) -> DomainResult<()>;

    /// Cancel `PENDING` entries with `due_at` before `cutoff`. Returns the
    /// number cancelled.
    async fn cancel_overdue(&self, cutoff: DateTime<Utc>) -> DomainResult<u64>;

    /// Watchdog: reset entries stuck in `PROCESSING` since before `cutoff`
    /// back to `PENDING`. Returns the number reset.
    async fn reset_stuck_processing(&self, cutoff: DateTime<Utc>) -> DomainResult<u64>;
}
