//! Execution log repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{DeliveryAttempt, ExecutionLog, LogStatus};

/// Filter criteria for listing execution logs.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub tenant: Option<String>,
    pub rule_id: Option<Uuid>,
    pub status: Option<LogStatus>,
    pub event_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// Repository interface for execution logs and delivery attempts.
#[async_trait]
pub trait ExecutionLogRepository: Send + Sync {
    async fn create(&self, log: &ExecutionLog) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<ExecutionLog>>;

    async fn update(&self, log: &ExecutionLog) -> DomainResult<()>;

    async fn list(&self, filter: LogFilter) -> DomainResult<Vec<ExecutionLog>>;

    /// Logs eligible for the retry scan: `status ∈ {FAILED, RETRYING}` with
    /// `should_retry = true`, oldest attempts first.
    async fn find_retry_candidates(&self, limit: u32) -> DomainResult<Vec<ExecutionLog>>;

    /// Record one outbound attempt.
    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> DomainResult<()>;

    async fn attempts_for_log(&self, log_id: Uuid) -> DomainResult<Vec<DeliveryAttempt>>;

    /// Watchdog: reset logs stuck in `RETRYING` since before `cutoff` back
    /// to `FAILED`. Returns the number reset.
    async fn reset_stuck_retrying(&self, cutoff: DateTime<Utc>) -> DomainResult<u64>;

    /// Retention purge for rows older than `cutoff`. Returns rows removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64>;
}
