//! Dead-letter queue repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::DlqEntry;

/// Filter criteria for listing DLQ entries.
#[derive(Debug, Clone, Default)]
pub struct DlqFilter {
    pub tenant: Option<String>,
    pub rule_id: Option<Uuid>,
    pub unresolved_only: bool,
    pub limit: Option<u32>,
}

/// Repository interface for dead-letter entries.
#[async_trait]
pub trait DlqRepository: Send + Sync {
    async fn create(&self, entry: &DlqEntry) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<DlqEntry>>;

    async fn get_by_log(&self, log_id: Uuid) -> DomainResult<Option<DlqEntry>>;

    async fn list(&self, filter: DlqFilter) -> DomainResult<Vec<DlqEntry>>;

    /// Mark an entry resolved (promoted back for delivery or dismissed).
    async fn resolve(&self, id: Uuid) -> DomainResult<()>;
}
