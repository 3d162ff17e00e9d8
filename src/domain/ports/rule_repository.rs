//! Integration rule repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::IntegrationRule;

/// Filter criteria for listing rules.
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    pub tenant: Option<String>,
    pub event_type: Option<String>,
    pub active: Option<bool>,
    /// Include soft-deleted rules (default false).
    pub include_deleted: bool,
}

/// Repository interface for `IntegrationRule` persistence.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    async fn create(&self, rule: &IntegrationRule) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<IntegrationRule>>;

    async fn update(&self, rule: &IntegrationRule) -> DomainResult<()>;

    /// Tombstone the rule; it stops matching but stays readable.
    async fn soft_delete(&self, id: Uuid) -> DomainResult<()>;

    async fn list(&self, filter: RuleFilter) -> DomainResult<Vec<IntegrationRule>>;

    /// Live rules for a tenant, ordered `(priority desc, updated_at asc)`.
    async fn list_live_for_tenant(&self, tenant: &str) -> DomainResult<Vec<IntegrationRule>>;

    async fn set_active(&self, id: Uuid, active: bool) -> DomainResult<()>;
}
