//! Org unit repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::OrgUnit;

/// Repository interface for the org-unit tree.
#[async_trait]
pub trait OrgUnitRepository: Send + Sync {
    async fn get(&self, tenant: &str, rid: &str) -> DomainResult<Option<OrgUnit>>;

    async fn upsert(&self, unit: &OrgUnit) -> DomainResult<()>;

    /// All descendant rids of `rid` within the tenant (not including `rid`).
    async fn descendants(&self, tenant: &str, rid: &str) -> DomainResult<Vec<String>>;
}
