//! Lookup repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Lookup;

/// Repository interface for code lookups.
#[async_trait]
pub trait LookupRepository: Send + Sync {
    /// Find the active mapping for `(tenant, org_unit, lookup_type,
    /// source_code)`. Falls back to the tenant-wide mapping (no org unit)
    /// when no org-unit-specific row exists.
    async fn find(
        &self,
        tenant: &str,
        org_unit: Option<&str>,
        lookup_type: &str,
        source_code: &str,
    ) -> DomainResult<Option<Lookup>>;

    async fn upsert(&self, lookup: &Lookup) -> DomainResult<()>;

    async fn list_for_tenant(&self, tenant: &str) -> DomainResult<Vec<Lookup>>;
}
