//! Code lookups used during transformation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A code mapping from a source system code to a target system code,
/// unique per active `(tenant, org_unit, lookup_type, source_code)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lookup {
    pub id: Uuid,
    pub tenant: String,
    pub org_unit: Option<String>,
    pub lookup_type: String,
    pub source_code: String,
    pub target_code: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lookup {
    pub fn new(
        tenant: impl Into<String>,
        lookup_type: impl Into<String>,
        source_code: impl Into<String>,
        target_code: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            org_unit: None,
            lookup_type: lookup_type.into(),
            source_code: source_code.into(),
            target_code: target_code.into(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_org_unit(mut self, org_unit: impl Into<String>) -> Self {
        self.org_unit = Some(org_unit.into());
        self
    }
}
