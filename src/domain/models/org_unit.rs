//! Org units scope events to sub-entities of a tenant.

use serde::{Deserialize, Serialize};

/// A sub-entity of a tenant. The parent pointer enables the
/// include-children scope walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUnit {
    /// Unique resource id.
    pub rid: String,
    pub tenant: String,
    pub parent_rid: Option<String>,
    pub name: String,
}

impl OrgUnit {
    pub fn new(rid: impl Into<String>, tenant: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            rid: rid.into(),
            tenant: tenant.into(),
            parent_rid: None,
            name: name.into(),
        }
    }

    pub fn with_parent(mut self, parent_rid: impl Into<String>) -> Self {
        self.parent_rid = Some(parent_rid.into());
        self
    }
}
