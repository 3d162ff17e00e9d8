//! Dead-letter queue entries for terminally failed deliveries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::failure::ErrorCategory;

/// A terminally failed delivery parked for operator action.
///
/// References the execution log and rule by id only; no hard links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub id: Uuid,
    pub log_id: Uuid,
    pub rule_id: Uuid,
    pub tenant: String,
    pub category: ErrorCategory,
    pub error_code: String,
    pub error_message: String,
    pub retry_count: u32,
    /// Suggested time for an operator-initiated retry.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl DlqEntry {
    pub fn new(
        log_id: Uuid,
        rule_id: Uuid,
        tenant: impl Into<String>,
        category: ErrorCategory,
        error_code: impl Into<String>,
        error_message: impl Into<String>,
        retry_count: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            log_id,
            rule_id,
            tenant: tenant.into(),
            category,
            error_code: error_code.into(),
            error_message: error_message.into(),
            retry_count,
            next_retry_at: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn with_next_retry_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_retry_at = Some(at);
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_is_unresolved() {
        let e = DlqEntry::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "t-1",
            ErrorCategory::Transient,
            "TIMEOUT",
            "timed out",
            4,
        );
        assert!(!e.is_resolved());
        assert_eq!(e.retry_count, 4);
    }
}
