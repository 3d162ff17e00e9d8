//! Durable source cursors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::SourceKind;

/// Last processed position per `(source kind, source name, tenant)`.
///
/// Positions are opaque strings compared numerically when both sides parse
/// as integers, lexicographically otherwise. Advancement is monotonic: the
/// repository ignores writes that would move the position backwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCheckpoint {
    pub source: SourceKind,
    pub source_name: String,
    pub tenant: String,
    pub position: String,
    pub updated_at: DateTime<Utc>,
}

impl SourceCheckpoint {
    pub fn new(
        source: SourceKind,
        source_name: impl Into<String>,
        tenant: impl Into<String>,
        position: impl Into<String>,
    ) -> Self {
        Self {
            source,
            source_name: source_name.into(),
            tenant: tenant.into(),
            position: position.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Compare two checkpoint positions. Numeric when both parse as i64.
pub fn position_newer(candidate: &str, current: &str) -> bool {
    match (candidate.parse::<i64>(), current.parse::<i64>()) {
        (Ok(a), Ok(b)) => a > b,
        _ => candidate > current,
    }
}
