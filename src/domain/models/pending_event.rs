//! Documents written by the external HTTP ingress endpoint, drained by the
//! http-push adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle of a pushed event document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    New,
    Done,
    Failed,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for PendingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown pending status: {s}")),
        }
    }
}

/// An event pushed over HTTP, queued until the adapter drains it.
/// Terminal rows are purged after 7 days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEvent {
    pub id: Uuid,
    pub tenant: String,
    pub org_unit: Option<String>,
    pub event_type: String,
    pub payload: Value,
    pub status: PendingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingEvent {
    pub fn new(tenant: impl Into<String>, event_type: impl Into<String>, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            org_unit: None,
            event_type: event_type.into(),
            payload,
            status: PendingStatus::New,
            created_at: now,
            updated_at: now,
        }
    }
}
