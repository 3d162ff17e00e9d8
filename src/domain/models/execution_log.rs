//! Execution log: one row per (event, rule) delivery, mutated until terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::failure::{DeliveryError, ErrorCategory};

/// Status of an execution log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    Pending,
    Success,
    Failed,
    Retrying,
    Abandoned,
    Skipped,
    /// Event dropped by the idempotency window before rule resolution.
    Duplicate,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Retrying => "RETRYING",
            Self::Abandoned => "ABANDONED",
            Self::Skipped => "SKIPPED",
            Self::Duplicate => "DUPLICATE",
        }
    }

    /// Terminal statuses are never mutated again by the delivery plane.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Abandoned | Self::Skipped | Self::Duplicate)
    }
}

impl std::str::FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "RETRYING" => Ok(Self::Retrying),
            "ABANDONED" => Ok(Self::Abandoned),
            "SKIPPED" => Ok(Self::Skipped),
            "DUPLICATE" => Ok(Self::Duplicate),
            _ => Err(format!("Unknown log status: {s}")),
        }
    }
}

/// Direction of the logged exchange. The delivery plane writes outbound
/// rows; inbound is reserved for ingress logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Outbound,
    Inbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outbound => "outbound",
            Self::Inbound => "inbound",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "outbound" => Ok(Self::Outbound),
            "inbound" => Ok(Self::Inbound),
            _ => Err(format!("Unknown direction: {s}")),
        }
    }
}

/// What triggered the delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    Event,
    Retry,
    Scheduled,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Retry => "retry",
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(Self::Event),
            "retry" => Ok(Self::Retry),
            "scheduled" => Ok(Self::Scheduled),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown trigger type: {s}")),
        }
    }
}

/// Snapshot of the endpoint's response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub status: u16,
    /// Body snippet, truncated for storage.
    pub body: Option<String>,
    pub headers: Option<Value>,
}

/// One row per (event, rule) delivery. Append-mostly; status mutates until
/// terminal. TTL 90 days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub tenant: String,
    pub rule_id: Uuid,
    /// Name of the sub-action this row covers; empty for single-action rules.
    pub action: Option<String>,
    pub trace_id: String,
    pub correlation_id: String,
    pub event_id: String,
    pub event_type: String,
    pub org_unit: Option<String>,
    pub direction: Direction,
    pub trigger: TriggerType,
    pub status: LogStatus,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub should_retry: bool,
    /// Payload as received from the source.
    pub original_payload: Value,
    /// Payload after transformation, as sent.
    pub request_payload: Option<Value>,
    pub response: Option<ResponseInfo>,
    pub error: Option<DeliveryError>,
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionLog {
    pub fn new(
        tenant: impl Into<String>,
        rule_id: Uuid,
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        original_payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            rule_id,
            action: None,
            trace_id: Uuid::new_v4().to_string(),
            correlation_id: Uuid::new_v4().to_string(),
            event_id: event_id.into(),
            event_type: event_type.into(),
            org_unit: None,
            direction: Direction::Outbound,
            trigger: TriggerType::Event,
            status: LogStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            should_retry: false,
            original_payload,
            request_payload: None,
            response: None,
            error: None,
            duration_ms: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_trigger(mut self, trigger: TriggerType) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_org_unit(mut self, org_unit: Option<String>) -> Self {
        self.org_unit = org_unit;
        self
    }

    /// Record a successful attempt.
    pub fn mark_success(&mut self, response: ResponseInfo, duration_ms: u64) {
        self.status = LogStatus::Success;
        self.attempt_count += 1;
        self.last_attempt_at = Some(Utc::now());
        self.should_retry = false;
        self.response = Some(response);
        self.error = None;
        self.duration_ms = Some(duration_ms);
    }

    /// Record a failed attempt. `retries_remaining` reflects the rule's
    /// retry budget after this attempt.
    pub fn mark_failure(&mut self, error: DeliveryError, retries_remaining: bool, duration_ms: u64) {
        self.attempt_count += 1;
        self.last_attempt_at = Some(Utc::now());
        self.should_retry = error.should_retry() && retries_remaining;
        self.status = if self.should_retry { LogStatus::Retrying } else { LogStatus::Failed };
        self.duration_ms = Some(duration_ms);
        self.error = Some(error);
    }

    /// Record that the retry budget is exhausted.
    pub fn mark_abandoned(&mut self, category: ErrorCategory) {
        self.status = LogStatus::Abandoned;
        self.should_retry = false;
        if let Some(err) = &mut self.error {
            err.category = category;
        }
    }

    /// Record a deliberate skip (open circuit, shutdown).
    pub fn mark_skipped(&mut self, error: DeliveryError) {
        self.status = LogStatus::Skipped;
        self.should_retry = false;
        self.error = Some(error);
    }
}

/// One outbound attempt of a log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub log_id: Uuid,
    pub attempt: u32,
    pub status: Option<u16>,
    pub error_code: Option<String>,
    pub duration_ms: u64,
    pub attempted_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    pub fn new(log_id: Uuid, attempt: u32, status: Option<u16>, error_code: Option<String>, duration_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            log_id,
            attempt,
            status,
            error_code,
            duration_ms,
            attempted_at: Utc::now(),
        }
    }
}
