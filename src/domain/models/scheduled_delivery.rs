//! Scheduled deliveries: future firings of a rule computed by its
//! scheduling script.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Persisted status of a scheduled delivery.
///
/// `OVERDUE` is deliberately absent: it is a derived label for `PENDING`
/// entries past `due_at` plus grace, computed at read time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Pending,
    Processing,
    Done,
    Failed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }

    /// Whether a transition to `to` is legal.
    pub fn can_transition_to(&self, to: ScheduleStatus) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Processing, Self::Done)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Cancelled)
                // watchdog reset
                | (Self::Processing, Self::Pending)
        )
    }
}

impl std::str::FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown schedule status: {s}")),
        }
    }
}

/// Recurrence plan produced by a scheduling script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrencePlan {
    pub interval_ms: u64,
    pub max_occurrences: u32,
}

/// A future firing of a rule, persisted until its terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledDelivery {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub tenant: String,
    pub due_at: DateTime<Utc>,
    pub status: ScheduleStatus,
    /// Reference to the originating event.
    pub event_id: String,
    pub event_type: String,
    pub org_unit: Option<String>,
    /// Payload snapshot taken at scheduling time.
    pub payload: Value,
    /// Present for recurring rules; `None` for one-shot delays.
    pub recurrence: Option<RecurrencePlan>,
    /// 1-based occurrence counter for recurring plans.
    pub occurrence: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub fired_at: Option<DateTime<Utc>>,
}

impl ScheduledDelivery {
    pub fn new(
        rule_id: Uuid,
        tenant: impl Into<String>,
        event_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        due_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            rule_id,
            tenant: tenant.into(),
            due_at,
            status: ScheduleStatus::Pending,
            event_id: event_id.into(),
            event_type: event_type.into(),
            org_unit: None,
            payload,
            recurrence: None,
            occurrence: 1,
            created_at: now,
            updated_at: now,
            fired_at: None,
        }
    }

    pub fn with_recurrence(mut self, plan: RecurrencePlan) -> Self {
        self.recurrence = Some(plan);
        self
    }

    pub fn with_org_unit(mut self, org_unit: Option<String>) -> Self {
        self.org_unit = org_unit;
        self
    }

    /// Derived label: a `PENDING` entry past `due_at` plus grace is overdue.
    pub fn is_overdue(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.status == ScheduleStatus::Pending && now > self.due_at + grace
    }

    /// Build the next occurrence of a recurring plan, or `None` when the
    /// plan is exhausted.
    pub fn next_occurrence(&self) -> Option<ScheduledDelivery> {
        let plan = self.recurrence?;
        if self.occurrence >= plan.max_occurrences {
            return None;
        }
        let now = Utc::now();
        Some(ScheduledDelivery {
            id: Uuid::new_v4(),
            rule_id: self.rule_id,
            tenant: self.tenant.clone(),
            due_at: self.due_at + Duration::milliseconds(plan.interval_ms as i64),
            status: ScheduleStatus::Pending,
            event_id: self.event_id.clone(),
            event_type: self.event_type.clone(),
            org_unit: self.org_unit.clone(),
            payload: self.payload.clone(),
            recurrence: Some(plan),
            occurrence: self.occurrence + 1,
            created_at: now,
            updated_at: now,
            fired_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delivery(due_at: DateTime<Utc>) -> ScheduledDelivery {
        ScheduledDelivery::new(Uuid::new_v4(), "t-1", "evt-1", "ORDER_CREATED", json!({}), due_at)
    }

    #[test]
    fn transitions_follow_state_machine() {
        use ScheduleStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Done));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Done));
        assert!(!Done.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Processing));
    }

    #[test]
    fn overdue_is_derived_with_grace() {
        let now = Utc::now();
        let grace = Duration::hours(24);
        let d = delivery(now - Duration::hours(25));
        assert!(d.is_overdue(now, grace));

        // Exactly at the grace boundary is not overdue.
        let d = delivery(now - grace);
        assert!(!d.is_overdue(now, grace));

        // One millisecond past the boundary is.
        let d = delivery(now - grace - Duration::milliseconds(1));
        assert!(d.is_overdue(now, grace));

        // Non-pending entries are never overdue.
        let mut d = delivery(now - Duration::hours(48));
        d.status = ScheduleStatus::Done;
        assert!(!d.is_overdue(now, grace));
    }

    #[test]
    fn recurring_plan_stops_at_max_occurrences() {
        let plan = RecurrencePlan { interval_ms: 60_000, max_occurrences: 3 };
        let first = delivery(Utc::now()).with_recurrence(plan);
        let second = first.next_occurrence().unwrap();
        assert_eq!(second.occurrence, 2);
        assert_eq!(second.due_at, first.due_at + Duration::milliseconds(60_000));
        let third = second.next_occurrence().unwrap();
        assert_eq!(third.occurrence, 3);
        assert!(third.next_occurrence().is_none());
    }

    #[test]
    fn one_shot_has_no_next_occurrence() {
        let d = delivery(Utc::now());
        assert!(d.next_occurrence().is_none());
    }
}
