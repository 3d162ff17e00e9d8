//! Integration rule: the per-tenant configuration describing which events
//! to select and how to deliver them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Event-type selector wildcard.
pub const EVENT_TYPE_WILDCARD: &str = "*";

/// How a rule's scope relates to the event's org unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopePolicy {
    /// Match only the configured org unit.
    SelfOnly,
    /// Match the configured org unit and any descendant.
    IncludeChildren,
    /// Match any org unit of the tenant.
    #[default]
    All,
}

impl ScopePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelfOnly => "SELF",
            Self::IncludeChildren => "INCLUDE_CHILDREN",
            Self::All => "ALL",
        }
    }
}

/// Scope of a rule: policy plus per-rule excludes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RuleScope {
    pub policy: ScopePolicy,
    /// Anchor org unit for `SELF` and `INCLUDE_CHILDREN`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_unit: Option<String>,
    /// Org units explicitly excluded regardless of policy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excludes: Vec<String>,
}

/// Outbound HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

/// Outgoing authentication applied to the delivery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthSpec {
    #[default]
    None,
    ApiKey {
        header: String,
        key: String,
    },
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
    Oauth1 {
        consumer_key: String,
        consumer_secret: String,
        token: String,
        token_secret: String,
    },
    Oauth2 {
        token_url: String,
        client_id: String,
        client_secret: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
    },
    Custom {
        headers: HashMap<String, String>,
    },
}

/// Transformation function applied to a single mapped field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MapFunction {
    Trim,
    Upper,
    Lower,
    FormatDate { format: String },
    Default,
}

/// A single declarative field mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_path: String,
    pub target_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<MapFunction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub required: bool,
}

/// A static field merged into every outbound body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticField {
    pub target_path: String,
    pub value: Value,
}

/// Declarative mapping specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MappingSpec {
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub static_fields: Vec<StaticField>,
}

/// How the outbound request body is produced from the event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TransformSpec {
    /// Pass the payload through unchanged.
    #[default]
    Passthrough,
    /// Ordered declarative field mapping.
    Mapping(MappingSpec),
    /// User-supplied script evaluated in the sandbox.
    Script { source: String },
}

/// Behaviour when a lookup finds no mapping for a source code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnmappedBehavior {
    /// Keep the original value.
    #[default]
    Passthrough,
    /// Substitute the supplied default.
    Default,
    /// Propagate a transformer error.
    Fail,
}

/// A single lookup substitution, e.g. `items[].serviceCode -> items[].lisCode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupField {
    pub source_path: String,
    pub target_path: String,
    /// Lookup type, matched against the `lookups` collection.
    pub lookup_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

/// Post-transformation code mapping specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupSpec {
    pub fields: Vec<LookupField>,
    #[serde(default)]
    pub unmapped_behavior: UnmappedBehavior,
}

/// Where and how a single delivery request is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Defaults to `application/json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl TargetSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Post,
            headers: HashMap::new(),
            content_type: None,
        }
    }
}

/// One sub-action of a multi-action rule. Executes independently with its
/// own transformation, auth, and target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAction {
    pub name: String,
    pub target: TargetSpec,
    #[serde(default)]
    pub auth: AuthSpec,
    #[serde(default)]
    pub transform: TransformSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup: Option<LookupSpec>,
    /// A failure of a critical-path action aborts the remaining actions.
    #[serde(default)]
    pub critical_path: bool,
}

/// When the delivery fires relative to event arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    #[default]
    Immediate,
    Delayed,
    Recurring,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Delayed => "delayed",
            Self::Recurring => "recurring",
        }
    }

    pub const fn is_scheduled(&self) -> bool {
        matches!(self, Self::Delayed | Self::Recurring)
    }
}

impl std::str::FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(Self::Immediate),
            "delayed" => Ok(Self::Delayed),
            "recurring" => Ok(Self::Recurring),
            _ => Err(format!("Unknown delivery mode: {s}")),
        }
    }
}

/// Per-rule token bucket policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Maximum requests per window (also the burst capacity).
    pub capacity: u32,
    /// Refill window in seconds.
    pub window_seconds: u32,
}

/// Per-rule circuit breaker policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerPolicy {
    /// Consecutive failures before the circuit opens.
    pub threshold: u32,
    /// How long the circuit stays open before a half-open probe, in ms.
    pub open_ms: u64,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self { threshold: 5, open_ms: 60_000 }
    }
}

/// HMAC body-signing configuration with dual-secret rotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningSpec {
    /// Header the signature is placed in.
    pub header: String,
    pub secret: String,
    /// Old secret kept active during rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_secret: Option<String>,
    /// Optional phase-out date for the old secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_secret_expires_at: Option<DateTime<Utc>>,
}

/// A configured integration rule owned by a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationRule {
    pub id: Uuid,
    pub tenant: String,
    pub name: String,
    /// Event type selector; `*` matches everything.
    pub event_type: String,
    #[serde(default)]
    pub scope: RuleScope,
    pub target: TargetSpec,
    #[serde(default)]
    pub auth: AuthSpec,
    /// Request timeout, clamped to 500..=60000 at send time.
    pub timeout_ms: u64,
    /// Number of automatic retries after the first attempt.
    pub retry_count: u32,
    /// Base backoff for the exponential retry schedule, in ms.
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub transform: TransformSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup: Option<LookupSpec>,
    /// Ordered sub-actions; empty for single-action rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<SubAction>,
    /// Delay between sequential sub-actions, in ms.
    pub action_delay_ms: u64,
    /// Execute sub-actions concurrently instead of sequentially.
    #[serde(default)]
    pub parallel_actions: bool,
    #[serde(default)]
    pub delivery_mode: DeliveryMode,
    /// Scheduling script for delayed/recurring rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_script: Option<String>,
    pub active: bool,
    /// Tombstone; soft-deleted rules never match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitPolicy>,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing: Option<SigningSpec>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntegrationRule {
    /// Create a rule with sensible defaults for an immediate POST delivery.
    pub fn new(
        tenant: impl Into<String>,
        name: impl Into<String>,
        event_type: impl Into<String>,
        target: TargetSpec,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            name: name.into(),
            event_type: event_type.into(),
            scope: RuleScope::default(),
            target,
            auth: AuthSpec::None,
            timeout_ms: 30_000,
            retry_count: 3,
            retry_backoff_ms: 1_000,
            transform: TransformSpec::Passthrough,
            lookup: None,
            actions: Vec::new(),
            action_delay_ms: 10_000,
            parallel_actions: false,
            delivery_mode: DeliveryMode::Immediate,
            schedule_script: None,
            active: true,
            deleted_at: None,
            priority: 0,
            rate_limit: None,
            circuit_breaker: CircuitBreakerPolicy::default(),
            signing: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this rule's selector matches the given event type.
    pub fn matches_event_type(&self, event_type: &str) -> bool {
        self.event_type == EVENT_TYPE_WILDCARD || self.event_type == event_type
    }

    /// Whether the rule is live: active and not tombstoned.
    pub fn is_live(&self) -> bool {
        self.active && self.deleted_at.is_none()
    }

    /// The effective list of deliveries this rule performs: its sub-actions,
    /// or a single synthesised action from the rule-level target/transform.
    pub fn effective_actions(&self) -> Vec<SubAction> {
        if self.actions.is_empty() {
            vec![SubAction {
                name: self.name.clone(),
                target: self.target.clone(),
                auth: self.auth.clone(),
                transform: self.transform.clone(),
                lookup: self.lookup.clone(),
                critical_path: true,
            }]
        } else {
            self.actions.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> IntegrationRule {
        IntegrationRule::new(
            "tenant-100",
            "order-hook",
            "ORDER_CREATED",
            TargetSpec::new("https://example.test/hook"),
        )
    }

    #[test]
    fn event_type_matching() {
        let mut r = rule();
        assert!(r.matches_event_type("ORDER_CREATED"));
        assert!(!r.matches_event_type("ORDER_DELETED"));
        r.event_type = EVENT_TYPE_WILDCARD.to_string();
        assert!(r.matches_event_type("ANYTHING"));
    }

    #[test]
    fn tombstoned_rule_is_not_live() {
        let mut r = rule();
        assert!(r.is_live());
        r.deleted_at = Some(Utc::now());
        assert!(!r.is_live());
        r.deleted_at = None;
        r.active = false;
        assert!(!r.is_live());
    }

    #[test]
    fn single_action_rule_synthesises_one_action() {
        let r = rule();
        let actions = r.effective_actions();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].target.url, "https://example.test/hook");
        assert!(actions[0].critical_path);
    }

    #[test]
    fn multi_action_rule_keeps_order() {
        let mut r = rule();
        r.actions = vec![
            SubAction {
                name: "first".into(),
                target: TargetSpec::new("https://a.test"),
                auth: AuthSpec::None,
                transform: TransformSpec::Passthrough,
                lookup: None,
                critical_path: false,
            },
            SubAction {
                name: "second".into(),
                target: TargetSpec::new("https://b.test"),
                auth: AuthSpec::None,
                transform: TransformSpec::Passthrough,
                lookup: None,
                critical_path: true,
            },
        ];
        let actions = r.effective_actions();
        assert_eq!(actions[0].name, "first");
        assert_eq!(actions[1].name, "second");
    }

    #[test]
    fn auth_spec_serialises_tagged() {
        let auth = AuthSpec::ApiKey { header: "X-Api-Key".into(), key: "k".into() };
        let json = serde_json::to_value(&auth).unwrap();
        assert_eq!(json["type"], "API_KEY");

        let auth = AuthSpec::Oauth2 {
            token_url: "https://idp.test/token".into(),
            client_id: "c".into(),
            client_secret: "s".into(),
            scope: None,
        };
        let json = serde_json::to_value(&auth).unwrap();
        assert_eq!(json["type"], "OAUTH2");
    }

    #[test]
    fn delivery_mode_round_trips() {
        use std::str::FromStr;
        for mode in [DeliveryMode::Immediate, DeliveryMode::Delayed, DeliveryMode::Recurring] {
            assert_eq!(DeliveryMode::from_str(mode.as_str()).unwrap(), mode);
        }
        assert!(DeliveryMode::Delayed.is_scheduled());
        assert!(!DeliveryMode::Immediate.is_scheduled());
    }

    #[test]
    fn map_function_kebab_case() {
        let f: MapFunction = serde_json::from_str(r#""trim""#).unwrap();
        assert_eq!(f, MapFunction::Trim);
        let f: MapFunction = serde_json::from_str(r#"{"format-date":{"format":"%Y-%m-%d"}}"#).unwrap();
        assert!(matches!(f, MapFunction::FormatDate { .. }));
    }
}
