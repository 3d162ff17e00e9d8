//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure concerns.

pub mod checkpoint;
pub mod config;
pub mod dlq;
pub mod event;
pub mod execution_log;
pub mod failure;
pub mod lookup;
pub mod org_unit;
pub mod pending_event;
pub mod rule;
pub mod scheduled_delivery;
pub mod source_config;

pub use checkpoint::{position_newer, SourceCheckpoint};
pub use config::{
    DatabaseConfig, GatewayConfig, HttpClientConfig, LoggingConfig, MemoryConfig, SchedulerConfig,
    SecurityConfig, SourcesConfig, WorkerConfig,
};
pub use dlq::DlqEntry;
pub use event::{canonical_json, Event, SourceKind};
pub use execution_log::{
    DeliveryAttempt, Direction, ExecutionLog, LogStatus, ResponseInfo, TriggerType,
};
pub use failure::{DeliveryError, ErrorCategory};
pub use lookup::Lookup;
pub use org_unit::OrgUnit;
pub use pending_event::{PendingEvent, PendingStatus};
pub use rule::{
    AuthSpec, CircuitBreakerPolicy, DeliveryMode, FieldMapping, HttpMethod, IntegrationRule,
    LookupField, LookupSpec, MapFunction, MappingSpec, RateLimitPolicy, RuleScope, ScopePolicy,
    SigningSpec, StaticField, SubAction, TargetSpec, TransformSpec, UnmappedBehavior,
    EVENT_TYPE_WILDCARD,
};
pub use scheduled_delivery::{RecurrencePlan, ScheduleStatus, ScheduledDelivery};
pub use source_config::{ColumnMapping, EventSourceConfig, SourceParams};
