//! Domain ports (interfaces) for the fluxgate delivery plane.

pub mod checkpoint_repository;
pub mod dedup_repository;
pub mod dlq_repository;
pub mod event_source;
pub mod log_repository;
pub mod lookup_repository;
pub mod org_unit_repository;
pub mod pending_event_repository;
pub mod rule_repository;
pub mod schedule_repository;

pub use checkpoint_repository::CheckpointRepository;
pub use dedup_repository::{EventAuditRepository, ProcessedEventRepository};
pub use dlq_repository::{DlqFilter, DlqRepository};
pub use event_source::{AckContext, AckDecision, EventHandler, EventSource};
pub use log_repository::{ExecutionLogRepository, LogFilter};
pub use lookup_repository::LookupRepository;
pub use org_unit_repository::OrgUnitRepository;
pub use pending_event_repository::PendingEventRepository;
pub use rule_repository::{RuleFilter, RuleRepository};
pub use schedule_repository::{ScheduleFilter, ScheduledDeliveryRepository};
