//! SQLite adapters for the gateway store.

pub mod checkpoint_repository;
pub mod connection;
pub mod dedup_repository;
pub mod dlq_repository;
pub mod log_repository;
pub mod lookup_repository;
pub mod migrations;
pub mod org_unit_repository;
pub mod pending_event_repository;
pub mod rule_repository;
pub mod schedule_repository;
pub mod source_config_repository;

pub use checkpoint_repository::SqliteCheckpointRepository;
pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError};
pub use dedup_repository::SqliteDedupRepository;
pub use dlq_repository::SqliteDlqRepository;
pub use log_repository::SqliteExecutionLogRepository;
pub use lookup_repository::SqliteLookupRepository;
pub use migrations::{Migration, MigrationError, Migrator, EMBEDDED_MIGRATIONS};
pub use org_unit_repository::SqliteOrgUnitRepository;
pub use pending_event_repository::SqlitePendingEventRepository;
pub use rule_repository::SqliteRuleRepository;
pub use schedule_repository::SqliteScheduledDeliveryRepository;
pub use source_config_repository::{SourceConfigRepository, SqliteSourceConfigRepository};
