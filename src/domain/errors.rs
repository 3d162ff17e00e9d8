//! Domain errors for the fluxgate delivery plane.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur across the gateway.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Rule not found: {0}")]
    RuleNotFound(Uuid),

    #[error("Execution log not found: {0}")]
    LogNotFound(Uuid),

    #[error("Scheduled delivery not found: {0}")]
    ScheduledDeliveryNotFound(Uuid),

    #[error("DLQ entry not found: {0}")]
    DlqEntryNotFound(Uuid),

    #[error("Event source not found: {0}")]
    SourceNotFound(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Source error: {0}")]
    SourceError(String),

    #[error("Shutting down")]
    ShuttingDown,
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
