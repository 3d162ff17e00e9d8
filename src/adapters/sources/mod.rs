//! Ingestion source adapters.
//!
//! One source instance per `(tenant, source)` pair. Each produces a stream
//! of normalised [`crate::domain::models::Event`]s with ack/nack progress
//! tracking; variants are a tagged set, not an inheritance tree.

pub mod factory;
pub mod http_push;
pub mod partitioned_log;
pub mod relational_poll;
pub mod supervisor;

pub use factory::SourceFactory;
pub use http_push::{HttpPushConfig, HttpPushSource};
pub use partitioned_log::{decode_log_message, DecodedMessage, PartitionedLogConfig, PartitionedLogSource};
pub use relational_poll::{RelationalPollConfig, RelationalPollSource};
pub use supervisor::SourceSupervisor;
