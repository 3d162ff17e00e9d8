//! Builds event sources from per-tenant source configs.

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{EventSourceConfig, SourceParams, SourcesConfig};
use crate::domain::ports::{CheckpointRepository, EventSource, PendingEventRepository};

use super::http_push::{HttpPushConfig, HttpPushSource};
use super::partitioned_log::{PartitionedLogConfig, PartitionedLogSource};
use super::relational_poll::{RelationalPollConfig, RelationalPollSource};

/// Shared dependencies handed to every constructed source.
pub struct SourceFactory {
    checkpoints: Arc<dyn CheckpointRepository>,
    pending_events: Arc<dyn PendingEventRepository>,
    sources_config: SourcesConfig,
}

impl SourceFactory {
    pub fn new(
        checkpoints: Arc<dyn CheckpointRepository>,
        pending_events: Arc<dyn PendingEventRepository>,
        sources_config: SourcesConfig,
    ) -> Self {
        Self { checkpoints, pending_events, sources_config }
    }

    /// Construct one event source from its config.
    pub async fn build(&self, config: &EventSourceConfig) -> DomainResult<Arc<dyn EventSource>> {
        let drain_timeout = Duration::from_millis(self.sources_config.drain_timeout_ms);

        match &config.params {
            SourceParams::RelationalPoll {
                connection_url,
                table,
                columns,
                event_type_filter,
                org_unit_filter,
                poll_interval_ms,
                batch_size,
            } => {
                let source_pool = SqlitePoolOptions::new()
                    .max_connections(2)
                    .connect(connection_url)
                    .await
                    .map_err(|e| {
                        DomainError::SourceError(format!(
                            "Source database connect failed for '{}': {e}",
                            config.name
                        ))
                    })?;

                Ok(Arc::new(RelationalPollSource::new(
                    config.name.clone(),
                    config.tenant.clone(),
                    RelationalPollConfig {
                        table: table.clone(),
                        columns: columns.clone(),
                        event_type_filter: event_type_filter.clone(),
                        org_unit_filter: org_unit_filter.clone(),
                        poll_interval: Duration::from_millis(*poll_interval_ms),
                        batch_size: *batch_size,
                        advance_on_executor_error: self.sources_config.advance_on_executor_error,
                        drain_timeout,
                    },
                    source_pool,
                    Arc::clone(&self.checkpoints),
                )))
            }
            SourceParams::PartitionedLog { brokers, topic, group_prefix } => {
                Ok(Arc::new(PartitionedLogSource::new(
                    config.name.clone(),
                    config.tenant.clone(),
                    PartitionedLogConfig {
                        brokers: brokers.clone(),
                        topic: topic.clone(),
                        group_prefix: group_prefix.clone(),
                        drain_timeout,
                    },
                    Arc::clone(&self.checkpoints),
                )))
            }
            SourceParams::HttpPush { poll_interval_ms, batch_size } => {
                Ok(Arc::new(HttpPushSource::new(
                    config.name.clone(),
                    config.tenant.clone(),
                    HttpPushConfig {
                        poll_interval: Duration::from_millis(*poll_interval_ms),
                        batch_size: *batch_size,
                        drain_timeout,
                    },
                    Arc::clone(&self.pending_events),
                )))
            }
        }
    }

    /// Construct every active source.
    pub async fn build_all(
        &self,
        configs: &[EventSourceConfig],
    ) -> DomainResult<Vec<Arc<dyn EventSource>>> {
        let mut sources = Vec::new();
        for config in configs.iter().filter(|c| c.active) {
            sources.push(self.build(config).await?);
        }
        Ok(sources)
    }
}
