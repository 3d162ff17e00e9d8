//! Source checkpoint repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{SourceCheckpoint, SourceKind};

/// Repository interface for durable source cursors.
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    async fn get(
        &self,
        source: SourceKind,
        source_name: &str,
        tenant: &str,
    ) -> DomainResult<Option<SourceCheckpoint>>;

    /// Advance the checkpoint. Monotonic: a position not newer than the
    /// stored one is ignored. Returns whether the write was applied.
    async fn advance(&self, checkpoint: &SourceCheckpoint) -> DomainResult<bool>;
}
