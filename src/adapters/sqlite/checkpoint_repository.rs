//! SQLite implementation of the CheckpointRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{position_newer, SourceCheckpoint, SourceKind};
use crate::domain::ports::CheckpointRepository;

#[derive(Clone)]
pub struct SqliteCheckpointRepository {
    pool: SqlitePool,
}

impl SqliteCheckpointRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    source: String,
    source_name: String,
    tenant: String,
    position: String,
    updated_at: String,
}

impl TryFrom<CheckpointRow> for SourceCheckpoint {
    type Error = DomainError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        Ok(SourceCheckpoint {
            source: row.source.parse().map_err(DomainError::SerializationError)?,
            source_name: row.source_name,
            tenant: row.tenant,
            position: row.position,
            updated_at: DateTime::parse_from_rfc3339(&row.updated_at)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?
                .with_timezone(&Utc),
        })
    }
}

#[async_trait]
impl CheckpointRepository for SqliteCheckpointRepository {
    async fn get(
        &self,
        source: SourceKind,
        source_name: &str,
        tenant: &str,
    ) -> DomainResult<Option<SourceCheckpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            "SELECT * FROM source_checkpoints WHERE source = ? AND source_name = ? AND tenant = ?",
        )
        .bind(source.as_str())
        .bind(source_name)
        .bind(tenant)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn advance(&self, checkpoint: &SourceCheckpoint) -> DomainResult<bool> {
        let current = self
            .get(checkpoint.source, &checkpoint.source_name, &checkpoint.tenant)
            .await?;

        if let Some(current) = &current {
            if !position_newer(&checkpoint.position, &current.position) {
                return Ok(false);
            }
        }

        sqlx::query(
            r#"INSERT INTO source_checkpoints (source, source_name, tenant, position, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT (source, source_name, tenant)
               DO UPDATE SET position = excluded.position, updated_at = excluded.updated_at"#,
        )
        .bind(checkpoint.source.as_str())
        .bind(&checkpoint.source_name)
        .bind(&checkpoint.tenant)
        .bind(&checkpoint.position)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(true)
    }
}
