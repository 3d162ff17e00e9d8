//! SQLite store for per-tenant event source configs.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{EventSourceConfig, SourceParams};

/// Repository interface for event source configs.
#[async_trait]
pub trait SourceConfigRepository: Send + Sync {
    async fn upsert(&self, config: &EventSourceConfig) -> DomainResult<()>;

    async fn list_active(&self) -> DomainResult<Vec<EventSourceConfig>>;
}

#[derive(Clone)]
pub struct SqliteSourceConfigRepository {
    pool: SqlitePool,
}

impl SqliteSourceConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SourceConfigRow {
    id: String,
    tenant: String,
    name: String,
    params: String,
    active: i64,
}

impl TryFrom<SourceConfigRow> for EventSourceConfig {
    type Error = DomainError;

    fn try_from(row: SourceConfigRow) -> Result<Self, Self::Error> {
        let params: SourceParams = serde_json::from_str(&row.params)?;
        Ok(EventSourceConfig {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            tenant: row.tenant,
            name: row.name,
            params,
            active: row.active != 0,
        })
    }
}

#[async_trait]
impl SourceConfigRepository for SqliteSourceConfigRepository {
    async fn upsert(&self, config: &EventSourceConfig) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO event_source_configs (id, tenant, name, params, active)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT (id)
               DO UPDATE SET tenant = excluded.tenant, name = excluded.name,
                             params = excluded.params, active = excluded.active"#,
        )
        .bind(config.id.to_string())
        .bind(&config.tenant)
        .bind(&config.name)
        .bind(serde_json::to_string(&config.params)?)
        .bind(config.active as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_active(&self) -> DomainResult<Vec<EventSourceConfig>> {
        let rows: Vec<SourceConfigRow> =
            sqlx::query_as("SELECT * FROM event_source_configs WHERE active = 1 ORDER BY tenant, name")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}
