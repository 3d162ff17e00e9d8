//! SQLite implementation of the PendingEventRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{PendingEvent, PendingStatus};
use crate::domain::ports::PendingEventRepository;

#[derive(Clone)]
pub struct SqlitePendingEventRepository {
    pool: SqlitePool,
}

impl SqlitePendingEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PendingRow {
    id: String,
    tenant: String,
    org_unit: Option<String>,
    event_type: String,
    payload: String,
    status: String,
    created_at: String,
    updated_at: String,
}

fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::SerializationError(format!("Invalid timestamp '{s}': {e}")))
}

impl TryFrom<PendingRow> for PendingEvent {
    type Error = DomainError;

    fn try_from(row: PendingRow) -> Result<Self, Self::Error> {
        Ok(PendingEvent {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            tenant: row.tenant,
            org_unit: row.org_unit,
            event_type: row.event_type,
            payload: serde_json::from_str(&row.payload)?,
            status: row.status.parse().map_err(DomainError::SerializationError)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl PendingEventRepository for SqlitePendingEventRepository {
    async fn create(&self, event: &PendingEvent) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO pending_events (id, tenant, org_unit, event_type, payload, status,
               created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.id.to_string())
        .bind(&event.tenant)
        .bind(&event.org_unit)
        .bind(&event.event_type)
        .bind(serde_json::to_string(&event.payload)?)
        .bind(event.status.as_str())
        .bind(event.created_at.to_rfc3339())
        .bind(event.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch_new(&self, batch: u32) -> DomainResult<Vec<PendingEvent>> {
        let rows: Vec<PendingRow> = sqlx::query_as(
            "SELECT * FROM pending_events WHERE status = 'new' ORDER BY created_at ASC LIMIT ?",
        )
        .bind(batch as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn set_status(&self, id: Uuid, status: PendingStatus) -> DomainResult<()> {
        let result = sqlx::query("UPDATE pending_events SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::SourceNotFound(format!("pending event {id}")));
        }

        Ok(())
    }

    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query(
            "DELETE FROM pending_events WHERE status IN ('done', 'failed') AND updated_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;
    use crate::adapters::sqlite::migrations::Migrator;
    use serde_json::json;

    async fn repo() -> SqlitePendingEventRepository {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run().await.unwrap();
        SqlitePendingEventRepository::new(pool)
    }

    #[tokio::test]
    async fn fetch_new_returns_oldest_first() {
        let repo = repo().await;
        let a = PendingEvent::new("t-1", "ORDER_CREATED", json!({"n": 1}));
        let mut b = PendingEvent::new("t-1", "ORDER_CREATED", json!({"n": 2}));
        b.created_at = a.created_at + chrono::Duration::seconds(1);
        repo.create(&a).await.unwrap();
        repo.create(&b).await.unwrap();

        let fetched = repo.fetch_new(10).await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].id, a.id);
    }

    #[tokio::test]
    async fn terminal_rows_leave_the_queue_and_purge() {
        let repo = repo().await;
        let e = PendingEvent::new("t-1", "ORDER_CREATED", json!({}));
        repo.create(&e).await.unwrap();

        repo.set_status(e.id, PendingStatus::Done).await.unwrap();
        assert!(repo.fetch_new(10).await.unwrap().is_empty());

        let purged = repo
            .purge_terminal_older_than(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
    }
}
