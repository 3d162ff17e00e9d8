//! SQLite implementation of the deduplication seen-set and audit store.

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::DomainResult;
use crate::domain::models::Event;
use crate::domain::ports::{EventAuditRepository, ProcessedEventRepository};

#[derive(Clone)]
pub struct SqliteDedupRepository {
    pool: SqlitePool,
}

impl SqliteDedupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedEventRepository for SqliteDedupRepository {
    async fn insert_if_absent(
        &self,
        fingerprint: &str,
        tenant: &str,
        event_type: &str,
    ) -> DomainResult<bool> {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO processed_events (fingerprint, tenant, event_type, processed_at)
               VALUES (?, ?, ?, ?)"#,
        )
        .bind(fingerprint)
        .bind(tenant)
        .bind(event_type)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM processed_events WHERE processed_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl EventAuditRepository for SqliteDedupRepository {
    async fn record(&self, event: &Event, fingerprint: &str) -> DomainResult<()> {
        // Uniqueness key: (source, offset) when the offset is known,
        // (tenant, fingerprint, minute bucket) otherwise.
        let audit_key = match &event.source_offset {
            Some(offset) => format!("{}:{}:{}", event.source.as_str(), event.source_name, offset),
            None => {
                let bucket = event
                    .received_at
                    .duration_trunc(chrono::Duration::minutes(1))
                    .unwrap_or(event.received_at);
                format!("{}:{}:{}", event.tenant, fingerprint, bucket.timestamp())
            }
        };

        sqlx::query(
            r#"INSERT OR IGNORE INTO event_audit (audit_key, event_id, tenant, org_unit, event_type,
               source, source_name, source_offset, payload, fingerprint, received_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&audit_key)
        .bind(&event.id)
        .bind(&event.tenant)
        .bind(&event.org_unit)
        .bind(&event.event_type)
        .bind(event.source.as_str())
        .bind(&event.source_name)
        .bind(&event.source_offset)
        .bind(serde_json::to_string(&event.payload)?)
        .bind(fingerprint)
        .bind(event.received_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query("DELETE FROM event_audit WHERE received_at < ?")
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
    use crate::domain::models::SourceKind;
    use serde_json::json;

    async fn repo() -> SqliteDedupRepository {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run().await.unwrap();
        SqliteDedupRepository::new(pool)
    }

    #[tokio::test]
    async fn second_insert_is_a_duplicate() {
        let repo = repo().await;
        assert!(repo.insert_if_absent("fp-1", "t-1", "ORDER_CREATED").await.unwrap());
        assert!(!repo.insert_if_absent("fp-1", "t-1", "ORDER_CREATED").await.unwrap());
        assert!(repo.insert_if_absent("fp-2", "t-1", "ORDER_CREATED").await.unwrap());
    }

    #[tokio::test]
    async fn purge_reopens_the_window() {
        let repo = repo().await;
        assert!(repo.insert_if_absent("fp-1", "t-1", "ORDER_CREATED").await.unwrap());

        let purged = ProcessedEventRepository::purge_older_than(
            &repo,
            Utc::now() + chrono::Duration::seconds(1),
        )
        .await
        .unwrap();
        assert_eq!(purged, 1);

        assert!(repo.insert_if_absent("fp-1", "t-1", "ORDER_CREATED").await.unwrap());
    }

    #[tokio::test]
    async fn audit_record_is_idempotent_per_offset() {
        let repo = repo().await;
        let event = Event::new("t-1", "ORDER_CREATED", json!({"a": 1}), SourceKind::RelationalPoll, "orders")
            .with_source_offset("42");

        repo.record(&event, &event.fingerprint()).await.unwrap();
        repo.record(&event, &event.fingerprint()).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM event_audit")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
