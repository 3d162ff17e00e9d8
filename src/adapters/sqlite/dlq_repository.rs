//! SQLite implementation of the DlqRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::DlqEntry;
use crate::domain::ports::{DlqFilter, DlqRepository};

#[derive(Clone)]
pub struct SqliteDlqRepository {
    pool: SqlitePool,
}

impl SqliteDlqRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DlqRow {
    id: String,
    log_id: String,
    rule_id: String,
    tenant: String,
    category: String,
    error_code: String,
    error_message: String,
    retry_count: i64,
    next_retry_at: Option<String>,
    created_at: String,
    resolved_at: Option<String>,
}

fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::SerializationError(format!("Invalid timestamp '{s}': {e}")))
}

impl TryFrom<DlqRow> for DlqEntry {
    type Error = DomainError;

    fn try_from(row: DlqRow) -> Result<Self, Self::Error> {
        Ok(DlqEntry {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            log_id: Uuid::parse_str(&row.log_id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            rule_id: Uuid::parse_str(&row.rule_id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            tenant: row.tenant,
            category: row.category.parse().map_err(DomainError::SerializationError)?,
            error_code: row.error_code,
            error_message: row.error_message,
            retry_count: row.retry_count as u32,
            next_retry_at: row.next_retry_at.as_deref().map(parse_datetime).transpose()?,
            created_at: parse_datetime(&row.created_at)?,
            resolved_at: row.resolved_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

#[async_trait]
impl DlqRepository for SqliteDlqRepository {
    async fn create(&self, entry: &DlqEntry) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO failed_deliveries (id, log_id, rule_id, tenant, category, error_code,
               error_message, retry_count, next_retry_at, created_at, resolved_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.id.to_string())
        .bind(entry.log_id.to_string())
        .bind(entry.rule_id.to_string())
        .bind(&entry.tenant)
        .bind(entry.category.as_str())
        .bind(&entry.error_code)
        .bind(&entry.error_message)
        .bind(entry.retry_count as i64)
        .bind(entry.next_retry_at.map(|t| t.to_rfc3339()))
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.resolved_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<DlqEntry>> {
        let row: Option<DlqRow> = sqlx::query_as("SELECT * FROM failed_deliveries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_log(&self, log_id: Uuid) -> DomainResult<Option<DlqEntry>> {
        let row: Option<DlqRow> = sqlx::query_as(
            "SELECT * FROM failed_deliveries WHERE log_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(log_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, filter: DlqFilter) -> DomainResult<Vec<DlqEntry>> {
        let mut query = String::from("SELECT * FROM failed_deliveries WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(tenant) = &filter.tenant {
            query.push_str(" AND tenant = ?");
            bindings.push(tenant.clone());
        }
        if let Some(rule_id) = &filter.rule_id {
            query.push_str(" AND rule_id = ?");
            bindings.push(rule_id.to_string());
        }
        if filter.unresolved_only {
            query.push_str(" AND resolved_at IS NULL");
        }

        query.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_as::<_, DlqRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<DlqRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn resolve(&self, id: Uuid) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE failed_deliveries SET resolved_at = ? WHERE id = ? AND resolved_at IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::DlqEntryNotFound(id));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;
    use crate::adapters::sqlite::migrations::Migrator;
    use crate::domain::models::ErrorCategory;

    async fn repo() -> SqliteDlqRepository {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run().await.unwrap();
        SqliteDlqRepository::new(pool)
    }

    fn entry(tenant: &str) -> DlqEntry {
        DlqEntry::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            tenant,
            ErrorCategory::Transient,
            "TIMEOUT",
            "timed out",
            4,
        )
    }

    #[tokio::test]
    async fn create_get_resolve_round_trip() {
        let repo = repo().await;
        let e = entry("t-1");
        repo.create(&e).await.unwrap();

        let loaded = repo.get(e.id).await.unwrap().unwrap();
        assert_eq!(loaded.category, ErrorCategory::Transient);
        assert!(!loaded.is_resolved());

        repo.resolve(e.id).await.unwrap();
        assert!(repo.get(e.id).await.unwrap().unwrap().is_resolved());

        // Resolving twice fails.
        assert!(repo.resolve(e.id).await.is_err());
    }

    #[tokio::test]
    async fn unresolved_filter() {
        let repo = repo().await;
        let a = entry("t-1");
        let b = entry("t-1");
        repo.create(&a).await.unwrap();
        repo.create(&b).await.unwrap();
        repo.resolve(a.id).await.unwrap();

        let unresolved = repo
            .list(DlqFilter { tenant: Some("t-1".into()), unresolved_only: true, ..Default::default() })
            .await
            .unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].id, b.id);
    }
}
