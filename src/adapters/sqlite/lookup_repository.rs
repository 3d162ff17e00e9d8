//! SQLite implementation of the LookupRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Lookup;
use crate::domain::ports::LookupRepository;

#[derive(Clone)]
pub struct SqliteLookupRepository {
    pool: SqlitePool,
}

impl SqliteLookupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct LookupRow {
    id: String,
    tenant: String,
    org_unit: Option<String>,
    lookup_type: String,
    source_code: String,
    target_code: String,
    active: i64,
    created_at: String,
    updated_at: String,
}

fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::SerializationError(format!("Invalid timestamp '{s}': {e}")))
}

impl TryFrom<LookupRow> for Lookup {
    type Error = DomainError;

    fn try_from(row: LookupRow) -> Result<Self, Self::Error> {
        Ok(Lookup {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            tenant: row.tenant,
            org_unit: row.org_unit,
            lookup_type: row.lookup_type,
            source_code: row.source_code,
            target_code: row.target_code,
            active: row.active != 0,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl LookupRepository for SqliteLookupRepository {
    async fn find(
        &self,
        tenant: &str,
        org_unit: Option<&str>,
        lookup_type: &str,
        source_code: &str,
    ) -> DomainResult<Option<Lookup>> {
        // Org-unit-specific rows win over tenant-wide rows.
        let row: Option<LookupRow> = sqlx::query_as(
            r#"SELECT * FROM lookups
               WHERE tenant = ? AND lookup_type = ? AND source_code = ? AND active = 1
                 AND (org_unit = ? OR org_unit IS NULL)
               ORDER BY org_unit IS NULL
               LIMIT 1"#,
        )
        .bind(tenant)
        .bind(lookup_type)
        .bind(source_code)
        .bind(org_unit)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn upsert(&self, lookup: &Lookup) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO lookups (id, tenant, org_unit, lookup_type, source_code, target_code,
               active, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (tenant, ifnull(org_unit, ''), lookup_type, source_code) WHERE active = 1
               DO UPDATE SET target_code = excluded.target_code, updated_at = excluded.updated_at"#,
        )
        .bind(lookup.id.to_string())
        .bind(&lookup.tenant)
        .bind(&lookup.org_unit)
        .bind(&lookup.lookup_type)
        .bind(&lookup.source_code)
        .bind(&lookup.target_code)
        .bind(lookup.active as i64)
        .bind(lookup.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_tenant(&self, tenant: &str) -> DomainResult<Vec<Lookup>> {
        let rows: Vec<LookupRow> = sqlx::query_as(
            "SELECT * FROM lookups WHERE tenant = ? ORDER BY lookup_type, source_code",
        )
        .bind(tenant)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;
    use crate::adapters::sqlite::migrations::Migrator;

    async fn repo() -> SqliteLookupRepository {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run().await.unwrap();
        SqliteLookupRepository::new(pool)
    }

    #[tokio::test]
    async fn org_unit_specific_mapping_wins() {
        let repo = repo().await;
        repo.upsert(&Lookup::new("t-1", "service", "S1", "TENANT-WIDE")).await.unwrap();
        repo.upsert(&Lookup::new("t-1", "service", "S1", "UNIT-SPECIFIC").with_org_unit("ou-1"))
            .await
            .unwrap();

        let found = repo.find("t-1", Some("ou-1"), "service", "S1").await.unwrap().unwrap();
        assert_eq!(found.target_code, "UNIT-SPECIFIC");

        // Other units fall back to the tenant-wide row.
        let found = repo.find("t-1", Some("ou-2"), "service", "S1").await.unwrap().unwrap();
        assert_eq!(found.target_code, "TENANT-WIDE");
    }

    #[tokio::test]
    async fn missing_mapping_returns_none() {
        let repo = repo().await;
        assert!(repo.find("t-1", None, "service", "NOPE").await.unwrap().is_none());
    }
}
