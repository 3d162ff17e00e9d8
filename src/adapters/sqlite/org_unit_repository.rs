//! SQLite implementation of the OrgUnitRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::errors::DomainResult;
use crate::domain::models::OrgUnit;
use crate::domain::ports::OrgUnitRepository;

#[derive(Clone)]
pub struct SqliteOrgUnitRepository {
    pool: SqlitePool,
}

impl SqliteOrgUnitRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct OrgUnitRow {
    rid: String,
    tenant: String,
    parent_rid: Option<String>,
    name: String,
}

impl From<OrgUnitRow> for OrgUnit {
    fn from(row: OrgUnitRow) -> Self {
        OrgUnit {
            rid: row.rid,
            tenant: row.tenant,
            parent_rid: row.parent_rid,
            name: row.name,
        }
    }
}

#[async_trait]
impl OrgUnitRepository for SqliteOrgUnitRepository {
    async fn get(&self, tenant: &str, rid: &str) -> DomainResult<Option<OrgUnit>> {
        let row: Option<OrgUnitRow> =
            sqlx::query_as("SELECT * FROM org_units WHERE tenant = ? AND rid = ?")
                .bind(tenant)
                .bind(rid)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Into::into))
    }

    async fn upsert(&self, unit: &OrgUnit) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO org_units (rid, tenant, parent_rid, name)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (tenant, rid)
               DO UPDATE SET parent_rid = excluded.parent_rid, name = excluded.name"#,
        )
        .bind(&unit.rid)
        .bind(&unit.tenant)
        .bind(&unit.parent_rid)
        .bind(&unit.name)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn descendants(&self, tenant: &str, rid: &str) -> DomainResult<Vec<String>> {
        // Recursive walk over parent_rid pointers.
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"WITH RECURSIVE descendants(rid) AS (
                   SELECT rid FROM org_units WHERE tenant = ?1 AND parent_rid = ?2
                   UNION ALL
                   SELECT o.rid FROM org_units o
                   JOIN descendants d ON o.parent_rid = d.rid
                   WHERE o.tenant = ?1
               )
               SELECT rid FROM descendants"#,
        )
        .bind(tenant)
        .bind(rid)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(rid,)| rid).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;
    use crate::adapters::sqlite::migrations::Migrator;

    async fn repo() -> SqliteOrgUnitRepository {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run().await.unwrap();
        SqliteOrgUnitRepository::new(pool)
    }

    #[tokio::test]
    async fn descendants_walks_the_whole_subtree() {
        let repo = repo().await;
        repo.upsert(&OrgUnit::new("root", "t-1", "Root")).await.unwrap();
        repo.upsert(&OrgUnit::new("a", "t-1", "A").with_parent("root")).await.unwrap();
        repo.upsert(&OrgUnit::new("a1", "t-1", "A1").with_parent("a")).await.unwrap();
        repo.upsert(&OrgUnit::new("b", "t-1", "B").with_parent("root")).await.unwrap();
        // Different tenant, same structure.
        repo.upsert(&OrgUnit::new("x", "t-2", "X").with_parent("root")).await.unwrap();

        let mut ds = repo.descendants("t-1", "root").await.unwrap();
        ds.sort();
        assert_eq!(ds, vec!["a", "a1", "b"]);

        let ds = repo.descendants("t-1", "a1").await.unwrap();
        assert!(ds.is_empty());
    }
}
