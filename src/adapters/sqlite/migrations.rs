//! Embedded schema migrations for the gateway store.
//!
//! Migrations are compiled into the binary and applied in version order
//! against a `schema_migrations` ledger table. Each step is idempotent at
//! the SQL level (`CREATE TABLE IF NOT EXISTS`), so a partially applied
//! step can be re-run after a crash.

use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration {version} ({name}) failed: {source}")]
    Apply {
        version: i64,
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("Could not prepare the schema_migrations ledger: {0}")]
    Ledger(#[source] sqlx::Error),
    #[error("Could not read the schema version: {0}")]
    Version(#[source] sqlx::Error),
}

/// One embedded migration step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Every migration shipped with the binary, oldest first.
pub const EMBEDDED_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial schema",
        sql: include_str!("../../../migrations/001_initial_schema.sql"),
    },
    Migration {
        version: 2,
        name: "scheduling",
        sql: include_str!("../../../migrations/002_scheduling.sql"),
    },
    Migration {
        version: 3,
        name: "lookups and org units",
        sql: include_str!("../../../migrations/003_lookups_org_units.sql"),
    },
];

pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply every embedded migration newer than the stored version.
    /// Returns how many steps were applied.
    pub async fn run(&self) -> Result<usize, MigrationError> {
        self.ensure_ledger().await?;
        let current = self.current_version().await?;

        let mut applied = 0;
        for migration in EMBEDDED_MIGRATIONS.iter().filter(|m| m.version > current) {
            self.apply(migration).await?;
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applied schema migration"
            );
            applied += 1;
        }

        Ok(applied)
    }

    /// Highest applied version, 0 on a fresh store.
    pub async fn current_version(&self) -> Result<i64, MigrationError> {
        let (version,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await
                .map_err(MigrationError::Version)?;
        Ok(version)
    }

    async fn ensure_ledger(&self) -> Result<(), MigrationError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(MigrationError::Ledger)?;
        Ok(())
    }

    async fn apply(&self, migration: &Migration) -> Result<(), MigrationError> {
        let fail = |source| MigrationError::Apply {
            version: migration.version,
            name: migration.name,
            source,
        };

        sqlx::raw_sql(migration.sql).execute(&self.pool).await.map_err(fail)?;

        sqlx::query("INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&self.pool)
            .await
            .map_err(fail)?;

        Ok(())
    }
}
