//! SQLite implementation of the ScheduledDeliveryRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{RecurrencePlan, ScheduleStatus, ScheduledDelivery};
use crate::domain::ports::{ScheduleFilter, ScheduledDeliveryRepository};

#[derive(Clone)]
pub struct SqliteScheduledDeliveryRepository {
    pool: SqlitePool,
}

impl SqliteScheduledDeliveryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: String,
    rule_id: String,
    tenant: String,
    due_at: String,
    status: String,
    event_id: String,
    event_type: String,
    org_unit: Option<String>,
    payload: String,
    recurrence: Option<String>,
    occurrence: i64,
    created_at: String,
    updated_at: String,
    fired_at: Option<String>,
}

fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::SerializationError(format!("Invalid timestamp '{s}': {e}")))
}

impl TryFrom<ScheduleRow> for ScheduledDelivery {
    type Error = DomainError;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        let recurrence: Option<RecurrencePlan> =
            row.recurrence.as_deref().map(serde_json::from_str).transpose()?;

        Ok(ScheduledDelivery {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            rule_id: Uuid::parse_str(&row.rule_id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            tenant: row.tenant,
            due_at: parse_datetime(&row.due_at)?,
            status: row.status.parse().map_err(DomainError::SerializationError)?,
            event_id: row.event_id,
            event_type: row.event_type,
            org_unit: row.org_unit,
            payload: serde_json::from_str(&row.payload)?,
            recurrence,
            occurrence: row.occurrence as u32,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            fired_at: row.fired_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

#[async_trait]
impl ScheduledDeliveryRepository for SqliteScheduledDeliveryRepository {
    async fn create(&self, delivery: &ScheduledDelivery) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO scheduled_deliveries (id, rule_id, tenant, due_at, status, event_id,
               event_type, org_unit, payload, recurrence, occurrence, created_at, updated_at, fired_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(delivery.id.to_string())
        .bind(delivery.rule_id.to_string())
        .bind(&delivery.tenant)
        .bind(delivery.due_at.to_rfc3339())
        .bind(delivery.status.as_str())
        .bind(&delivery.event_id)
        .bind(&delivery.event_type)
        .bind(&delivery.org_unit)
        .bind(serde_json::to_string(&delivery.payload)?)
        .bind(delivery.recurrence.as_ref().map(serde_json::to_string).transpose()?)
        .bind(delivery.occurrence as i64)
        .bind(delivery.created_at.to_rfc3339())
        .bind(delivery.updated_at.to_rfc3339())
        .bind(delivery.fired_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<ScheduledDelivery>> {
        let row: Option<ScheduleRow> =
            sqlx::query_as("SELECT * FROM scheduled_deliveries WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, filter: ScheduleFilter) -> DomainResult<Vec<ScheduledDelivery>> {
        let mut query = String::from("SELECT * FROM scheduled_deliveries WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(tenant) = &filter.tenant {
            query.push_str(" AND tenant = ?");
            bindings.push(tenant.clone());
        }
        if let Some(rule_id) = &filter.rule_id {
            query.push_str(" AND rule_id = ?");
            bindings.push(rule_id.to_string());
        }
        if let Some(status) = &filter.status {
            query.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }

        query.push_str(" ORDER BY due_at ASC");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_as::<_, ScheduleRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<ScheduleRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        batch: u32,
    ) -> DomainResult<Vec<ScheduledDelivery>> {
        // UPDATE..RETURNING makes the claim atomic: two parallel claimers
        // can never receive the same row.
        let rows: Vec<ScheduleRow> = sqlx::query_as(
            r#"UPDATE scheduled_deliveries
               SET status = 'processing', updated_at = ?
               WHERE id IN (
                   SELECT id FROM scheduled_deliveries
                   WHERE status = 'pending' AND due_at <= ?
                   ORDER BY due_at ASC
                   LIMIT ?
               )
               RETURNING *"#,
        )
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(batch as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn complete(&self, id: Uuid, status: ScheduleStatus) -> DomainResult<()> {
        if !ScheduleStatus::Processing.can_transition_to(status) {
            return Err(DomainError::InvalidStateTransition {
                from: ScheduleStatus::Processing.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        let result = sqlx::query(
            r#"UPDATE scheduled_deliveries
               SET status = ?, updated_at = ?, fired_at = ?
               WHERE id = ? AND status = 'processing'"#,
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ScheduledDeliveryNotFound(id));
        }

        Ok(())
    }

    async fn cancel(&self, id: Uuid) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE scheduled_deliveries SET status = 'cancelled', updated_at = ?
               WHERE id = ? AND status IN ('pending', 'processing')"#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::ScheduledDeliveryNotFound(id));
        }

        Ok(())
    }

    async fn cancel_overdue(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query(
            r#"UPDATE scheduled_deliveries SET status = 'cancelled', updated_at = ?
               WHERE status = 'pending' AND due_at < ?"#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn reset_stuck_processing(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query(
            r#"UPDATE scheduled_deliveries SET status = 'pending', updated_at = ?
               WHERE status = 'processing' AND updated_at < ?"#,
        )
        .bind(Utc::now().to_rfc3339())
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
    use chrono::Duration;
    use serde_json::json;

    async fn repo() -> SqliteScheduledDeliveryRepository {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run().await.unwrap();
        SqliteScheduledDeliveryRepository::new(pool)
    }

    fn delivery(due_at: DateTime<Utc>) -> ScheduledDelivery {
        ScheduledDelivery::new(Uuid::new_v4(), "t-1", "evt-1", "ORDER_CREATED", json!({"a": 1}), due_at)
    }

    #[tokio::test]
    async fn claim_moves_due_rows_to_processing() {
        let repo = repo().await;
        let now = Utc::now();

        let due = delivery(now - Duration::minutes(1));
        let future = delivery(now + Duration::hours(1));
        repo.create(&due).await.unwrap();
        repo.create(&future).await.unwrap();

        let claimed = repo.claim_due(now, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, due.id);
        assert_eq!(claimed[0].status, ScheduleStatus::Processing);

        // A second claim finds nothing.
        assert!(repo.claim_due(now, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_respects_batch_and_due_order() {
        let repo = repo().await;
        let now = Utc::now();

        let older = delivery(now - Duration::minutes(10));
        let newer = delivery(now - Duration::minutes(5));
        repo.create(&newer).await.unwrap();
        repo.create(&older).await.unwrap();

        let claimed = repo.claim_due(now, 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, older.id);
    }

    #[tokio::test]
    async fn complete_writes_terminal_state() {
        let repo = repo().await;
        let d = delivery(Utc::now() - Duration::minutes(1));
        repo.create(&d).await.unwrap();
        repo.claim_due(Utc::now(), 1).await.unwrap();

        repo.complete(d.id, ScheduleStatus::Done).await.unwrap();
        let loaded = repo.get(d.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ScheduleStatus::Done);
        assert!(loaded.fired_at.is_some());
    }

    #[tokio::test]
    async fn complete_rejects_illegal_transition() {
        let repo = repo().await;
        let d = delivery(Utc::now());
        repo.create(&d).await.unwrap();

        let err = repo.complete(d.id, ScheduleStatus::Pending).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn cancel_overdue_only_touches_pending() {
        let repo = repo().await;
        let now = Utc::now();

        let overdue = delivery(now - Duration::hours(48));
        let fresh = delivery(now - Duration::hours(1));
        repo.create(&overdue).await.unwrap();
        repo.create(&fresh).await.unwrap();

        let cancelled = repo.cancel_overdue(now - Duration::hours(24)).await.unwrap();
        assert_eq!(cancelled, 1);

        assert_eq!(repo.get(overdue.id).await.unwrap().unwrap().status, ScheduleStatus::Cancelled);
        assert_eq!(repo.get(fresh.id).await.unwrap().unwrap().status, ScheduleStatus::Pending);
    }

    #[tokio::test]
    async fn stuck_processing_resets_to_pending() {
        let repo = repo().await;
        let d = delivery(Utc::now() - Duration::minutes(1));
        repo.create(&d).await.unwrap();
        repo.claim_due(Utc::now(), 1).await.unwrap();

        let reset = repo
            .reset_stuck_processing(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(reset, 1);
        assert_eq!(repo.get(d.id).await.unwrap().unwrap().status, ScheduleStatus::Pending);
    }
}
