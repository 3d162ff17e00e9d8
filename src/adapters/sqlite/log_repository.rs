//! SQLite implementation of the ExecutionLogRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{DeliveryAttempt, DeliveryError, ExecutionLog, LogStatus, ResponseInfo};
use crate::domain::ports::{ExecutionLogRepository, LogFilter};

#[derive(Clone)]
pub struct SqliteExecutionLogRepository {
    pool: SqlitePool,
}

impl SqliteExecutionLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: String,
    tenant: String,
    rule_id: String,
    action: Option<String>,
    trace_id: String,
    correlation_id: String,
    event_id: String,
    event_type: String,
    org_unit: Option<String>,
    direction: String,
    trigger_type: String,
    status: String,
    attempt_count: i64,
    last_attempt_at: Option<String>,
    should_retry: i64,
    original_payload: String,
    request_payload: Option<String>,
    response: Option<String>,
    error: Option<String>,
    duration_ms: Option<i64>,
    created_at: String,
}

fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::SerializationError(format!("Invalid timestamp '{s}': {e}")))
}

impl TryFrom<LogRow> for ExecutionLog {
    type Error = DomainError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        let response: Option<ResponseInfo> =
            row.response.as_deref().map(serde_json::from_str).transpose()?;
        let error: Option<DeliveryError> =
            row.error.as_deref().map(serde_json::from_str).transpose()?;

        Ok(ExecutionLog {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            tenant: row.tenant,
            rule_id: Uuid::parse_str(&row.rule_id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            action: row.action,
            trace_id: row.trace_id,
            correlation_id: row.correlation_id,
            event_id: row.event_id,
            event_type: row.event_type,
            org_unit: row.org_unit,
            direction: row.direction.parse().map_err(DomainError::SerializationError)?,
            trigger: row.trigger_type.parse().map_err(DomainError::SerializationError)?,
            status: row.status.parse().map_err(DomainError::SerializationError)?,
            attempt_count: row.attempt_count as u32,
            last_attempt_at: row.last_attempt_at.as_deref().map(parse_datetime).transpose()?,
            should_retry: row.should_retry != 0,
            original_payload: serde_json::from_str(&row.original_payload)?,
            request_payload: row.request_payload.as_deref().map(serde_json::from_str).transpose()?,
            response,
            error,
            duration_ms: row.duration_ms.map(|d| d as u64),
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: String,
    log_id: String,
    attempt: i64,
    status: Option<i64>,
    error_code: Option<String>,
    duration_ms: i64,
    attempted_at: String,
}

impl TryFrom<AttemptRow> for DeliveryAttempt {
    type Error = DomainError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        Ok(DeliveryAttempt {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            log_id: Uuid::parse_str(&row.log_id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            attempt: row.attempt as u32,
            status: row.status.map(|s| s as u16),
            error_code: row.error_code,
            duration_ms: row.duration_ms as u64,
            attempted_at: parse_datetime(&row.attempted_at)?,
        })
    }
}

#[async_trait]
impl ExecutionLogRepository for SqliteExecutionLogRepository {
    async fn create(&self, log: &ExecutionLog) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO execution_logs (id, tenant, rule_id, action, trace_id, correlation_id,
               event_id, event_type, org_unit, direction, trigger_type, status, attempt_count,
               last_attempt_at, should_retry, original_payload, request_payload, response, error,
               duration_ms, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(log.id.to_string())
        .bind(&log.tenant)
        .bind(log.rule_id.to_string())
        .bind(&log.action)
        .bind(&log.trace_id)
        .bind(&log.correlation_id)
        .bind(&log.event_id)
        .bind(&log.event_type)
        .bind(&log.org_unit)
        .bind(log.direction.as_str())
        .bind(log.trigger.as_str())
        .bind(log.status.as_str())
        .bind(log.attempt_count as i64)
        .bind(log.last_attempt_at.map(|t| t.to_rfc3339()))
        .bind(log.should_retry as i64)
        .bind(serde_json::to_string(&log.original_payload)?)
        .bind(log.request_payload.as_ref().map(serde_json::to_string).transpose()?)
        .bind(log.response.as_ref().map(serde_json::to_string).transpose()?)
        .bind(log.error.as_ref().map(serde_json::to_string).transpose()?)
        .bind(log.duration_ms.map(|d| d as i64))
        .bind(log.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<ExecutionLog>> {
        let row: Option<LogRow> = sqlx::query_as("SELECT * FROM execution_logs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, log: &ExecutionLog) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE execution_logs SET org_unit = ?, trigger_type = ?, status = ?,
               attempt_count = ?, last_attempt_at = ?, should_retry = ?, request_payload = ?,
               response = ?, error = ?, duration_ms = ?
               WHERE id = ?"#,
        )
        .bind(&log.org_unit)
        .bind(log.trigger.as_str())
        .bind(log.status.as_str())
        .bind(log.attempt_count as i64)
        .bind(log.last_attempt_at.map(|t| t.to_rfc3339()))
        .bind(log.should_retry as i64)
        .bind(log.request_payload.as_ref().map(serde_json::to_string).transpose()?)
        .bind(log.response.as_ref().map(serde_json::to_string).transpose()?)
        .bind(log.error.as_ref().map(serde_json::to_string).transpose()?)
        .bind(log.duration_ms.map(|d| d as i64))
        .bind(log.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::LogNotFound(log.id));
        }

        Ok(())
    }

    async fn list(&self, filter: LogFilter) -> DomainResult<Vec<ExecutionLog>> {
        let mut query = String::from("SELECT * FROM execution_logs WHERE 1=1");
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
        if let Some(event_type) = &filter.event_type {
            query.push_str(" AND event_type = ?");
            bindings.push(event_type.clone());
        }
        if let Some(since) = &filter.since {
            query.push_str(" AND created_at >= ?");
            bindings.push(since.to_rfc3339());
        }
        if let Some(until) = &filter.until {
            query.push_str(" AND created_at < ?");
            bindings.push(until.to_rfc3339());
        }

        query.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_as::<_, LogRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<LogRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_retry_candidates(&self, limit: u32) -> DomainResult<Vec<ExecutionLog>> {
        let rows: Vec<LogRow> = sqlx::query_as(
            r#"SELECT * FROM execution_logs
               WHERE status IN ('FAILED', 'RETRYING') AND should_retry = 1
               ORDER BY last_attempt_at ASC
               LIMIT ?"#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn record_attempt(&self, attempt: &DeliveryAttempt) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO delivery_attempts (id, log_id, attempt, status, error_code, duration_ms, attempted_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(attempt.id.to_string())
        .bind(attempt.log_id.to_string())
        .bind(attempt.attempt as i64)
        .bind(attempt.status.map(|s| s as i64))
        .bind(&attempt.error_code)
        .bind(attempt.duration_ms as i64)
        .bind(attempt.attempted_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn attempts_for_log(&self, log_id: Uuid) -> DomainResult<Vec<DeliveryAttempt>> {
        let rows: Vec<AttemptRow> = sqlx::query_as(
            "SELECT * FROM delivery_attempts WHERE log_id = ? ORDER BY attempt ASC",
        )
        .bind(log_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn reset_stuck_retrying(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query(
            r#"UPDATE execution_logs SET status = 'FAILED'
               WHERE status = 'RETRYING' AND last_attempt_at < ?"#,
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> DomainResult<u64> {
        sqlx::query(
            "DELETE FROM delivery_attempts WHERE log_id IN (SELECT id FROM execution_logs WHERE created_at < ?)",
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let result = sqlx::query("DELETE FROM execution_logs WHERE created_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
