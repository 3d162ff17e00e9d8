//! SQLite implementation of the RuleRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AuthSpec, CircuitBreakerPolicy, DeliveryMode, IntegrationRule, LookupSpec, RateLimitPolicy,
    RuleScope, SigningSpec, SubAction, TargetSpec, TransformSpec,
};
use crate::domain::ports::{RuleFilter, RuleRepository};

#[derive(Clone)]
pub struct SqliteRuleRepository {
    pool: SqlitePool,
}

impl SqliteRuleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: String,
    tenant: String,
    name: String,
    event_type: String,
    scope: String,
    target: String,
    auth: String,
    timeout_ms: i64,
    retry_count: i64,
    retry_backoff_ms: i64,
    transform: String,
    lookup: Option<String>,
    actions: String,
    action_delay_ms: i64,
    parallel_actions: i64,
    delivery_mode: String,
    schedule_script: Option<String>,
    active: i64,
    deleted_at: Option<String>,
    priority: i64,
    rate_limit: Option<String>,
    circuit_breaker: String,
    signing: Option<String>,
    created_at: String,
    updated_at: String,
}

fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::SerializationError(format!("Invalid timestamp '{s}': {e}")))
}

impl TryFrom<RuleRow> for IntegrationRule {
    type Error = DomainError;

    fn try_from(row: RuleRow) -> Result<Self, Self::Error> {
        let scope: RuleScope = serde_json::from_str(&row.scope)?;
        let target: TargetSpec = serde_json::from_str(&row.target)?;
        let auth: AuthSpec = serde_json::from_str(&row.auth)?;
        let transform: TransformSpec = serde_json::from_str(&row.transform)?;
        let lookup: Option<LookupSpec> = row.lookup.as_deref().map(serde_json::from_str).transpose()?;
        let actions: Vec<SubAction> = serde_json::from_str(&row.actions)?;
        let rate_limit: Option<RateLimitPolicy> =
            row.rate_limit.as_deref().map(serde_json::from_str).transpose()?;
        let circuit_breaker: CircuitBreakerPolicy = serde_json::from_str(&row.circuit_breaker)?;
        let signing: Option<SigningSpec> = row.signing.as_deref().map(serde_json::from_str).transpose()?;

        let delivery_mode: DeliveryMode = row
            .delivery_mode
            .parse()
            .map_err(DomainError::SerializationError)?;

        Ok(IntegrationRule {
            id: Uuid::parse_str(&row.id)
                .map_err(|e| DomainError::SerializationError(e.to_string()))?,
            tenant: row.tenant,
            name: row.name,
            event_type: row.event_type,
            scope,
            target,
            auth,
            timeout_ms: row.timeout_ms as u64,
            retry_count: row.retry_count as u32,
            retry_backoff_ms: row.retry_backoff_ms as u64,
            transform,
            lookup,
            actions,
            action_delay_ms: row.action_delay_ms as u64,
            parallel_actions: row.parallel_actions != 0,
            delivery_mode,
            schedule_script: row.schedule_script,
            active: row.active != 0,
            deleted_at: row.deleted_at.as_deref().map(parse_datetime).transpose()?,
            priority: row.priority as i32,
            rate_limit,
            circuit_breaker,
            signing,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl RuleRepository for SqliteRuleRepository {
    async fn create(&self, rule: &IntegrationRule) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO integration_rules (id, tenant, name, event_type, scope, target, auth,
               timeout_ms, retry_count, retry_backoff_ms, transform, lookup, actions,
               action_delay_ms, parallel_actions, delivery_mode, schedule_script, active,
               deleted_at, priority, rate_limit, circuit_breaker, signing, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(rule.id.to_string())
        .bind(&rule.tenant)
        .bind(&rule.name)
        .bind(&rule.event_type)
        .bind(serde_json::to_string(&rule.scope)?)
        .bind(serde_json::to_string(&rule.target)?)
        .bind(serde_json::to_string(&rule.auth)?)
        .bind(rule.timeout_ms as i64)
        .bind(rule.retry_count as i64)
        .bind(rule.retry_backoff_ms as i64)
        .bind(serde_json::to_string(&rule.transform)?)
        .bind(rule.lookup.as_ref().map(serde_json::to_string).transpose()?)
        .bind(serde_json::to_string(&rule.actions)?)
        .bind(rule.action_delay_ms as i64)
        .bind(rule.parallel_actions as i64)
        .bind(rule.delivery_mode.as_str())
        .bind(&rule.schedule_script)
        .bind(rule.active as i64)
        .bind(rule.deleted_at.map(|t| t.to_rfc3339()))
        .bind(rule.priority as i64)
        .bind(rule.rate_limit.as_ref().map(serde_json::to_string).transpose()?)
        .bind(serde_json::to_string(&rule.circuit_breaker)?)
        .bind(rule.signing.as_ref().map(serde_json::to_string).transpose()?)
        .bind(rule.created_at.to_rfc3339())
        .bind(rule.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<IntegrationRule>> {
        let row: Option<RuleRow> = sqlx::query_as("SELECT * FROM integration_rules WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, rule: &IntegrationRule) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE integration_rules SET tenant = ?, name = ?, event_type = ?, scope = ?,
               target = ?, auth = ?, timeout_ms = ?, retry_count = ?, retry_backoff_ms = ?,
               transform = ?, lookup = ?, actions = ?, action_delay_ms = ?, parallel_actions = ?,
               delivery_mode = ?, schedule_script = ?, active = ?, deleted_at = ?, priority = ?,
               rate_limit = ?, circuit_breaker = ?, signing = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&rule.tenant)
        .bind(&rule.name)
        .bind(&rule.event_type)
        .bind(serde_json::to_string(&rule.scope)?)
        .bind(serde_json::to_string(&rule.target)?)
        .bind(serde_json::to_string(&rule.auth)?)
        .bind(rule.timeout_ms as i64)
        .bind(rule.retry_count as i64)
        .bind(rule.retry_backoff_ms as i64)
        .bind(serde_json::to_string(&rule.transform)?)
        .bind(rule.lookup.as_ref().map(serde_json::to_string).transpose()?)
        .bind(serde_json::to_string(&rule.actions)?)
        .bind(rule.action_delay_ms as i64)
        .bind(rule.parallel_actions as i64)
        .bind(rule.delivery_mode.as_str())
        .bind(&rule.schedule_script)
        .bind(rule.active as i64)
        .bind(rule.deleted_at.map(|t| t.to_rfc3339()))
        .bind(rule.priority as i64)
        .bind(rule.rate_limit.as_ref().map(serde_json::to_string).transpose()?)
        .bind(serde_json::to_string(&rule.circuit_breaker)?)
        .bind(rule.signing.as_ref().map(serde_json::to_string).transpose()?)
        .bind(Utc::now().to_rfc3339())
        .bind(rule.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::RuleNotFound(rule.id));
        }

        Ok(())
    }

    async fn soft_delete(&self, id: Uuid) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE integration_rules SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::RuleNotFound(id));
        }

        Ok(())
    }

    async fn list(&self, filter: RuleFilter) -> DomainResult<Vec<IntegrationRule>> {
        let mut query = String::from("SELECT * FROM integration_rules WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(tenant) = &filter.tenant {
            query.push_str(" AND tenant = ?");
            bindings.push(tenant.clone());
        }
        if let Some(event_type) = &filter.event_type {
            query.push_str(" AND event_type = ?");
            bindings.push(event_type.clone());
        }
        if let Some(active) = filter.active {
            query.push_str(" AND active = ?");
            bindings.push(if active { "1".into() } else { "0".into() });
        }
        if !filter.include_deleted {
            query.push_str(" AND deleted_at IS NULL");
        }

        query.push_str(" ORDER BY priority DESC, updated_at ASC");

        let mut q = sqlx::query_as::<_, RuleRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<RuleRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_live_for_tenant(&self, tenant: &str) -> DomainResult<Vec<IntegrationRule>> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            r#"SELECT * FROM integration_rules
               WHERE tenant = ? AND active = 1 AND deleted_at IS NULL
               ORDER BY priority DESC, updated_at ASC"#,
        )
        .bind(tenant)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn set_active(&self, id: Uuid, active: bool) -> DomainResult<()> {
        let result = sqlx::query(
            "UPDATE integration_rules SET active = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(active as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::RuleNotFound(id));
        }

        Ok(())
    }
}
