//! Relational poll adapter.
//!
//! Polls an arbitrary table for rows with an id greater than the stored
//! checkpoint, scoped to one tenant, and normalises them through a column
//! mapping. The first-ever run bootstraps the checkpoint to the current max
//! id so history is not replayed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ColumnMapping, Event, SourceCheckpoint, SourceKind};
use crate::domain::ports::{AckDecision, CheckpointRepository, EventHandler, EventSource};

/// Behaviour knobs for the poll loop.
#[derive(Debug, Clone)]
pub struct RelationalPollConfig {
    pub table: String,
    pub columns: ColumnMapping,
    pub event_type_filter: Vec<String>,
    pub org_unit_filter: Vec<String>,
    pub poll_interval: Duration,
    pub batch_size: u32,
    /// Advance the checkpoint even when the handler nacks. Retry is the
    /// execution log's job; switching this off trades duplicate storms for
    /// zero event loss on executor bugs.
    pub advance_on_executor_error: bool,
    pub drain_timeout: Duration,
}

struct Inner {
    name: String,
    tenant: String,
    config: RelationalPollConfig,
    source_pool: SqlitePool,
    checkpoints: Arc<dyn CheckpointRepository>,
    running: AtomicBool,
    tick_in_flight: AtomicBool,
    heartbeat: RwLock<Option<DateTime<Utc>>>,
}

/// Event source over a polled relational table for one tenant.
pub struct RelationalPollSource {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RelationalPollSource {
    pub fn new(
        name: impl Into<String>,
        tenant: impl Into<String>,
        config: RelationalPollConfig,
        source_pool: SqlitePool,
        checkpoints: Arc<dyn CheckpointRepository>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                tenant: tenant.into(),
                config,
                source_pool,
                checkpoints,
                running: AtomicBool::new(false),
                tick_in_flight: AtomicBool::new(false),
                heartbeat: RwLock::new(None),
            }),
            handle: Mutex::new(None),
        }
    }
}

impl Inner {
    fn select_sql(&self) -> String {
        let c = &self.config.columns;
        let mut sql = format!(
            "SELECT {id} AS ev_id, {tenant} AS ev_tenant, {etype} AS ev_type, {payload} AS ev_payload",
            id = c.id,
            tenant = c.tenant,
            etype = c.event_type,
            payload = c.payload,
        );
        if let Some(org) = &c.org_unit {
            sql.push_str(&format!(", {org} AS ev_org_unit"));
        }
        sql.push_str(&format!(
            " FROM {table} WHERE {id} > ? AND {tenant} = ?",
            table = self.config.table,
            id = c.id,
            tenant = c.tenant,
        ));
        if !self.config.event_type_filter.is_empty() {
            let marks = vec!["?"; self.config.event_type_filter.len()].join(", ");
            sql.push_str(&format!(" AND {} IN ({marks})", c.event_type));
        }
        if !self.config.org_unit_filter.is_empty() {
            if let Some(org) = &c.org_unit {
                let marks = vec!["?"; self.config.org_unit_filter.len()].join(", ");
                sql.push_str(&format!(" AND {org} IN ({marks})"));
            }
        }
        sql.push_str(&format!(" ORDER BY {} ASC LIMIT ?", c.id));
        sql
    }

    async fn current_checkpoint(&self) -> DomainResult<Option<String>> {
        Ok(self
            .checkpoints
            .get(SourceKind::RelationalPoll, &self.name, &self.tenant)
            .await?
            .map(|c| c.position))
    }

    /// First-ever run: set the checkpoint to the current max id so history
    /// is not replayed.
    async fn bootstrap_checkpoint(&self) -> DomainResult<String> {
        let sql = format!(
            "SELECT COALESCE(MAX({id}), 0) FROM {table} WHERE {tenant} = ?",
            id = self.config.columns.id,
            table = self.config.table,
            tenant = self.config.columns.tenant,
        );
        let row = sqlx::query(&sql)
            .bind(&self.tenant)
            .fetch_one(&self.source_pool)
            .await
            .map_err(|e| DomainError::SourceError(e.to_string()))?;
        let max_id: i64 = row.try_get(0).map_err(|e| DomainError::SourceError(e.to_string()))?;

        let position = max_id.to_string();
        self.checkpoints
            .advance(&SourceCheckpoint::new(
                SourceKind::RelationalPoll,
                &self.name,
                &self.tenant,
                &position,
            ))
            .await?;
        Ok(position)
    }

    async fn advance_to(&self, position: &str) -> DomainResult<()> {
        self.checkpoints
            .advance(&SourceCheckpoint::new(
                SourceKind::RelationalPoll,
                &self.name,
                &self.tenant,
                position,
            ))
            .await?;
        Ok(())
    }

    async fn tick(&self, handler: &Arc<dyn EventHandler>) -> DomainResult<()> {
        *self.heartbeat.write().await = Some(Utc::now());

        let checkpoint = match self.current_checkpoint().await? {
            Some(pos) => pos,
            None => {
                let pos = self.bootstrap_checkpoint().await?;
                tracing::info!(source = %self.name, tenant = %self.tenant, position = %pos, "Bootstrapped checkpoint");
                return Ok(());
            }
        };

        let sql = self.select_sql();
        let mut query = sqlx::query(&sql)
            .bind(checkpoint.parse::<i64>().unwrap_or(0))
            .bind(&self.tenant);
        for et in &self.config.event_type_filter {
            query = query.bind(et);
        }
        if self.config.columns.org_unit.is_some() {
            for ou in &self.config.org_unit_filter {
                query = query.bind(ou);
            }
        }
        query = query.bind(self.config.batch_size as i64);

        let rows = query
            .fetch_all(&self.source_pool)
            .await
            .map_err(|e| DomainError::SourceError(e.to_string()))?;

        for row in rows {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let id: i64 = row.try_get("ev_id").map_err(|e| DomainError::SourceError(e.to_string()))?;
            let event_type: String =
                row.try_get("ev_type").map_err(|e| DomainError::SourceError(e.to_string()))?;
            let raw_payload: String =
                row.try_get("ev_payload").map_err(|e| DomainError::SourceError(e.to_string()))?;
            let org_unit: Option<String> = if self.config.columns.org_unit.is_some() {
                row.try_get("ev_org_unit").ok()
            } else {
                None
            };

            let payload = serde_json::from_str(&raw_payload)
                .unwrap_or_else(|_| serde_json::Value::String(raw_payload));

            let mut event = Event::new(
                self.tenant.clone(),
                event_type,
                payload,
                SourceKind::RelationalPoll,
                self.name.clone(),
            )
            .with_id(format!("{}-{}", self.name, id))
            .with_source_offset(id.to_string());
            event.org_unit = org_unit;

            let ctx = crate::domain::ports::AckContext::new();
            let result = handler.handle(event, &ctx).await;

            match (result, ctx.decision().await) {
                (Ok(()), Some(AckDecision::Ack)) => {
                    self.advance_to(&id.to_string()).await?;
                }
                (Ok(()), Some(AckDecision::Nack { .. })) => {
                    // Retry is handled downstream by the log; advancing keeps
                    // the source moving unless the operator opted out.
                    if self.config.advance_on_executor_error {
                        self.advance_to(&id.to_string()).await?;
                    } else {
                        tracing::warn!(source = %self.name, id, "Handler nacked and advance_on_executor_error is off; stalling");
                        break;
                    }
                }
                (Ok(()), None) => {
                    // No decision recorded: treat as in-flight, do not commit.
                    break;
                }
                (Err(e), _) => {
                    // Infrastructure failure of the handler itself. Never
                    // advance past the event.
                    tracing::error!(source = %self.name, id, error = %e, "Handler infrastructure error");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventSource for RelationalPollSource {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn start(&self, handler: Arc<dyn EventHandler>) -> DomainResult<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.config.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            while inner.running.load(Ordering::SeqCst) {
                interval.tick().await;

                // Single-flight: skip the tick if the previous one still runs.
                if inner
                    .tick_in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    continue;
                }

                if let Err(e) = inner.tick(&handler).await {
                    tracing::error!(source = %inner.name, error = %e, "Poll tick failed");
                }

                inner.tick_in_flight.store(false, Ordering::SeqCst);
            }
        });

        *self.handle.lock().await = Some(handle);
        tracing::info!(source = %self.inner.name, tenant = %self.inner.tenant, "Relational poll source started");
        Ok(())
    }

    async fn stop(&self) -> DomainResult<()> {
        self.inner.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.handle.lock().await.take() {
            if tokio::time::timeout(self.inner.config.drain_timeout, handle).await.is_err() {
                tracing::warn!(source = %self.inner.name, "Drain deadline exceeded; poll task aborted");
            }
        }

        Ok(())
    }

    fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.inner.heartbeat.try_read().ok().and_then(|hb| *hb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;
    use crate::adapters::sqlite::migrations::Migrator;
    use crate::adapters::sqlite::SqliteCheckpointRepository;
    use crate::domain::ports::AckContext;

    struct RecordingHandler {
        events: Mutex<Vec<Event>>,
        ack: bool,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: Event, ctx: &AckContext) -> DomainResult<()> {
            self.events.lock().await.push(event);
            if self.ack {
                ctx.ack().await;
            } else {
                ctx.nack(None).await;
            }
            Ok(())
        }
    }

    fn config() -> RelationalPollConfig {
        RelationalPollConfig {
            table: "business_events".to_string(),
            columns: ColumnMapping::default(),
            event_type_filter: vec![],
            org_unit_filter: vec![],
            poll_interval: Duration::from_millis(20),
            batch_size: 50,
            advance_on_executor_error: true,
            drain_timeout: Duration::from_secs(5),
        }
    }

    async fn seed_source_table(pool: &SqlitePool) {
        sqlx::query(
            "CREATE TABLE business_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id TEXT NOT NULL,
                org_unit_id TEXT,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(pool)
        .await
        .unwrap();
    }

    async fn insert_event(pool: &SqlitePool, tenant: &str, event_type: &str, payload: &str) {
        sqlx::query(
            "INSERT INTO business_events (tenant_id, org_unit_id, event_type, payload) VALUES (?, 'ou-1', ?, ?)",
        )
        .bind(tenant)
        .bind(event_type)
        .bind(payload)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn setup() -> (SqlitePool, Arc<SqliteCheckpointRepository>) {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run().await.unwrap();
        seed_source_table(&pool).await;
        let checkpoints = Arc::new(SqliteCheckpointRepository::new(pool.clone()));
        (pool, checkpoints)
    }

    #[tokio::test]
    async fn select_sql_includes_filters() {
        let (pool, checkpoints) = setup().await;
        let mut cfg = config();
        cfg.event_type_filter = vec!["A".into(), "B".into()];
        cfg.org_unit_filter = vec!["ou-1".into()];
        let source = RelationalPollSource::new("orders", "t-1", cfg, pool, checkpoints);

        let sql = source.inner.select_sql();
        assert!(sql.contains("event_type IN (?, ?)"));
        assert!(sql.contains("org_unit_id IN (?)"));
        assert!(sql.contains("ORDER BY id ASC"));
    }

    #[tokio::test]
    async fn first_run_bootstraps_without_replaying_history() {
        let (pool, checkpoints) = setup().await;
        insert_event(&pool, "t-1", "ORDER_CREATED", r#"{"n":1}"#).await;
        insert_event(&pool, "t-1", "ORDER_CREATED", r#"{"n":2}"#).await;

        let source =
            RelationalPollSource::new("orders", "t-1", config(), pool.clone(), checkpoints.clone());
        let handler = Arc::new(RecordingHandler { events: Mutex::new(vec![]), ack: true });

        // First tick bootstraps, second tick sees nothing new.
        source.inner.tick(&(handler.clone() as Arc<dyn EventHandler>)).await.unwrap();
        source.inner.tick(&(handler.clone() as Arc<dyn EventHandler>)).await.unwrap();
        assert!(handler.events.lock().await.is_empty());

        let ck = checkpoints
            .get(SourceKind::RelationalPoll, "orders", "t-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ck.position, "2");
    }

    #[tokio::test]
    async fn new_rows_arrive_in_id_order_and_advance_checkpoint() {
        let (pool, checkpoints) = setup().await;
        let source =
            RelationalPollSource::new("orders", "t-1", config(), pool.clone(), checkpoints.clone());
        let handler = Arc::new(RecordingHandler { events: Mutex::new(vec![]), ack: true });
        source.inner.running.store(true, Ordering::SeqCst);

        source.inner.tick(&(handler.clone() as Arc<dyn EventHandler>)).await.unwrap();

        insert_event(&pool, "t-1", "ORDER_CREATED", r#"{"n":1}"#).await;
        insert_event(&pool, "t-2", "ORDER_CREATED", r#"{"n":99}"#).await;
        insert_event(&pool, "t-1", "ORDER_UPDATED", r#"{"n":2}"#).await;

        source.inner.tick(&(handler.clone() as Arc<dyn EventHandler>)).await.unwrap();

        let events = handler.events.lock().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "ORDER_CREATED");
        assert_eq!(events[1].event_type, "ORDER_UPDATED");
        assert_eq!(events[0].org_unit.as_deref(), Some("ou-1"));
        assert!(events.iter().all(|e| e.tenant == "t-1"));
        drop(events);

        let ck = checkpoints
            .get(SourceKind::RelationalPoll, "orders", "t-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ck.position, "3");
    }

    #[tokio::test]
    async fn nack_advances_by_default_but_not_when_opted_out() {
        let (pool, checkpoints) = setup().await;

        // Default: nack advances.
        let source =
            RelationalPollSource::new("orders", "t-1", config(), pool.clone(), checkpoints.clone());
        source.inner.running.store(true, Ordering::SeqCst);
        let nacker = Arc::new(RecordingHandler { events: Mutex::new(vec![]), ack: false });
        source.inner.tick(&(nacker.clone() as Arc<dyn EventHandler>)).await.unwrap();
        insert_event(&pool, "t-1", "ORDER_CREATED", r#"{"n":1}"#).await;
        source.inner.tick(&(nacker.clone() as Arc<dyn EventHandler>)).await.unwrap();

        let ck = checkpoints
            .get(SourceKind::RelationalPoll, "orders", "t-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ck.position, "1");

        // Opted out: the checkpoint stalls.
        let mut cfg = config();
        cfg.advance_on_executor_error = false;
        let source =
            RelationalPollSource::new("orders2", "t-1", cfg, pool.clone(), checkpoints.clone());
        source.inner.running.store(true, Ordering::SeqCst);
        source.inner.tick(&(nacker.clone() as Arc<dyn EventHandler>)).await.unwrap();
        insert_event(&pool, "t-1", "ORDER_CREATED", r#"{"n":2}"#).await;
        source.inner.tick(&(nacker.clone() as Arc<dyn EventHandler>)).await.unwrap();

        let ck = checkpoints
            .get(SourceKind::RelationalPoll, "orders2", "t-1")
            .await
            .unwrap()
            .unwrap();
        // Still at the bootstrap position.
        assert_eq!(ck.position, "1");
    }
}
