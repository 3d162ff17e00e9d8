//! Event pipeline.
//!
//! The handler every ingestion source feeds: dedup, rule resolution, then
//! scheduling or immediate delivery per matched rule. Per-partition-key
//! ordering is preserved by routing delivery through the key-bucket
//! executor keyed on the tenant id.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{DlqEntry, Event, ExecutionLog, LogStatus, TriggerType};
use crate::domain::ports::{
    AckContext, DlqRepository, EventHandler, ExecutionLogRepository,
};

use super::dedup::{DedupOutcome, DedupService};
use super::delivery::DeliveryExecutor;
use super::key_bucket::KeyBucketExecutor;
use super::rule_resolver::RuleResolver;
use super::scheduler::DeliveryScheduler;

pub struct EventPipeline {
    dedup: Arc<DedupService>,
    resolver: Arc<RuleResolver>,
    executor: Arc<DeliveryExecutor>,
    scheduler: Arc<DeliveryScheduler>,
    buckets: Arc<KeyBucketExecutor>,
    logs: Arc<dyn ExecutionLogRepository>,
    dlq: Arc<dyn DlqRepository>,
}

impl EventPipeline {
    pub fn new(
        dedup: Arc<DedupService>,
        resolver: Arc<RuleResolver>,
        executor: Arc<DeliveryExecutor>,
        scheduler: Arc<DeliveryScheduler>,
        buckets: Arc<KeyBucketExecutor>,
        logs: Arc<dyn ExecutionLogRepository>,
        dlq: Arc<dyn DlqRepository>,
    ) -> Self {
        Self { dedup, resolver, executor, scheduler, buckets, logs, dlq }
    }

    /// Record the rule-less duplicate drop so replays are visible.
    async fn record_duplicate(&self, event: &Event) -> DomainResult<()> {
        let mut log = ExecutionLog::new(
            event.tenant.clone(),
            Uuid::nil(),
            event.id.clone(),
            event.event_type.clone(),
            event.payload.clone(),
        )
        .with_org_unit(event.org_unit.clone());
        log.status = LogStatus::Duplicate;
        self.logs.create(&log).await
    }

    async fn process(&self, event: &Event) -> DomainResult<()> {
        match self.dedup.check_and_record(event).await? {
            DedupOutcome::Duplicate { fingerprint } => {
                tracing::info!(
                    tenant = %event.tenant,
                    event_type = %event.event_type,
                    fingerprint = %fingerprint,
                    "Duplicate event dropped"
                );
                return self.record_duplicate(event).await;
            }
            DedupOutcome::Fresh { .. } => {}
        }

        let resolved = self
            .resolver
            .resolve(&event.tenant, &event.event_type, event.org_unit.as_deref())
            .await?;

        if resolved.is_empty() {
            tracing::debug!(
                tenant = %event.tenant,
                event_type = %event.event_type,
                "No rules matched"
            );
            return Ok(());
        }

        for resolved_rule in resolved {
            let rule = resolved_rule.rule;

            if rule.delivery_mode.is_scheduled() {
                if let Err(err) = self.scheduler.plan(&rule, event).await {
                    // Invalid script or result: terminal for this event.
                    let mut log = ExecutionLog::new(
                        rule.tenant.clone(),
                        rule.id,
                        event.id.clone(),
                        event.event_type.clone(),
                        event.payload.clone(),
                    )
                    .with_org_unit(event.org_unit.clone());
                    log.mark_failure(err.clone(), false, 0);
                    self.logs.create(&log).await?;
                    self.dlq
                        .create(&DlqEntry::new(
                            log.id,
                            rule.id,
                            rule.tenant.clone(),
                            err.category,
                            err.code.clone(),
                            err.message.clone(),
                            0,
                        ))
                        .await?;
                }
                continue;
            }

            // Immediate delivery, serialised per tenant partition key.
            let executor = Arc::clone(&self.executor);
            let rule_clone = rule.clone();
            let event_clone = event.clone();
            self.buckets
                .run(&event.tenant, async move {
                    executor.deliver(&rule_clone, &event_clone, TriggerType::Event).await
                })
                .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for EventPipeline {
    /// Handle one event. Delivery failures are persisted by the executor
    /// and the event is acked regardless; only infrastructure failures of
    /// the store itself surface as errors, which sources treat as
    /// no-progress.
    async fn handle(&self, event: Event, ctx: &AckContext) -> DomainResult<()> {
        match self.process(&event).await {
            Ok(()) => {
                ctx.ack().await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    tenant = %event.tenant,
                    event_type = %event.event_type,
                    error = %e,
                    "Pipeline infrastructure error"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;
    use crate::adapters::sqlite::migrations::Migrator;
    use crate::adapters::sqlite::{
        SqliteDedupRepository, SqliteDlqRepository, SqliteExecutionLogRepository,
        SqliteLookupRepository, SqliteOrgUnitRepository, SqliteRuleRepository,
        SqliteScheduledDeliveryRepository,
    };
    use crate::domain::models::{
        FieldMapping, IntegrationRule, MappingSpec, SecurityConfig, SourceKind, TargetSpec,
        TransformSpec,
    };
    use crate::domain::ports::{LogFilter, RuleRepository, ScheduledDeliveryRepository};
    use crate::infrastructure::http::AuthManager;
    use crate::services::circuit_breaker::CircuitBreakerRegistry;
    use crate::services::lookup_mapper::LookupMapper;
    use crate::services::rate_limit::RateLimiterRegistry;
    use crate::services::sandbox::{SandboxLimits, ScriptSandbox};
    use crate::services::transformer::Transformer;
    use serde_json::json;

    struct Fixture {
        pipeline: Arc<EventPipeline>,
        rules: Arc<SqliteRuleRepository>,
        logs: Arc<SqliteExecutionLogRepository>,
        schedules: Arc<SqliteScheduledDeliveryRepository>,
    }

    async fn fixture() -> Fixture {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run().await.unwrap();

        let rules = Arc::new(SqliteRuleRepository::new(pool.clone()));
        let logs = Arc::new(SqliteExecutionLogRepository::new(pool.clone()));
        let dlq = Arc::new(SqliteDlqRepository::new(pool.clone()));
        let dedup_repo = Arc::new(SqliteDedupRepository::new(pool.clone()));
        let schedules = Arc::new(SqliteScheduledDeliveryRepository::new(pool.clone()));
        let lookups = Arc::new(SqliteLookupRepository::new(pool.clone()));
        let org_units = Arc::new(SqliteOrgUnitRepository::new(pool.clone()));

        let client = reqwest::Client::new();
        let sandbox = ScriptSandbox::new(SandboxLimits::default());
        let transformer = Arc::new(Transformer::new(
            sandbox.clone(),
            Arc::new(LookupMapper::new(lookups)),
        ));
        let breakers = Arc::new(CircuitBreakerRegistry::default());
        let executor = Arc::new(DeliveryExecutor::new(
            client.clone(),
            Arc::new(AuthManager::new(client)),
            transformer,
            breakers.clone(),
            Arc::new(RateLimiterRegistry::new()),
            logs.clone(),
            dlq.clone(),
            SecurityConfig::default(),
        ));
        let scheduler = Arc::new(DeliveryScheduler::new(
            schedules.clone(),
            rules.clone(),
            executor.clone(),
            sandbox,
            crate::domain::models::SchedulerConfig::default(),
        ));
        let resolver = Arc::new(RuleResolver::new(rules.clone(), org_units, breakers));
        let dedup = Arc::new(DedupService::new(dedup_repo.clone(), dedup_repo));
        let pipeline = Arc::new(EventPipeline::new(
            dedup,
            resolver,
            executor,
            scheduler,
            Arc::new(KeyBucketExecutor::new(4, 16)),
            logs.clone(),
            dlq,
        ));

        Fixture { pipeline, rules, logs, schedules }
    }

    fn event(offset: &str) -> Event {
        Event::new(
            "t-100",
            "ORDER_CREATED",
            json!({"orderId": "A1", "total": 99.5, "extra": "ignore"}),
            SourceKind::RelationalPoll,
            "orders",
        )
        .with_source_offset(offset)
    }

    #[tokio::test]
    async fn simple_delivery_end_to_end() {
        let f = fixture().await;

        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/hook")
            .match_body(mockito::Matcher::Json(json!({"id": "A1", "amount": 99.5})))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let mut rule = IntegrationRule::new(
            "t-100",
            "order-hook",
            "ORDER_CREATED",
            TargetSpec::new(format!("{}/hook", server.url())),
        );
        rule.transform = TransformSpec::Mapping(MappingSpec {
            fields: vec![
                FieldMapping {
                    source_path: "orderId".into(),
                    target_path: "id".into(),
                    function: None,
                    default_value: None,
                    required: true,
                },
                FieldMapping {
                    source_path: "total".into(),
                    target_path: "amount".into(),
                    function: None,
                    default_value: None,
                    required: true,
                },
            ],
            static_fields: vec![],
        });
        f.rules.create(&rule).await.unwrap();

        let ctx = AckContext::new();
        f.pipeline.handle(event("1"), &ctx).await.unwrap();
        assert_eq!(ctx.decision().await, Some(crate::domain::ports::AckDecision::Ack));

        hook.assert_async().await;

        let logs = f.logs.list(LogFilter::default()).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Success);
        assert_eq!(logs[0].request_payload, Some(json!({"id": "A1", "amount": 99.5})));
    }

    #[tokio::test]
    async fn replay_yields_one_success_and_one_duplicate() {
        let f = fixture().await;

        let mut server = mockito::Server::new_async().await;
        let hook = server.mock("POST", "/hook").with_status(200).expect(1).create_async().await;

        let rule = IntegrationRule::new(
            "t-100",
            "order-hook",
            "ORDER_CREATED",
            TargetSpec::new(format!("{}/hook", server.url())),
        );
        f.rules.create(&rule).await.unwrap();

        let ctx = AckContext::new();
        f.pipeline.handle(event("1"), &ctx).await.unwrap();
        let ctx = AckContext::new();
        f.pipeline.handle(event("1"), &ctx).await.unwrap();
        assert_eq!(ctx.decision().await, Some(crate::domain::ports::AckDecision::Ack));

        // Only one HTTP call despite two events.
        hook.assert_async().await;

        let logs = f.logs.list(LogFilter::default()).await.unwrap();
        let statuses: Vec<LogStatus> = logs.iter().map(|l| l.status).collect();
        assert!(statuses.contains(&LogStatus::Success));
        assert!(statuses.contains(&LogStatus::Duplicate));
        assert_eq!(logs.len(), 2);
    }

    #[tokio::test]
    async fn delayed_rule_plans_instead_of_delivering() {
        let f = fixture().await;

        let mut rule = IntegrationRule::new(
            "t-100",
            "delayed-hook",
            "ORDER_CREATED",
            TargetSpec::new("https://example.test/hook"),
        );
        rule.delivery_mode = crate::domain::models::DeliveryMode::Delayed;
        rule.schedule_script = Some("addHours(now, 1)".into());
        f.rules.create(&rule).await.unwrap();

        let ctx = AckContext::new();
        f.pipeline.handle(event("1"), &ctx).await.unwrap();

        let pending = f
            .schedules
            .list(crate::domain::ports::ScheduleFilter::default())
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, crate::domain::models::ScheduleStatus::Pending);

        // No delivery log yet.
        let logs = f.logs.list(LogFilter::default()).await.unwrap();
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn unmatched_event_is_acked_quietly() {
        let f = fixture().await;
        let ctx = AckContext::new();
        f.pipeline.handle(event("1"), &ctx).await.unwrap();
        assert_eq!(ctx.decision().await, Some(crate::domain::ports::AckDecision::Ack));
        assert!(f.logs.list(LogFilter::default()).await.unwrap().is_empty());
    }
}
