//! Shared fixture for integration tests: an in-memory store with the full
//! delivery plane wired against it.

use std::sync::Arc;

use fluxgate::adapters::sqlite::{
    create_test_pool, Migrator, SqliteDedupRepository,
    SqliteDlqRepository, SqliteExecutionLogRepository, SqliteLookupRepository,
    SqliteOrgUnitRepository, SqliteRuleRepository, SqliteScheduledDeliveryRepository,
};
use fluxgate::domain::models::{IntegrationRule, SecurityConfig, TargetSpec};
use fluxgate::infrastructure::http::AuthManager;
use fluxgate::services::{
    CircuitBreakerRegistry, DedupService, DeliveryExecutor, DeliveryScheduler, LookupMapper,
    RateLimiterRegistry, RuleResolver, SandboxLimits, ScriptSandbox, Transformer,
};

pub struct Gateway {
    pub rules: Arc<SqliteRuleRepository>,
    pub logs: Arc<SqliteExecutionLogRepository>,
    pub dlq: Arc<SqliteDlqRepository>,
    pub schedules: Arc<SqliteScheduledDeliveryRepository>,
    pub dedup: Arc<DedupService>,
    pub resolver: Arc<RuleResolver>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub executor: Arc<DeliveryExecutor>,
    pub scheduler: Arc<DeliveryScheduler>,
}

pub async fn gateway() -> Gateway {
    let pool = create_test_pool().await.expect("test pool");
    Migrator::new(pool.clone()).run().await.expect("migrations");

    let rules = Arc::new(SqliteRuleRepository::new(pool.clone()));
    let logs = Arc::new(SqliteExecutionLogRepository::new(pool.clone()));
    let dlq = Arc::new(SqliteDlqRepository::new(pool.clone()));
    let schedules = Arc::new(SqliteScheduledDeliveryRepository::new(pool.clone()));
    let dedup_repo = Arc::new(SqliteDedupRepository::new(pool.clone()));
    let lookups = Arc::new(SqliteLookupRepository::new(pool.clone()));
    let org_units = Arc::new(SqliteOrgUnitRepository::new(pool));

    let client = reqwest::Client::new();
    let sandbox = ScriptSandbox::new(SandboxLimits::default());
    let transformer =
        Arc::new(Transformer::new(sandbox.clone(), Arc::new(LookupMapper::new(lookups))));
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
        fluxgate::domain::models::SchedulerConfig::default(),
    ));

    let resolver = Arc::new(RuleResolver::new(rules.clone(), org_units, breakers.clone()));
    let dedup = Arc::new(DedupService::new(dedup_repo.clone(), dedup_repo));

    Gateway { rules, logs, dlq, schedules, dedup, resolver, breakers, executor, scheduler }
}

pub fn rule_for(url: impl Into<String>) -> IntegrationRule {
    IntegrationRule::new("tenant-100", "order-hook", "ORDER_CREATED", TargetSpec::new(url))
}
