//! Fluxgate CLI entry point

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use fluxgate::adapters::sources::{SourceFactory, SourceSupervisor};
use fluxgate::adapters::sqlite::{
    create_pool, Migrator, SqliteCheckpointRepository,
    SqliteDedupRepository, SqliteDlqRepository, SqliteExecutionLogRepository,
    SqliteLookupRepository, SqliteOrgUnitRepository, SqlitePendingEventRepository,
    SqliteRuleRepository, SqliteScheduledDeliveryRepository, SqliteSourceConfigRepository,
    SourceConfigRepository,
};
use fluxgate::cli::commands::{self, CommandContext};
use fluxgate::cli::{Cli, Commands, DlqCommands, LogCommands, RuleCommands, ScheduleCommands};
use fluxgate::domain::models::GatewayConfig;
use fluxgate::domain::ports::EventHandler;
use fluxgate::infrastructure::config::ConfigLoader;
use fluxgate::infrastructure::http::{build_client, AuthManager};
use fluxgate::infrastructure::logging;
use fluxgate::services::{
    CircuitBreakerRegistry, DedupService, DeliveryExecutor, DeliveryScheduler, EventPipeline,
    KeyBucketExecutor, LookupMapper, MaintenanceLoop, RateLimiterRegistry, RetryWorker,
    RuleResolver, SandboxLimits, ScriptSandbox, Transformer,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load().context("Failed to load configuration")?,
    };

    let _log_guard = logging::init(&config.logging, config.logging.log_dir.as_deref())?;

    let pool = create_pool(&config.database).await.context("Failed to open the gateway store")?;
    let applied = Migrator::new(pool.clone())
        .run()
        .await
        .context("Failed to run database migrations")?;
    if applied > 0 {
        tracing::info!(count = applied, "Applied database migrations");
    }

    let rules = Arc::new(SqliteRuleRepository::new(pool.clone()));
    let logs = Arc::new(SqliteExecutionLogRepository::new(pool.clone()));
    let dlq = Arc::new(SqliteDlqRepository::new(pool.clone()));
    let schedules = Arc::new(SqliteScheduledDeliveryRepository::new(pool.clone()));

    match cli.command {
        Commands::Serve => serve(config, pool).await,
        command => {
            let ctx = CommandContext {
                rules,
                logs,
                dlq,
                schedules,
                grace_hours: config.scheduler.grace_hours,
            };
            let output = run_command(&ctx, command).await?;
            println!("{output}");
            Ok(())
        }
    }
}

async fn run_command(ctx: &CommandContext, command: Commands) -> Result<String> {
    match command {
        Commands::Serve => unreachable!("serve is handled by the caller"),
        Commands::Rule(cmd) => match cmd {
            RuleCommands::List { tenant, deleted } => commands::rule_list(ctx, tenant, deleted).await,
            RuleCommands::Pause { id } => commands::rule_pause(ctx, id).await,
            RuleCommands::Resume { id } => commands::rule_resume(ctx, id).await,
        },
        Commands::Logs(cmd) => match cmd {
            LogCommands::List { tenant, rule, status, limit } => {
                commands::logs_list(ctx, tenant, rule, status, limit).await
            }
            LogCommands::Retry { id } => commands::logs_retry(ctx, id).await,
            LogCommands::BulkRetry { rule, limit } => commands::logs_bulk_retry(ctx, rule, limit).await,
            LogCommands::Abandon { id } => commands::logs_abandon(ctx, id).await,
            LogCommands::BackfillMeta { rule, limit } => {
                commands::logs_backfill_meta(ctx, rule, limit).await
            }
        },
        Commands::Dlq(cmd) => match cmd {
            DlqCommands::List { tenant, all } => commands::dlq_list(ctx, tenant, all).await,
            DlqCommands::Promote { id } => commands::dlq_promote(ctx, id).await,
        },
        Commands::Schedule(cmd) => match cmd {
            ScheduleCommands::List { tenant, status } => {
                commands::schedule_list(ctx, tenant, status).await
            }
            ScheduleCommands::Cancel { id } => commands::schedule_cancel(ctx, id).await,
            ScheduleCommands::CleanupOverdue { grace_hours } => {
                commands::schedule_cleanup_overdue(ctx, grace_hours).await
            }
        },
    }
}

/// Wire the delivery plane and run until interrupted.
async fn serve(config: GatewayConfig, pool: sqlx::SqlitePool) -> Result<()> {
    tracing::info!("Starting fluxgate");

    // Repositories.
    let rules = Arc::new(SqliteRuleRepository::new(pool.clone()));
    let logs = Arc::new(SqliteExecutionLogRepository::new(pool.clone()));
    let dlq = Arc::new(SqliteDlqRepository::new(pool.clone()));
    let schedules = Arc::new(SqliteScheduledDeliveryRepository::new(pool.clone()));
    let checkpoints = Arc::new(SqliteCheckpointRepository::new(pool.clone()));
    let dedup_repo = Arc::new(SqliteDedupRepository::new(pool.clone()));
    let lookups = Arc::new(SqliteLookupRepository::new(pool.clone()));
    let org_units = Arc::new(SqliteOrgUnitRepository::new(pool.clone()));
    let pending_events = Arc::new(SqlitePendingEventRepository::new(pool.clone()));
    let source_configs = SqliteSourceConfigRepository::new(pool.clone());

    // Delivery plane.
    let client = build_client(&config.http_client).map_err(|e| anyhow::anyhow!(e))?;
    let auth = Arc::new(AuthManager::new(client.clone()));
    let sandbox = ScriptSandbox::new(SandboxLimits::default());
    let transformer = Arc::new(Transformer::new(
        sandbox.clone(),
        Arc::new(LookupMapper::new(lookups.clone())),
    ));
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let rate_limits = Arc::new(RateLimiterRegistry::new());
    let executor = Arc::new(DeliveryExecutor::new(
        client,
        auth.clone(),
        transformer,
        breakers.clone(),
        rate_limits.clone(),
        logs.clone(),
        dlq.clone(),
        config.security.clone(),
    ));

    let scheduler = Arc::new(DeliveryScheduler::new(
        schedules.clone(),
        rules.clone(),
        executor.clone(),
        sandbox,
        config.scheduler.clone(),
    ));
    let retry_worker = Arc::new(RetryWorker::new(
        logs.clone(),
        rules.clone(),
        executor.clone(),
        config.worker.clone(),
    ));

    let resolver = Arc::new(RuleResolver::new(rules.clone(), org_units, breakers.clone()));
    let dedup = Arc::new(DedupService::new(dedup_repo.clone(), dedup_repo));
    let buckets = Arc::new(KeyBucketExecutor::new(
        config.sources.key_buckets as usize,
        config.worker.batch_size as usize,
    ));
    let pipeline: Arc<dyn EventHandler> = Arc::new(EventPipeline::new(
        dedup.clone(),
        resolver,
        executor,
        scheduler.clone(),
        buckets,
        logs.clone(),
        dlq.clone(),
    ));

    // Sources: config file entries plus rows registered in the store.
    let mut source_defs = config.event_sources.clone();
    source_defs.extend(source_configs.list_active().await?);
    let factory = SourceFactory::new(checkpoints, pending_events.clone(), config.sources.clone());
    let sources = factory.build_all(&source_defs).await?;
    tracing::info!(count = sources.len(), "Event sources configured");

    let supervisor = Arc::new(SourceSupervisor::new(
        sources,
        pipeline,
        Duration::from_millis(config.sources.heartbeat_timeout_ms),
    ));

    let maintenance = Arc::new(MaintenanceLoop::new(
        dedup,
        pending_events,
        Duration::from_secs(600),
    ));

    // Start everything.
    Arc::clone(&supervisor).start().await?;
    Arc::clone(&retry_worker).start().await;
    Arc::clone(&scheduler).start().await;
    Arc::clone(&maintenance).start().await;

    tracing::debug!(
        heap_threshold_mb = config.memory.heap_threshold_mb,
        "Resource limits configured"
    );
    tracing::info!("fluxgate is running; Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;

    // Drain: sources first so nothing new enters the plane, then workers,
    // then process-wide caches.
    tracing::info!("Shutting down");
    if config.memory.graceful_shutdown {
        supervisor.stop().await;
        scheduler.stop().await;
        retry_worker.stop().await;
        maintenance.stop().await;
    } else {
        tracing::warn!("Graceful shutdown disabled; in-flight work is abandoned");
    }
    rate_limits.clear().await;
    breakers.clear().await;
    auth.clear().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
