//! Operator command handlers.
//!
//! Each handler works directly against the repositories; the running
//! daemon's workers pick up re-queued deliveries on their next scan.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use uuid::Uuid;

use crate::domain::models::{LogStatus, ScheduleStatus};
use crate::domain::ports::{
    DlqFilter, DlqRepository, ExecutionLogRepository, LogFilter, RuleFilter, RuleRepository,
    ScheduleFilter, ScheduledDeliveryRepository,
};

use super::table::{list_table, render_list};

pub struct CommandContext {
    pub rules: Arc<dyn RuleRepository>,
    pub logs: Arc<dyn ExecutionLogRepository>,
    pub dlq: Arc<dyn DlqRepository>,
    pub schedules: Arc<dyn ScheduledDeliveryRepository>,
    pub grace_hours: u32,
}

pub async fn rule_list(ctx: &CommandContext, tenant: Option<String>, deleted: bool) -> Result<String> {
    let rules = ctx
        .rules
        .list(RuleFilter { tenant, include_deleted: deleted, ..Default::default() })
        .await?;

    let mut table = list_table(&["id", "tenant", "name", "event type", "mode", "priority", "active"]);
    for rule in &rules {
        table.add_row(vec![
            rule.id.to_string(),
            rule.tenant.clone(),
            rule.name.clone(),
            rule.event_type.clone(),
            rule.delivery_mode.as_str().to_string(),
            rule.priority.to_string(),
            if rule.is_live() { "yes".into() } else { "no".into() },
        ]);
    }
    Ok(render_list("rule", table, rules.len()))
}

pub async fn rule_pause(ctx: &CommandContext, id: Uuid) -> Result<String> {
    ctx.rules.set_active(id, false).await?;
    Ok(format!("Rule {id} paused."))
}

pub async fn rule_resume(ctx: &CommandContext, id: Uuid) -> Result<String> {
    ctx.rules.set_active(id, true).await?;
    Ok(format!("Rule {id} resumed."))
}

pub async fn logs_list(
    ctx: &CommandContext,
    tenant: Option<String>,
    rule: Option<Uuid>,
    status: Option<String>,
    limit: u32,
) -> Result<String> {
    let status = status
        .as_deref()
        .map(LogStatus::from_str)
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;

    let logs = ctx
        .logs
        .list(LogFilter { tenant, rule_id: rule, status, limit: Some(limit), ..Default::default() })
        .await?;

    let mut table =
        list_table(&["id", "tenant", "event type", "status", "attempts", "error", "created"]);
    for log in &logs {
        table.add_row(vec![
            log.id.to_string(),
            log.tenant.clone(),
            log.event_type.clone(),
            log.status.as_str().to_string(),
            log.attempt_count.to_string(),
            log.error.as_ref().map(|e| e.code.clone()).unwrap_or_default(),
            log.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }
    Ok(render_list("log", table, logs.len()))
}

/// Re-queue one log: back to FAILED with the retry flag so the worker
/// picks it up on its next scan.
pub async fn logs_retry(ctx: &CommandContext, id: Uuid) -> Result<String> {
    let mut log = ctx.logs.get(id).await?.context("log not found")?;

    if log.status == LogStatus::Success || log.status == LogStatus::Duplicate {
        bail!("log {id} is {} and cannot be retried", log.status.as_str());
    }

    log.status = LogStatus::Failed;
    log.should_retry = true;
    ctx.logs.update(&log).await?;
    Ok(format!("Log {id} re-queued for retry."))
}

pub async fn logs_bulk_retry(ctx: &CommandContext, rule: Uuid, limit: u32) -> Result<String> {
    let mut requeued = 0usize;

    for status in [LogStatus::Failed, LogStatus::Abandoned] {
        let logs = ctx
            .logs
            .list(LogFilter {
                rule_id: Some(rule),
                status: Some(status),
                limit: Some(limit),
                ..Default::default()
            })
            .await?;

        for mut log in logs {
            log.status = LogStatus::Failed;
            log.should_retry = true;
            ctx.logs.update(&log).await?;
            requeued += 1;
        }
    }

    Ok(format!("{requeued} logs re-queued for rule {rule}."))
}

/// Stamp the rule's current metadata onto historical logs that predate it:
/// logs without an org unit inherit the rule's scope anchor.
pub async fn logs_backfill_meta(ctx: &CommandContext, rule_id: Uuid, limit: u32) -> Result<String> {
    let rule = ctx.rules.get(rule_id).await?.context("rule not found")?;
    let Some(anchor) = rule.scope.org_unit.clone() else {
        return Ok("Rule has no scope anchor; nothing to backfill.".to_string());
    };

    let logs = ctx
        .logs
        .list(LogFilter { rule_id: Some(rule_id), limit: Some(limit), ..Default::default() })
        .await?;

    let mut updated = 0usize;
    for mut log in logs {
        if log.org_unit.is_none() {
            log.org_unit = Some(anchor.clone());
            ctx.logs.update(&log).await?;
            updated += 1;
        }
    }

    Ok(format!("{updated} logs backfilled with org unit '{anchor}'."))
}

pub async fn logs_abandon(ctx: &CommandContext, id: Uuid) -> Result<String> {
    let mut log = ctx.logs.get(id).await?.context("log not found")?;
    log.status = LogStatus::Abandoned;
    log.should_retry = false;
    ctx.logs.update(&log).await?;
    Ok(format!("Log {id} abandoned."))
}

pub async fn dlq_list(ctx: &CommandContext, tenant: Option<String>, all: bool) -> Result<String> {
    let entries = ctx
        .dlq
        .list(DlqFilter { tenant, unresolved_only: !all, ..Default::default() })
        .await?;

    let mut table = list_table(&["id", "tenant", "category", "code", "retries", "next retry", "resolved"]);
    for entry in &entries {
        table.add_row(vec![
            entry.id.to_string(),
            entry.tenant.clone(),
            entry.category.as_str().to_string(),
            entry.error_code.clone(),
            entry.retry_count.to_string(),
            entry
                .next_retry_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            if entry.is_resolved() { "yes".into() } else { "no".into() },
        ]);
    }
    Ok(render_list("DLQ entry", table, entries.len()))
}

/// Resolve a DLQ entry and re-queue its log for delivery.
pub async fn dlq_promote(ctx: &CommandContext, id: Uuid) -> Result<String> {
    let entry = ctx.dlq.get(id).await?.context("DLQ entry not found")?;
    if entry.is_resolved() {
        bail!("DLQ entry {id} is already resolved");
    }

    let mut log = ctx.logs.get(entry.log_id).await?.context("referenced log not found")?;
    log.status = LogStatus::Failed;
    log.should_retry = true;
    ctx.logs.update(&log).await?;
    ctx.dlq.resolve(id).await?;

    Ok(format!("DLQ entry {id} promoted; log {} re-queued.", entry.log_id))
}

pub async fn schedule_list(
    ctx: &CommandContext,
    tenant: Option<String>,
    status: Option<String>,
) -> Result<String> {
    let status = status
        .as_deref()
        .map(ScheduleStatus::from_str)
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;

    let entries = ctx
        .schedules
        .list(ScheduleFilter { tenant, status, ..Default::default() })
        .await?;

    let grace = chrono::Duration::hours(i64::from(ctx.grace_hours));
    let now = Utc::now();

    let mut table = list_table(&["id", "tenant", "event type", "due at", "status", "occurrence"]);
    for entry in &entries {
        let status_label = if entry.is_overdue(now, grace) {
            "OVERDUE".to_string()
        } else {
            entry.status.as_str().to_string()
        };
        table.add_row(vec![
            entry.id.to_string(),
            entry.tenant.clone(),
            entry.event_type.clone(),
            entry.due_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            status_label,
            entry.occurrence.to_string(),
        ]);
    }
    Ok(render_list("scheduled delivery", table, entries.len()))
}

pub async fn schedule_cancel(ctx: &CommandContext, id: Uuid) -> Result<String> {
    ctx.schedules.cancel(id).await?;
    Ok(format!("Scheduled delivery {id} cancelled."))
}

pub async fn schedule_cleanup_overdue(
    ctx: &CommandContext,
    grace_hours: Option<u32>,
) -> Result<String> {
    let grace = grace_hours.unwrap_or(ctx.grace_hours);
    let cutoff = Utc::now() - chrono::Duration::hours(i64::from(grace));
    let cancelled = ctx.schedules.cancel_overdue(cutoff).await?;
    Ok(format!(
        "{cancelled} overdue scheduled deliveries cancelled (grace {grace} h, category SCHEDULED_TIME_PASSED)."
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::connection::create_test_pool;
    use crate::adapters::sqlite::migrations::Migrator;
    use crate::adapters::sqlite::{
        SqliteDlqRepository, SqliteExecutionLogRepository, SqliteRuleRepository,
        SqliteScheduledDeliveryRepository,
    };
    use crate::domain::models::{
        DlqEntry, ErrorCategory, ExecutionLog, IntegrationRule, TargetSpec,
    };
    use serde_json::json;

    async fn ctx() -> CommandContext {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone()).run().await.unwrap();
        CommandContext {
            rules: Arc::new(SqliteRuleRepository::new(pool.clone())),
            logs: Arc::new(SqliteExecutionLogRepository::new(pool.clone())),
            dlq: Arc::new(SqliteDlqRepository::new(pool.clone())),
            schedules: Arc::new(SqliteScheduledDeliveryRepository::new(pool)),
            grace_hours: 24,
        }
    }

    #[tokio::test]
    async fn pause_resume_round_trip() {
        let ctx = ctx().await;
        let rule = IntegrationRule::new("t-1", "hook", "E", TargetSpec::new("https://example.test"));
        ctx.rules.create(&rule).await.unwrap();

        rule_pause(&ctx, rule.id).await.unwrap();
        assert!(ctx.rules.list_live_for_tenant("t-1").await.unwrap().is_empty());

        rule_resume(&ctx, rule.id).await.unwrap();
        assert_eq!(ctx.rules.list_live_for_tenant("t-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn promote_requeues_the_log_and_resolves() {
        let ctx = ctx().await;
        let mut log = ExecutionLog::new("t-1", Uuid::new_v4(), "evt", "E", json!({}));
        log.status = LogStatus::Abandoned;
        ctx.logs.create(&log).await.unwrap();

        let entry = DlqEntry::new(
            log.id,
            log.rule_id,
            "t-1",
            ErrorCategory::Transient,
            "TIMEOUT",
            "timed out",
            4,
        );
        ctx.dlq.create(&entry).await.unwrap();

        dlq_promote(&ctx, entry.id).await.unwrap();

        let log = ctx.logs.get(log.id).await.unwrap().unwrap();
        assert_eq!(log.status, LogStatus::Failed);
        assert!(log.should_retry);
        assert!(ctx.dlq.get(entry.id).await.unwrap().unwrap().is_resolved());
    }

    #[tokio::test]
    async fn retry_rejects_successful_logs() {
        let ctx = ctx().await;
        let mut log = ExecutionLog::new("t-1", Uuid::new_v4(), "evt", "E", json!({}));
        log.status = LogStatus::Success;
        ctx.logs.create(&log).await.unwrap();

        assert!(logs_retry(&ctx, log.id).await.is_err());
    }
}
