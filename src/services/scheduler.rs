//! Scheduled-delivery engine.
//!
//! For rules with a non-immediate delivery mode, evaluates the rule's
//! scheduling script against the inbound event to compute firing times,
//! persists them, and releases each at its due time back into the
//! delivery executor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::domain::errors::DomainResult;
use crate::domain::models::failure::DeliveryError;
use crate::domain::models::{
    DeliveryMode, Event, IntegrationRule, LogStatus, RecurrencePlan, ScheduleStatus,
    ScheduledDelivery, SchedulerConfig, TriggerType,
};
use crate::domain::ports::{RuleRepository, ScheduledDeliveryRepository};

use super::delivery::{event_from_snapshot, DeliveryExecutor};
use super::sandbox::{ScheduleOutcome, ScriptSandbox};

pub struct DeliveryScheduler {
    schedules: Arc<dyn ScheduledDeliveryRepository>,
    rules: Arc<dyn RuleRepository>,
    executor: Arc<DeliveryExecutor>,
    sandbox: ScriptSandbox,
    config: SchedulerConfig,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryScheduler {
    pub fn new(
        schedules: Arc<dyn ScheduledDeliveryRepository>,
        rules: Arc<dyn RuleRepository>,
        executor: Arc<DeliveryExecutor>,
        sandbox: ScriptSandbox,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            schedules,
            rules,
            executor,
            sandbox,
            config,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Evaluate the rule's scheduling script for an event and persist the
    /// resulting delivery. Returns the created row.
    pub async fn plan(
        &self,
        rule: &IntegrationRule,
        event: &Event,
    ) -> Result<ScheduledDelivery, DeliveryError> {
        debug_assert!(rule.delivery_mode.is_scheduled());

        let script = rule.schedule_script.as_deref().ok_or_else(|| {
            DeliveryError::config(format!(
                "Rule '{}' has delivery mode {} but no scheduling script",
                rule.name,
                rule.delivery_mode.as_str()
            ))
        })?;

        let outcome = self.sandbox.run_schedule(script, &event.payload, Utc::now())?;

        let delivery = match (rule.delivery_mode, outcome) {
            (DeliveryMode::Delayed, ScheduleOutcome::At(due_at)) => ScheduledDelivery::new(
                rule.id,
                rule.tenant.clone(),
                event.id.clone(),
                event.event_type.clone(),
                event.payload.clone(),
                due_at,
            )
            .with_org_unit(event.org_unit.clone()),
            (DeliveryMode::Recurring, ScheduleOutcome::Recurring { first, interval_ms, max_occurrences }) => {
                ScheduledDelivery::new(
                    rule.id,
                    rule.tenant.clone(),
                    event.id.clone(),
                    event.event_type.clone(),
                    event.payload.clone(),
                    first,
                )
                .with_org_unit(event.org_unit.clone())
                .with_recurrence(RecurrencePlan { interval_ms, max_occurrences })
            }
            (mode, outcome) => {
                return Err(DeliveryError::config(format!(
                    "Scheduling script returned {} for a {} rule",
                    match outcome {
                        ScheduleOutcome::At(_) => "a single timestamp",
                        ScheduleOutcome::Recurring { .. } => "a recurrence plan",
                    },
                    mode.as_str()
                )));
            }
        };

        self.schedules
            .create(&delivery)
            .await
            .map_err(|e| DeliveryError::config(format!("Schedule persistence failed: {e}")))?;

        tracing::info!(
            rule_id = %rule.id,
            delivery_id = %delivery.id,
            due_at = %delivery.due_at,
            "Scheduled delivery planned"
        );
        Ok(delivery)
    }

    pub async fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let scheduler = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(scheduler.config.interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            while scheduler.running.load(Ordering::SeqCst) {
                interval.tick().await;
                if let Err(e) = scheduler.tick().await {
                    tracing::error!(error = %e, "Scheduler tick failed");
                }
            }
        });
        *self.handle.lock().await = Some(handle);
        tracing::info!(interval_ms = self.config.interval_ms, "Scheduler started");
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().await.take() {
            if tokio::time::timeout(Duration::from_secs(30), handle).await.is_err() {
                tracing::warn!("Scheduler drain deadline exceeded");
            }
        }
    }

    /// One tick: watchdog reset, then claim and fire due entries.
    pub async fn tick(&self) -> DomainResult<()> {
        let now = Utc::now();

        let stuck_cutoff =
            now - chrono::Duration::milliseconds(self.config.processing_timeout_ms as i64);
        let reset = self.schedules.reset_stuck_processing(stuck_cutoff).await?;
        if reset > 0 {
            tracing::warn!(count = reset, "Watchdog reset stuck PROCESSING schedules to PENDING");
        }

        let claimed = self.schedules.claim_due(now, self.config.batch_size).await?;
        for delivery in claimed {
            self.fire(delivery).await?;
        }

        Ok(())
    }

    /// Fire one claimed entry and write its terminal state. A failed
    /// occurrence is terminal for that occurrence only; the next occurrence
    /// of a recurring plan is scheduled independently.
    async fn fire(&self, delivery: ScheduledDelivery) -> DomainResult<()> {
        let rule = self.rules.get(delivery.rule_id).await?;

        let Some(rule) = rule.filter(IntegrationRule::is_live) else {
            tracing::warn!(delivery_id = %delivery.id, "Rule gone; cancelling scheduled delivery");
            self.schedules.complete(delivery.id, ScheduleStatus::Cancelled).await?;
            return Ok(());
        };

        let event = event_from_snapshot(
            &delivery.tenant,
            &delivery.event_id,
            &delivery.event_type,
            delivery.org_unit.clone(),
            delivery.payload.clone(),
        );

        let logs = self.executor.deliver(&rule, &event, TriggerType::Scheduled).await?;
        let succeeded = logs.iter().all(|l| l.status == LogStatus::Success);

        let status = if succeeded { ScheduleStatus::Done } else { ScheduleStatus::Failed };
        self.schedules.complete(delivery.id, status).await?;

        if let Some(next) = delivery.next_occurrence() {
            self.schedules.create(&next).await?;
            tracing::info!(
                delivery_id = %delivery.id,
                next_id = %next.id,
                occurrence = next.occurrence,
                due_at = %next.due_at,
                "Next recurrence scheduled"
            );
        }

        Ok(())
    }

    /// Cancel `PENDING` entries past their due time plus the grace window.
    /// Run by the operator cleanup command.
    pub async fn cancel_overdue(&self) -> DomainResult<u64> {
        let cutoff = Utc::now() - chrono::Duration::hours(i64::from(self.config.grace_hours));
        let cancelled = self.schedules.cancel_overdue(cutoff).await?;
        if cancelled > 0 {
            tracing::info!(
                count = cancelled,
                grace_hours = self.config.grace_hours,
                category = "SCHEDULED_TIME_PASSED",
                "Cancelled overdue scheduled deliveries"
            );
        }
        Ok(cancelled)
    }
}
