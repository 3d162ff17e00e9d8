//! Retry and dead-letter worker.
//!
//! Periodically scans the execution logs for deliveries eligible for
//! retry and re-queues them through the executor. Backoff is exponential
//! with full jitter. Terminal failures are promoted to the DLQ by the
//! executor on the final attempt; stuck RETRYING rows are reset by a
//! watchdog.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;

use crate::domain::errors::DomainResult;
use crate::domain::models::failure::{DeliveryError, ErrorCategory};
use crate::domain::models::{ExecutionLog, IntegrationRule, TriggerType, WorkerConfig};
use crate::domain::ports::{ExecutionLogRepository, RuleRepository};

use super::delivery::DeliveryExecutor;

/// Log retention enforced by the worker's purge pass.
const LOG_RETENTION_DAYS: i64 = 90;

/// Exponential backoff with full jitter:
/// `min(cap, base * 2^attempt) * rand(0.5, 1.0)`.
pub fn backoff_with_jitter(base_ms: u64, attempt: u32, cap_ms: u64) -> Duration {
    let exp = base_ms
        .max(1)
        .saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)))
        .min(cap_ms);
    let factor = rand::thread_rng().gen_range(0.5..=1.0);
    Duration::from_millis((exp as f64 * factor) as u64)
}

/// Deterministic upper bound of the backoff, used for eligibility.
fn backoff_ceiling_ms(base_ms: u64, attempt: u32, cap_ms: u64) -> u64 {
    base_ms
        .max(1)
        .saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)))
        .min(cap_ms)
}

pub struct RetryWorker {
    logs: Arc<dyn ExecutionLogRepository>,
    rules: Arc<dyn RuleRepository>,
    executor: Arc<DeliveryExecutor>,
    config: WorkerConfig,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetryWorker {
    pub fn new(
        logs: Arc<dyn ExecutionLogRepository>,
        rules: Arc<dyn RuleRepository>,
        executor: Arc<DeliveryExecutor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            logs,
            rules,
            executor,
            config,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub async fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let worker = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(worker.config.interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            while worker.running.load(Ordering::SeqCst) {
                interval.tick().await;
                if let Err(e) = worker.scan().await {
                    tracing::error!(error = %e, "Retry scan failed");
                }
            }
        });
        *self.handle.lock().await = Some(handle);
        tracing::info!(interval_ms = self.config.interval_ms, "Retry worker started");
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().await.take() {
            if tokio::time::timeout(Duration::from_secs(30), handle).await.is_err() {
                tracing::warn!("Retry worker drain deadline exceeded");
            }
        }
    }

    /// One scan: watchdog reset, retention purge, then re-queue eligible
    /// deliveries under a concurrency cap.
    pub async fn scan(&self) -> DomainResult<()> {
        let now = Utc::now();

        let stuck_cutoff = now - chrono::Duration::milliseconds(self.config.processing_timeout_ms as i64);
        let reset = self.logs.reset_stuck_retrying(stuck_cutoff).await?;
        if reset > 0 {
            tracing::warn!(count = reset, "Watchdog reset stuck RETRYING logs to FAILED");
        }

        let purged = self
            .logs
            .purge_older_than(now - chrono::Duration::days(LOG_RETENTION_DAYS))
            .await?;
        if purged > 0 {
            tracing::debug!(count = purged, "Purged expired execution logs");
        }

        let candidates = self.logs.find_retry_candidates(self.config.batch_size).await?;
        if candidates.is_empty() {
            return Ok(());
        }

        let eligible: Vec<ExecutionLog> =
            candidates.into_iter().filter(|log| self.is_due(log, now)).collect();

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_batches as usize));
        let mut joins = Vec::new();

        for log in eligible {
            let permit = Arc::clone(&semaphore).acquire_owned().await.expect("semaphore open");
            let worker_logs = Arc::clone(&self.logs);
            let worker_rules = Arc::clone(&self.rules);
            let executor = Arc::clone(&self.executor);

            joins.push(tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = retry_one(&worker_logs, &worker_rules, &executor, log).await {
                    tracing::error!(error = %e, "Retry attempt failed");
                }
            }));
        }

        for join in joins {
            let _ = join.await;
        }

        Ok(())
    }

    /// Backoff eligibility: `last_attempt_at + backoff(attempt) <= now`,
    /// honouring a server-supplied Retry-After when present.
    fn is_due(&self, log: &ExecutionLog, now: DateTime<Utc>) -> bool {
        let Some(last_attempt) = log.last_attempt_at else {
            return true;
        };

        let mut wait_ms =
            backoff_ceiling_ms(1_000, log.attempt_count, self.config.backoff_cap_ms);
        if let Some(retry_after) = log.error.as_ref().and_then(|e| e.retry_after_secs) {
            wait_ms = wait_ms.max(retry_after * 1_000);
        }

        last_attempt + chrono::Duration::milliseconds(wait_ms as i64) <= now
    }
}

async fn retry_one(
    logs: &Arc<dyn ExecutionLogRepository>,
    rules: &Arc<dyn RuleRepository>,
    executor: &Arc<DeliveryExecutor>,
    mut log: ExecutionLog,
) -> DomainResult<()> {
    let rule = rules.get(log.rule_id).await?;

    let Some(rule) = rule.filter(IntegrationRule::is_live) else {
        // The rule vanished or was paused; nothing sane can be retried.
        log.mark_skipped(DeliveryError::new(
            ErrorCategory::Config,
            "RULE_GONE",
            "Rule deleted or paused; retry abandoned",
        ));
        logs.update(&log).await?;
        return Ok(());
    };

    // Apply the rule's own backoff base now that the rule is loaded: a
    // candidate that is too early under the rule-specific base gets a
    // second eligibility check here.
    if let Some(last_attempt) = log.last_attempt_at {
        let wait = backoff_with_jitter(rule.retry_backoff_ms, log.attempt_count, 300_000);
        let due_at =
            last_attempt + chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::zero());
        if due_at > Utc::now() {
            return Ok(());
        }
    }

    let action = rule
        .effective_actions()
        .into_iter()
        .find(|a| match &log.action {
            Some(name) => &a.name == name,
            None => true,
        });

    let Some(action) = action else {
        log.mark_skipped(DeliveryError::new(
            ErrorCategory::Config,
            "ACTION_GONE",
            "Rule action removed; retry abandoned",
        ));
        logs.update(&log).await?;
        return Ok(());
    };

    log.trigger = TriggerType::Retry;
    tracing::info!(
        log_id = %log.id,
        rule_id = %rule.id,
        attempt = log.attempt_count + 1,
        "Re-queueing delivery"
    );

    let org_unit = log.org_unit.clone();
    executor.attempt(&rule, &action, org_unit.as_deref(), &mut log).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_in_band() {
        for attempt in 1..6 {
            let ceiling = backoff_ceiling_ms(1_000, attempt, 300_000);
            for _ in 0..50 {
                let d = backoff_with_jitter(1_000, attempt, 300_000);
                let ms = d.as_millis() as u64;
                assert!(ms >= ceiling / 2, "jitter below half: {ms} < {}", ceiling / 2);
                assert!(ms <= ceiling, "jitter above ceiling: {ms} > {ceiling}");
            }
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_ceiling_ms(1_000, 1, 300_000), 1_000);
        assert_eq!(backoff_ceiling_ms(1_000, 2, 300_000), 2_000);
        assert_eq!(backoff_ceiling_ms(1_000, 3, 300_000), 4_000);
        assert_eq!(backoff_ceiling_ms(1_000, 10, 300_000), 300_000);
    }
}
