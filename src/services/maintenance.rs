//! Background maintenance.
//!
//! Emulates the store's TTL indexes: purges the dedup seen-set (6 h), the
//! event audit (90 d), and terminal pushed events (7 d) on a slow loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::domain::errors::DomainResult;
use crate::domain::ports::PendingEventRepository;

use super::dedup::DedupService;

/// TTL on terminal pushed events.
const PENDING_TTL_DAYS: i64 = 7;

pub struct MaintenanceLoop {
    dedup: Arc<DedupService>,
    pending_events: Arc<dyn PendingEventRepository>,
    interval: Duration,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceLoop {
    pub fn new(
        dedup: Arc<DedupService>,
        pending_events: Arc<dyn PendingEventRepository>,
        interval: Duration,
    ) -> Self {
        Self {
            dedup,
            pending_events,
            interval,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub async fn run_once(&self) -> DomainResult<()> {
        let (dedup_purged, audit_purged) = self.dedup.purge_expired().await?;
        let pending_purged = self
            .pending_events
            .purge_terminal_older_than(Utc::now() - chrono::Duration::days(PENDING_TTL_DAYS))
            .await?;

        if dedup_purged + audit_purged + pending_purged > 0 {
            tracing::debug!(
                dedup_purged,
                audit_purged,
                pending_purged,
                "Maintenance purge complete"
            );
        }
        Ok(())
    }

    pub async fn start(self: Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let this = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            while this.running.load(Ordering::SeqCst) {
                interval.tick().await;
                if let Err(e) = this.run_once().await {
                    tracing::error!(error = %e, "Maintenance pass failed");
                }
            }
        });
        *self.handle.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
    }
}
