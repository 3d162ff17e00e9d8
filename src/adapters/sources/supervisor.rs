//! Source supervisor.
//!
//! Watches adapter heartbeats and restarts sources whose tick loop has
//! stalled past the configured threshold.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::domain::ports::{EventHandler, EventSource};

pub struct SourceSupervisor {
    sources: Vec<Arc<dyn EventSource>>,
    handler: Arc<dyn EventHandler>,
    heartbeat_timeout: Duration,
    check_interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SourceSupervisor {
    pub fn new(
        sources: Vec<Arc<dyn EventSource>>,
        handler: Arc<dyn EventHandler>,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            sources,
            handler,
            heartbeat_timeout,
            check_interval: Duration::from_secs(10),
            handle: Mutex::new(None),
        }
    }

    /// Start all sources, then begin watching their heartbeats.
    pub async fn start(self: Arc<Self>) -> crate::domain::errors::DomainResult<()> {
        for source in &self.sources {
            source.start(Arc::clone(&self.handler)).await?;
        }

        let supervisor = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(supervisor.check_interval);
            loop {
                interval.tick().await;
                supervisor.check_heartbeats().await;
            }
        });
        *self.handle.lock().await = Some(handle);

        Ok(())
    }

    async fn check_heartbeats(&self) {
        let threshold = chrono::Duration::from_std(self.heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        for source in &self.sources {
            let Some(heartbeat) = source.last_heartbeat() else {
                continue;
            };
            if Utc::now() - heartbeat > threshold {
                tracing::warn!(source = source.name(), "Source heartbeat stale; restarting");
                if let Err(e) = source.stop().await {
                    tracing::error!(source = source.name(), error = %e, "Stale source stop failed");
                }
                if let Err(e) = source.start(Arc::clone(&self.handler)).await {
                    tracing::error!(source = source.name(), error = %e, "Stale source restart failed");
                }
            }
        }
    }

    /// Stop the watcher, then drain every source.
    pub async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
        for source in &self.sources {
            if let Err(e) = source.stop().await {
                tracing::error!(source = source.name(), error = %e, "Source stop failed");
            }
        }
    }
}
