//! Per-rule circuit breaker.
//!
//! Detects repeated delivery failures against one rule and short-circuits
//! further sends until the endpoint recovers. A rule transitions to open
//! after a threshold of consecutive failures inside the failure window;
//! while open, deliveries are skipped; after the open interval a single
//! half-open probe is allowed.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::models::CircuitBreakerPolicy;

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are blocked.
    Open,
    /// Testing recovery with a single probe.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Result of a circuit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    /// Send normally.
    Allow,
    /// Send as the half-open probe.
    AllowProbe,
    /// Short-circuit to SKIPPED.
    Block,
}

impl CircuitDecision {
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Block)
    }
}

#[derive(Debug, Clone)]
struct RuleCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    first_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    open_count: u32,
}

impl RuleCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            first_failure_at: None,
            opened_at: None,
            probe_in_flight: false,
            open_count: 0,
        }
    }

    fn check(&mut self, policy: &CircuitBreakerPolicy, now: DateTime<Utc>) -> CircuitDecision {
        match self.state {
            CircuitState::Closed => CircuitDecision::Allow,
            CircuitState::Open => {
                let open_for = Duration::milliseconds(policy.open_ms as i64);
                match self.opened_at {
                    Some(opened_at) if now > opened_at + open_for => {
                        self.state = CircuitState::HalfOpen;
                        self.probe_in_flight = true;
                        CircuitDecision::AllowProbe
                    }
                    _ => CircuitDecision::Block,
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    CircuitDecision::Block
                } else {
                    self.probe_in_flight = true;
                    CircuitDecision::AllowProbe
                }
            }
        }
    }

    fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.first_failure_at = None;
        self.opened_at = None;
        self.probe_in_flight = false;
    }

    fn record_failure(
        &mut self,
        policy: &CircuitBreakerPolicy,
        failure_window: Duration,
        now: DateTime<Utc>,
    ) {
        match self.state {
            CircuitState::HalfOpen => {
                // The probe failed; reopen.
                self.open(now);
            }
            CircuitState::Open => {}
            CircuitState::Closed => {
                // Failures outside the window start a fresh run.
                if let Some(first) = self.first_failure_at {
                    if now - first > failure_window {
                        self.consecutive_failures = 0;
                        self.first_failure_at = None;
                    }
                }

                if self.first_failure_at.is_none() {
                    self.first_failure_at = Some(now);
                }
                self.consecutive_failures += 1;

                if self.consecutive_failures >= policy.threshold {
                    self.open(now);
                }
            }
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_in_flight = false;
        self.consecutive_failures = 0;
        self.first_failure_at = None;
        self.open_count += 1;
    }
}

/// Process-wide registry of per-rule circuits.
pub struct CircuitBreakerRegistry {
    circuits: RwLock<HashMap<Uuid, RuleCircuit>>,
    /// Window inside which failures count as consecutive.
    failure_window: Duration,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(Duration::seconds(60))
    }
}

impl CircuitBreakerRegistry {
    pub fn new(failure_window: Duration) -> Self {
        Self { circuits: RwLock::new(HashMap::new()), failure_window }
    }

    /// Check whether a delivery for `rule_id` may proceed.
    pub async fn check(&self, rule_id: Uuid, policy: &CircuitBreakerPolicy) -> CircuitDecision {
        let mut circuits = self.circuits.write().await;
        circuits
            .entry(rule_id)
            .or_insert_with(RuleCircuit::new)
            .check(policy, Utc::now())
    }

    pub async fn record_success(&self, rule_id: Uuid) {
        let mut circuits = self.circuits.write().await;
        circuits.entry(rule_id).or_insert_with(RuleCircuit::new).record_success();
    }

    pub async fn record_failure(&self, rule_id: Uuid, policy: &CircuitBreakerPolicy) {
        let mut circuits = self.circuits.write().await;
        circuits
            .entry(rule_id)
            .or_insert_with(RuleCircuit::new)
            .record_failure(policy, self.failure_window, Utc::now());
    }

    /// Current state without mutating transitions.
    pub async fn state(&self, rule_id: Uuid) -> CircuitState {
        self.circuits
            .read()
            .await
            .get(&rule_id)
            .map_or(CircuitState::Closed, |c| c.state)
    }

    /// Times the circuit has opened, for observability.
    pub async fn open_count(&self, rule_id: Uuid) -> u32 {
        self.circuits.read().await.get(&rule_id).map_or(0, |c| c.open_count)
    }

    /// Operator reset.
    pub async fn reset(&self, rule_id: Uuid) {
        self.circuits.write().await.remove(&rule_id);
    }

    /// Clear all state on shutdown.
    pub async fn clear(&self) {
        self.circuits.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CircuitBreakerPolicy {
        CircuitBreakerPolicy { threshold: 5, open_ms: 60_000 }
    }

    #[tokio::test]
    async fn opens_after_threshold_consecutive_failures() {
        let registry = CircuitBreakerRegistry::default();
        let rule_id = Uuid::new_v4();
        let policy = policy();

        for _ in 0..4 {
            registry.record_failure(rule_id, &policy).await;
            assert_eq!(registry.check(rule_id, &policy).await, CircuitDecision::Allow);
        }

        registry.record_failure(rule_id, &policy).await;
        assert_eq!(registry.state(rule_id).await, CircuitState::Open);
        assert_eq!(registry.check(rule_id, &policy).await, CircuitDecision::Block);
    }

    #[tokio::test]
    async fn success_clears_the_failure_run() {
        let registry = CircuitBreakerRegistry::default();
        let rule_id = Uuid::new_v4();
        let policy = policy();

        for _ in 0..4 {
            registry.record_failure(rule_id, &policy).await;
        }
        registry.record_success(rule_id).await;
        for _ in 0..4 {
            registry.record_failure(rule_id, &policy).await;
        }
        assert_eq!(registry.state(rule_id).await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_circuit_probes_after_the_window() {
        let registry = CircuitBreakerRegistry::default();
        let rule_id = Uuid::new_v4();
        // Immediate half-open for the test.
        let policy = CircuitBreakerPolicy { threshold: 1, open_ms: 0 };

        registry.record_failure(rule_id, &policy).await;
        assert_eq!(registry.state(rule_id).await, CircuitState::Open);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // One probe allowed; a second request while the probe is in flight blocks.
        assert_eq!(registry.check(rule_id, &policy).await, CircuitDecision::AllowProbe);
        assert_eq!(registry.check(rule_id, &policy).await, CircuitDecision::Block);

        // Probe success closes the circuit.
        registry.record_success(rule_id).await;
        assert_eq!(registry.state(rule_id).await, CircuitState::Closed);
        assert_eq!(registry.check(rule_id, &policy).await, CircuitDecision::Allow);
    }

    #[tokio::test]
    async fn failed_probe_reopens() {
        let registry = CircuitBreakerRegistry::default();
        let rule_id = Uuid::new_v4();
        let policy = CircuitBreakerPolicy { threshold: 1, open_ms: 0 };

        registry.record_failure(rule_id, &policy).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(registry.check(rule_id, &policy).await, CircuitDecision::AllowProbe);

        registry.record_failure(rule_id, &policy).await;
        assert_eq!(registry.state(rule_id).await, CircuitState::Open);
    }

    #[tokio::test]
    async fn reset_returns_to_closed() {
        let registry = CircuitBreakerRegistry::default();
        let rule_id = Uuid::new_v4();
        let policy = CircuitBreakerPolicy { threshold: 1, open_ms: 60_000 };

        registry.record_failure(rule_id, &policy).await;
        assert_eq!(registry.state(rule_id).await, CircuitState::Open);

        registry.reset(rule_id).await;
        assert_eq!(registry.state(rule_id).await, CircuitState::Closed);
    }
}
