//! Rule resolution.
//!
//! Selects the active rules matching `(tenant, event type, org unit)`,
//! ordered `(priority desc, updated_at asc)`. Circuit state is read here
//! and open rules are returned flagged, not filtered; the delivery
//! executor makes the short-circuit decision.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::domain::errors::DomainResult;
use crate::domain::models::{IntegrationRule, ScopePolicy};
use crate::domain::ports::{OrgUnitRepository, RuleRepository};

use super::circuit_breaker::{CircuitBreakerRegistry, CircuitState};

/// A matched rule with its current circuit flag.
#[derive(Debug, Clone)]
pub struct ResolvedRule {
    pub rule: IntegrationRule,
    pub circuit_open: bool,
}

struct CachedRules {
    rules: Vec<IntegrationRule>,
    loaded_at: DateTime<Utc>,
}

/// Resolves events to the rules that should fire for them.
pub struct RuleResolver {
    rules: Arc<dyn RuleRepository>,
    org_units: Arc<dyn OrgUnitRepository>,
    breakers: Arc<CircuitBreakerRegistry>,
    cache: RwLock<HashMap<String, CachedRules>>,
    cache_max_age: Duration,
}

impl RuleResolver {
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        org_units: Arc<dyn OrgUnitRepository>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            rules,
            org_units,
            breakers,
            cache: RwLock::new(HashMap::new()),
            cache_max_age: Duration::seconds(30),
        }
    }

    /// Resolve the ordered list of rules for an event.
    pub async fn resolve(
        &self,
        tenant: &str,
        event_type: &str,
        org_unit: Option<&str>,
    ) -> DomainResult<Vec<ResolvedRule>> {
        let rules = self.live_rules(tenant).await?;

        let mut resolved = Vec::new();
        for rule in rules {
            if !rule.matches_event_type(event_type) {
                continue;
            }
            if !self.scope_matches(&rule, tenant, org_unit).await? {
                continue;
            }

            let circuit_open =
                self.breakers.state(rule.id).await == CircuitState::Open;
            resolved.push(ResolvedRule { rule, circuit_open });
        }

        Ok(resolved)
    }

    async fn scope_matches(
        &self,
        rule: &IntegrationRule,
        tenant: &str,
        org_unit: Option<&str>,
    ) -> DomainResult<bool> {
        if let Some(unit) = org_unit {
            if rule.scope.excludes.iter().any(|e| e == unit) {
                return Ok(false);
            }
        }

        match rule.scope.policy {
            ScopePolicy::All => Ok(true),
            ScopePolicy::SelfOnly => {
                Ok(rule.scope.org_unit.as_deref() == org_unit)
            }
            ScopePolicy::IncludeChildren => {
                let Some(anchor) = rule.scope.org_unit.as_deref() else {
                    // No anchor configured behaves like ALL.
                    return Ok(true);
                };
                let Some(unit) = org_unit else {
                    return Ok(false);
                };
                if unit == anchor {
                    return Ok(true);
                }
                let descendants = self.org_units.descendants(tenant, anchor).await?;
                Ok(descendants.iter().any(|d| d == unit))
            }
        }
    }

    async fn live_rules(&self, tenant: &str) -> DomainResult<Vec<IntegrationRule>> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(tenant) {
                if Utc::now() - entry.loaded_at < self.cache_max_age {
                    return Ok(entry.rules.clone());
                }
            }
        }

        let rules = self.rules.list_live_for_tenant(tenant).await?;
        self.cache.write().await.insert(
            tenant.to_string(),
            CachedRules { rules: rules.clone(), loaded_at: Utc::now() },
        );
        Ok(rules)
    }

    /// Drop the cached rules for a tenant after a config change.
    pub async fn invalidate(&self, tenant: &str) {
        self.cache.write().await.remove(tenant);
    }

    /// Drop the whole cache.
    pub async fn invalidate_all(&self) {
        self.cache.write().await.clear();
    }
}
