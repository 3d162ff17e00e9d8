//! Bounded evaluator for user-supplied transformation and scheduling
//! scripts.
//!
//! Each invocation gets a fresh engine with an operation cap, a wall-clock
//! guard, and size limits; no I/O or ambient clock is reachable from
//! scripts. `now` is injected by the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use rhai::{Dynamic, Engine, Map, Scope};
use serde_json::Value;

use crate::domain::models::failure::DeliveryError;

/// Code tables exposed to transformation scripts: lookup type to
/// source-code/target-code pairs.
pub type LookupTable = HashMap<String, HashMap<String, String>>;

/// Resource limits applied to every script invocation.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    /// Deterministic operation cap, the CPU bound.
    pub max_operations: u64,
    /// Wall-clock bound checked during evaluation.
    pub max_wall_ms: u64,
    /// Maximum serialized input payload size.
    pub max_input_bytes: usize,
    /// Maximum serialized result size.
    pub max_output_bytes: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_operations: 25_000_000,
            max_wall_ms: 5_000,
            max_input_bytes: 100 * 1024,
            max_output_bytes: 1024 * 1024,
        }
    }
}

/// Immutable metadata exposed to transformation scripts.
#[derive(Debug, Clone, Default)]
pub struct ScriptContext {
    pub tenant: String,
    pub event_type: String,
    pub rule_id: String,
    pub correlation_id: String,
    /// Snapshot of the tenant's code lookups, reachable from scripts as
    /// `lookup(type, code)`.
    pub lookups: Arc<LookupTable>,
}

/// Outcome of a scheduling script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Single future firing.
    At(DateTime<Utc>),
    /// Recurring plan.
    Recurring { first: DateTime<Utc>, interval_ms: u64, max_occurrences: u32 },
}

/// Sandboxed script evaluator.
#[derive(Debug, Clone)]
pub struct ScriptSandbox {
    limits: SandboxLimits,
}

impl ScriptSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    fn build_engine(&self) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_operations(self.limits.max_operations);
        engine.set_max_call_levels(32);
        engine.set_max_expr_depths(64, 64);
        engine.set_max_string_size(self.limits.max_output_bytes);
        engine.set_max_array_size(100_000);
        engine.set_max_map_size(100_000);

        let deadline = Instant::now() + std::time::Duration::from_millis(self.limits.max_wall_ms);
        engine.on_progress(move |_ops| {
            if Instant::now() > deadline {
                Some("wall clock limit exceeded".into())
            } else {
                None
            }
        });

        // Date helpers available to scheduling scripts. Timestamps are epoch
        // milliseconds.
        engine.register_fn("addHours", |ts: i64, hours: i64| ts + hours * 3_600_000);
        engine.register_fn("subtractHours", |ts: i64, hours: i64| ts - hours * 3_600_000);
        engine.register_fn("parseDate", parse_date_ms);
        engine.register_fn("toTimestamp", parse_date_ms);

        engine
    }

    fn check_input_size(&self, payload: &Value) -> Result<(), DeliveryError> {
        let size = serde_json::to_string(payload).map(|s| s.len()).unwrap_or(usize::MAX);
        if size > self.limits.max_input_bytes {
            return Err(DeliveryError::script(format!(
                "Script input of {size} bytes exceeds the {} byte limit",
                self.limits.max_input_bytes
            )));
        }
        Ok(())
    }

    fn check_output_size(&self, result: &Value) -> Result<(), DeliveryError> {
        let size = serde_json::to_string(result).map(|s| s.len()).unwrap_or(usize::MAX);
        if size > self.limits.max_output_bytes {
            return Err(DeliveryError::script(format!(
                "Script result of {size} bytes exceeds the {} byte limit",
                self.limits.max_output_bytes
            )));
        }
        Ok(())
    }

    /// Run a transformation script: either a `transform(payload, context)`
    /// function or a bare expression over `payload` and `context`.
    pub fn run_transform(
        &self,
        source: &str,
        payload: &Value,
        context: &ScriptContext,
        now: DateTime<Utc>,
    ) -> Result<Value, DeliveryError> {
        self.check_input_size(payload)?;

        let engine = self.build_engine();
        let ast = engine
            .compile(source)
            .map_err(|e| DeliveryError::script(format!("Script compile error: {e}")))?;

        let payload_dyn = rhai::serde::to_dynamic(payload)
            .map_err(|e| DeliveryError::script(format!("Payload conversion failed: {e}")))?;

        let mut engine = engine;
        let lookups = Arc::clone(&context.lookups);
        engine.register_fn("lookup", move |lookup_type: &str, code: &str| -> String {
            lookups
                .get(lookup_type)
                .and_then(|codes| codes.get(code))
                .cloned()
                .unwrap_or_else(|| code.to_string())
        });

        let mut context_map = Map::new();
        context_map.insert("tenant".into(), context.tenant.clone().into());
        context_map.insert("eventType".into(), context.event_type.clone().into());
        context_map.insert("ruleId".into(), context.rule_id.clone().into());
        context_map.insert("correlationId".into(), context.correlation_id.clone().into());
        context_map.insert("now".into(), Dynamic::from(now.timestamp_millis()));
        let context_dyn: Dynamic = context_map.into();

        let has_transform_fn = ast.iter_functions().any(|f| f.name == "transform");

        let result: Dynamic = if has_transform_fn {
            let mut scope = Scope::new();
            engine
                .call_fn(&mut scope, &ast, "transform", (payload_dyn, context_dyn))
                .map_err(|e| DeliveryError::script(format!("Script error: {e}")))?
        } else {
            let mut scope = Scope::new();
            scope.push_dynamic("payload", payload_dyn);
            scope.push_dynamic("context", context_dyn);
            scope.push("now", now.timestamp_millis());
            engine
                .eval_ast_with_scope(&mut scope, &ast)
                .map_err(|e| DeliveryError::script(format!("Script error: {e}")))?
        };

        let value: Value = rhai::serde::from_dynamic(&result)
            .map_err(|e| DeliveryError::script(format!("Script returned an unserialisable value: {e}")))?;

        self.check_output_size(&value)?;
        Ok(value)
    }

    /// Run a scheduling script over the inbound event. The script sees
    /// `event` and `now` (epoch ms) plus the date helpers, and must return
    /// either a timestamp or `#{firstOccurrence, intervalMs, maxOccurrences}`.
    pub fn run_schedule(
        &self,
        source: &str,
        event_payload: &Value,
        now: DateTime<Utc>,
    ) -> Result<ScheduleOutcome, DeliveryError> {
        self.check_input_size(event_payload)?;

        let engine = self.build_engine();
        let ast = engine
            .compile(source)
            .map_err(|e| DeliveryError::script(format!("Schedule script compile error: {e}")))?;

        let event_dyn = rhai::serde::to_dynamic(event_payload)
            .map_err(|e| DeliveryError::script(format!("Event conversion failed: {e}")))?;

        let mut scope = Scope::new();
        scope.push_dynamic("event", event_dyn);
        scope.push("now", now.timestamp_millis());

        let result: Dynamic = engine
            .eval_ast_with_scope(&mut scope, &ast)
            .map_err(|e| DeliveryError::script(format!("Schedule script error: {e}")))?;

        schedule_outcome_from(&result)
    }
}

fn parse_date_ms(s: &str) -> i64 {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.timestamp_millis();
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = d.and_hms_opt(0, 0, 0) {
            return dt.and_utc().timestamp_millis();
        }
    }
    0
}

fn timestamp_from_ms(ms: i64) -> Result<DateTime<Utc>, DeliveryError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DeliveryError::config(format!("Scheduling script produced an invalid timestamp: {ms}")))
}

fn schedule_outcome_from(result: &Dynamic) -> Result<ScheduleOutcome, DeliveryError> {
    if let Some(ms) = result.clone().try_cast::<i64>() {
        return Ok(ScheduleOutcome::At(timestamp_from_ms(ms)?));
    }

    if let Some(map) = result.read_lock::<Map>() {
        let get_int = |key: &str| -> Option<i64> {
            map.get(key).and_then(|v| v.clone().try_cast::<i64>())
        };

        let first = get_int("firstOccurrence").ok_or_else(|| {
            DeliveryError::config("Scheduling script result is missing firstOccurrence")
        })?;
        let interval_ms = get_int("intervalMs").filter(|v| *v > 0).ok_or_else(|| {
            DeliveryError::config("Scheduling script result is missing a positive intervalMs")
        })?;
        let max_occurrences = get_int("maxOccurrences").filter(|v| *v > 0).ok_or_else(|| {
            DeliveryError::config("Scheduling script result is missing a positive maxOccurrences")
        })?;

        return Ok(ScheduleOutcome::Recurring {
            first: timestamp_from_ms(first)?,
            interval_ms: interval_ms as u64,
            max_occurrences: max_occurrences as u32,
        });
    }

    Err(DeliveryError::config(
        "Scheduling script must return a timestamp or #{firstOccurrence, intervalMs, maxOccurrences}",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ErrorCategory;
    use serde_json::json;

    fn sandbox() -> ScriptSandbox {
        ScriptSandbox::new(SandboxLimits::default())
    }

    fn context() -> ScriptContext {
        ScriptContext {
            tenant: "t-1".into(),
            event_type: "ORDER_CREATED".into(),
            rule_id: "r-1".into(),
            correlation_id: "c-1".into(),
            lookups: Arc::new(HashMap::new()),
        }
    }

    #[test]
    fn transform_function_reshapes_payload() {
        let script = r#"
            fn transform(payload, context) {
                #{ id: payload.orderId, amount: payload.total, tenant: context.tenant }
            }
        "#;
        let out = sandbox()
            .run_transform(script, &json!({"orderId": "A1", "total": 99.5}), &context(), Utc::now())
            .unwrap();
        assert_eq!(out, json!({"id": "A1", "amount": 99.5, "tenant": "t-1"}));
    }

    #[test]
    fn bare_expression_sees_payload_in_scope() {
        let out = sandbox()
            .run_transform(r#"#{ doubled: payload.n * 2 }"#, &json!({"n": 21}), &context(), Utc::now())
            .unwrap();
        assert_eq!(out, json!({"doubled": 42}));
    }

    #[test]
    fn lookup_helper_resolves_codes() {
        let mut codes = HashMap::new();
        codes.insert("S1".to_string(), "LIS-1".to_string());
        let mut table = HashMap::new();
        table.insert("service".to_string(), codes);

        let mut ctx = context();
        ctx.lookups = Arc::new(table);

        let out = sandbox()
            .run_transform(
                r#"#{ mapped: lookup("service", payload.code), missing: lookup("service", "S9") }"#,
                &json!({"code": "S1"}),
                &ctx,
                Utc::now(),
            )
            .unwrap();
        assert_eq!(out, json!({"mapped": "LIS-1", "missing": "S9"}));
    }

    #[test]
    fn transform_is_deterministic() {
        let script = r#"fn transform(payload, context) { #{ v: payload.a + payload.b } }"#;
        let payload = json!({"a": 1, "b": 2});
        let a = sandbox().run_transform(script, &payload, &context(), Utc::now()).unwrap();
        let b = sandbox().run_transform(script, &payload, &context(), Utc::now()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn runaway_loop_hits_operation_cap() {
        let sandbox = ScriptSandbox::new(SandboxLimits { max_operations: 10_000, ..Default::default() });
        let err = sandbox
            .run_transform("let x = 0; loop { x += 1; }", &json!({}), &context(), Utc::now())
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Script);
    }

    #[test]
    fn oversized_input_is_rejected() {
        let sandbox = ScriptSandbox::new(SandboxLimits { max_input_bytes: 64, ..Default::default() });
        let big = json!({"blob": "x".repeat(256)});
        let err = sandbox.run_transform("payload", &big, &context(), Utc::now()).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Script);
    }

    #[test]
    fn compile_error_is_script_category() {
        let err = sandbox()
            .run_transform("fn transform(payload", &json!({}), &context(), Utc::now())
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Script);
    }

    #[test]
    fn schedule_returns_single_timestamp() {
        let now = Utc::now();
        let outcome = sandbox().run_schedule("addHours(now, 1)", &json!({}), now).unwrap();
        match outcome {
            ScheduleOutcome::At(at) => {
                assert_eq!(at.timestamp_millis(), now.timestamp_millis() + 3_600_000);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn schedule_returns_recurring_plan() {
        let now = Utc::now();
        let script = r#"#{ firstOccurrence: addHours(now, 2), intervalMs: 60000, maxOccurrences: 5 }"#;
        let outcome = sandbox().run_schedule(script, &json!({}), now).unwrap();
        match outcome {
            ScheduleOutcome::Recurring { first, interval_ms, max_occurrences } => {
                assert_eq!(first.timestamp_millis(), now.timestamp_millis() + 7_200_000);
                assert_eq!(interval_ms, 60_000);
                assert_eq!(max_occurrences, 5);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn schedule_can_read_the_event() {
        let now = Utc::now();
        let outcome = sandbox()
            .run_schedule("now + event.delayMs", &json!({"delayMs": 1000}), now)
            .unwrap();
        assert_eq!(outcome, ScheduleOutcome::At(timestamp_from_ms(now.timestamp_millis() + 1000).unwrap()));
    }

    #[test]
    fn schedule_with_wrong_shape_is_config_error() {
        let err = sandbox().run_schedule(r#""tomorrow""#, &json!({}), Utc::now()).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Config);
    }

    #[test]
    fn date_helpers_parse_both_formats() {
        assert_eq!(parse_date_ms("1970-01-01T00:00:01+00:00"), 1000);
        assert_eq!(parse_date_ms("1970-01-02"), 86_400_000);
        assert_eq!(parse_date_ms("garbage"), 0);
    }
}
