//! Payload transformation.
//!
//! Builds the outbound request body from an event payload: passthrough,
//! declarative field mapping, or a sandboxed script, followed by an
//! optional lookup pass.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::domain::models::failure::DeliveryError;
use crate::domain::models::{FieldMapping, MapFunction, MappingSpec, TransformSpec};

use super::json_path::{get_value, set_value};
use super::lookup_mapper::LookupMapper;
use super::sandbox::{ScriptContext, ScriptSandbox};

/// Applies a rule's transformation to an event payload.
pub struct Transformer {
    sandbox: ScriptSandbox,
    lookups: Arc<LookupMapper>,
}

impl Transformer {
    pub fn new(sandbox: ScriptSandbox, lookups: Arc<LookupMapper>) -> Self {
        Self { sandbox, lookups }
    }

    /// Produce the outbound body for one action.
    pub async fn transform(
        &self,
        spec: &TransformSpec,
        lookup: Option<&crate::domain::models::LookupSpec>,
        payload: &Value,
        context: &ScriptContext,
        org_unit: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Value, DeliveryError> {
        let mut body = match spec {
            TransformSpec::Passthrough => payload.clone(),
            TransformSpec::Mapping(mapping) => apply_mapping(mapping, payload)?,
            TransformSpec::Script { source } => {
                let mut context = context.clone();
                context.lookups =
                    Arc::new(self.lookups.snapshot(&context.tenant, org_unit).await?);
                self.sandbox.run_transform(source, payload, &context, now)?
            }
        };

        if let Some(lookup_spec) = lookup {
            body = self
                .lookups
                .apply(lookup_spec, body, &context.tenant, org_unit)
                .await?;
        }

        Ok(body)
    }
}

/// Apply a declarative mapping. Field mappings run in order against the
/// source payload into a fresh object; static fields are merged last.
pub fn apply_mapping(spec: &MappingSpec, payload: &Value) -> Result<Value, DeliveryError> {
    let mut out = Value::Object(Map::new());

    for field in &spec.fields {
        let value = match get_value(payload, &field.source_path) {
            Some(v) if !v.is_null() => Some(v),
            _ => None,
        };

        let value = match (value, &field.default_value) {
            (Some(v), _) => Some(apply_function(field, v)?),
            (None, Some(default)) => Some(default.clone()),
            (None, None) if field.required => {
                return Err(DeliveryError::config(format!(
                    "Required field '{}' is missing from the payload",
                    field.source_path
                )));
            }
            (None, None) => None,
        };

        if let Some(v) = value {
            set_value(&mut out, &field.target_path, v);
        }
    }

    for field in &spec.static_fields {
        set_value(&mut out, &field.target_path, field.value.clone());
    }

    Ok(out)
}

fn apply_function(field: &FieldMapping, value: Value) -> Result<Value, DeliveryError> {
    let Some(function) = &field.function else {
        return Ok(value);
    };

    match function {
        MapFunction::Trim => map_string(field, value, |s| s.trim().to_string()),
        MapFunction::Upper => map_string(field, value, |s| s.to_uppercase()),
        MapFunction::Lower => map_string(field, value, |s| s.to_lowercase()),
        MapFunction::FormatDate { format } => {
            let formatted = format_date(&value, format).ok_or_else(|| {
                DeliveryError::config(format!(
                    "Field '{}' is not a date that can be formatted",
                    field.source_path
                ))
            })?;
            Ok(Value::String(formatted))
        }
        MapFunction::Default => {
            if value.is_null() {
                Ok(field.default_value.clone().unwrap_or(Value::Null))
            } else {
                Ok(value)
            }
        }
    }
}

fn map_string(
    field: &FieldMapping,
    value: Value,
    f: impl Fn(&str) -> String + Copy,
) -> Result<Value, DeliveryError> {
    match value {
        Value::String(s) => Ok(Value::String(f(&s))),
        // Array paths transform element-wise.
        Value::Array(items) => items
            .into_iter()
            .map(|item| map_string(field, item, f))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Null => Ok(Value::Null),
        other => Err(DeliveryError::config(format!(
            "Field '{}' expected a string, got {other}",
            field.source_path
        ))),
    }
}

fn format_date(value: &Value, format: &str) -> Option<String> {
    let dt: DateTime<Utc> = match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok()?.with_timezone(&Utc),
        Value::Number(n) => DateTime::from_timestamp_millis(n.as_i64()?)?,
        _ => return None,
    };
    Some(dt.format(format).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ErrorCategory, StaticField};
    use serde_json::json;

    fn field(source: &str, target: &str) -> FieldMapping {
        FieldMapping {
            source_path: source.to_string(),
            target_path: target.to_string(),
            function: None,
            default_value: None,
            required: false,
        }
    }

    #[test]
    fn maps_fields_and_drops_the_rest() {
        let spec = MappingSpec {
            fields: vec![field("orderId", "id"), field("total", "amount")],
            static_fields: vec![],
        };
        let out = apply_mapping(&spec, &json!({"orderId": "A1", "total": 99.5, "extra": "ignore"})).unwrap();
        assert_eq!(out, json!({"id": "A1", "amount": 99.5}));
    }

    #[test]
    fn mapping_is_deterministic() {
        let spec = MappingSpec {
            fields: vec![field("a", "x.y"), field("b", "x.z")],
            static_fields: vec![],
        };
        let payload = json!({"a": 1, "b": 2});
        assert_eq!(apply_mapping(&spec, &payload).unwrap(), apply_mapping(&spec, &payload).unwrap());
    }

    #[test]
    fn required_field_missing_is_config_error() {
        let mut f = field("missing", "out");
        f.required = true;
        let spec = MappingSpec { fields: vec![f], static_fields: vec![] };
        let err = apply_mapping(&spec, &json!({})).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Config);
    }

    #[test]
    fn default_value_fills_missing_fields() {
        let mut f = field("missing", "out");
        f.default_value = Some(json!("fallback"));
        let spec = MappingSpec { fields: vec![f], static_fields: vec![] };
        let out = apply_mapping(&spec, &json!({})).unwrap();
        assert_eq!(out, json!({"out": "fallback"}));
    }

    #[test]
    fn functions_apply_to_strings() {
        let mut upper = field("name", "name");
        upper.function = Some(MapFunction::Upper);
        let mut trim = field("code", "code");
        trim.function = Some(MapFunction::Trim);
        let spec = MappingSpec { fields: vec![upper, trim], static_fields: vec![] };

        let out = apply_mapping(&spec, &json!({"name": "ada", "code": "  x1  "})).unwrap();
        assert_eq!(out, json!({"name": "ADA", "code": "x1"}));
    }

    #[test]
    fn functions_apply_element_wise_on_array_paths() {
        let mut f = field("items[].code", "items[].code");
        f.function = Some(MapFunction::Lower);
        let spec = MappingSpec { fields: vec![f], static_fields: vec![] };

        let out = apply_mapping(&spec, &json!({"items": [{"code": "AA"}, {"code": "BB"}]})).unwrap();
        assert_eq!(out, json!({"items": [{"code": "aa"}, {"code": "bb"}]}));
    }

    #[test]
    fn format_date_handles_rfc3339_and_epoch_ms() {
        let mut f = field("at", "date");
        f.function = Some(MapFunction::FormatDate { format: "%Y-%m-%d".to_string() });
        let spec = MappingSpec { fields: vec![f], static_fields: vec![] };

        let out = apply_mapping(&spec, &json!({"at": "2026-03-04T10:20:30+00:00"})).unwrap();
        assert_eq!(out, json!({"date": "2026-03-04"}));

        let out = apply_mapping(&spec, &json!({"at": 86_400_000})).unwrap();
        assert_eq!(out, json!({"date": "1970-01-02"}));
    }

    #[test]
    fn static_fields_are_merged_last() {
        let spec = MappingSpec {
            fields: vec![field("a", "a")],
            static_fields: vec![StaticField { target_path: "meta.source".into(), value: json!("gateway") }],
        };
        let out = apply_mapping(&spec, &json!({"a": 1})).unwrap();
        assert_eq!(out, json!({"a": 1, "meta": {"source": "gateway"}}));
    }

    #[test]
    fn non_string_input_to_string_function_is_config_error() {
        let mut f = field("n", "n");
        f.function = Some(MapFunction::Upper);
        let spec = MappingSpec { fields: vec![f], static_fields: vec![] };
        let err = apply_mapping(&spec, &json!({"n": 5})).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Config);
    }
}
