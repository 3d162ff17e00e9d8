//! Post-transformation code mapping.
//!
//! Substitutes source-system codes with target-system codes by
//! `(tenant, org_unit, lookup_type)`. Array notation iterates element-wise:
//! `items[].serviceCode -> items[].lisCode`.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::models::failure::DeliveryError;
use crate::domain::models::{LookupSpec, UnmappedBehavior};
use crate::domain::ports::LookupRepository;

use super::json_path::{get_value, set_value};

/// Applies a rule's lookup spec to a transformed body.
pub struct LookupMapper {
    repository: Arc<dyn LookupRepository>,
}

impl LookupMapper {
    pub fn new(repository: Arc<dyn LookupRepository>) -> Self {
        Self { repository }
    }

    /// Build the lookup table handed to transformation scripts: tenant-wide
    /// mappings overlaid with the event's org-unit-specific ones.
    pub async fn snapshot(
        &self,
        tenant: &str,
        org_unit: Option<&str>,
    ) -> Result<super::sandbox::LookupTable, DeliveryError> {
        let all = self
            .repository
            .list_for_tenant(tenant)
            .await
            .map_err(|e| DeliveryError::config(format!("Lookup store error: {e}")))?;

        let mut table = super::sandbox::LookupTable::new();
        for pass_org_specific in [false, true] {
            for lookup in all.iter().filter(|l| l.active) {
                let org_specific = lookup.org_unit.is_some();
                if org_specific != pass_org_specific {
                    continue;
                }
                if org_specific && lookup.org_unit.as_deref() != org_unit {
                    continue;
                }
                table
                    .entry(lookup.lookup_type.clone())
                    .or_default()
                    .insert(lookup.source_code.clone(), lookup.target_code.clone());
            }
        }
        Ok(table)
    }

    pub async fn apply(
        &self,
        spec: &LookupSpec,
        mut body: Value,
        tenant: &str,
        org_unit: Option<&str>,
    ) -> Result<Value, DeliveryError> {
        for field in &spec.fields {
            let Some(source) = get_value(&body, &field.source_path) else {
                continue;
            };

            let mapped = self
                .map_value(source, field, spec.unmapped_behavior, tenant, org_unit)
                .await?;
            set_value(&mut body, &field.target_path, mapped);
        }

        Ok(body)
    }

    async fn map_value(
        &self,
        value: Value,
        field: &crate::domain::models::LookupField,
        behavior: UnmappedBehavior,
        tenant: &str,
        org_unit: Option<&str>,
    ) -> Result<Value, DeliveryError> {
        match value {
            // Array paths map element-wise, preserving positions.
            Value::Array(items) => {
                let mut mapped = Vec::with_capacity(items.len());
                for item in items {
                    mapped.push(
                        Box::pin(self.map_value(item, field, behavior, tenant, org_unit)).await?,
                    );
                }
                Ok(Value::Array(mapped))
            }
            Value::String(code) => {
                let found = self
                    .repository
                    .find(tenant, org_unit, &field.lookup_type, &code)
                    .await
                    .map_err(|e| DeliveryError::config(format!("Lookup store error: {e}")))?;

                match found {
                    Some(lookup) => Ok(Value::String(lookup.target_code)),
                    None => match behavior {
                        UnmappedBehavior::Passthrough => Ok(Value::String(code)),
                        UnmappedBehavior::Default => Ok(field
                            .default_value
                            .clone()
                            .unwrap_or(Value::String(code))),
                        UnmappedBehavior::Fail => Err(DeliveryError::config(format!(
                            "No {} mapping for code '{code}'",
                            field.lookup_type
                        ))),
                    },
                }
            }
            Value::Null => Ok(Value::Null),
            other => Ok(other),
        }
    }
}
