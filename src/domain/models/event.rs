//! Normalised event envelope and deduplication fingerprint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Kind of event source an envelope came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    RelationalPoll,
    PartitionedLog,
    HttpPush,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RelationalPoll => "relational_poll",
            Self::PartitionedLog => "partitioned_log",
            Self::HttpPush => "http_push",
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relational_poll" => Ok(Self::RelationalPoll),
            "partitioned_log" => Ok(Self::PartitionedLog),
            "http_push" => Ok(Self::HttpPush),
            _ => Err(format!("Unknown source kind: {s}")),
        }
    }
}

/// A normalised business event produced by an ingestion adapter.
///
/// The envelope is in-memory after normalisation; accepted events are
/// persisted into the audit store keyed by `(source, source_offset)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Stable event id. Taken from the source when it provides one,
    /// otherwise minted at normalisation time.
    pub id: String,
    pub tenant: String,
    /// Org unit the event is scoped to, when the source knows it.
    pub org_unit: Option<String>,
    pub event_type: String,
    pub payload: Value,
    pub source: SourceKind,
    /// Identifier of the concrete source instance (table name, topic, ...).
    pub source_name: String,
    /// Position within the source: row id, `partition:offset`, or document id.
    pub source_offset: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl Event {
    pub fn new(
        tenant: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        source: SourceKind,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant: tenant.into(),
            org_unit: None,
            event_type: event_type.into(),
            payload,
            source,
            source_name: source_name.into(),
            source_offset: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_org_unit(mut self, org_unit: impl Into<String>) -> Self {
        self.org_unit = Some(org_unit.into());
        self
    }

    pub fn with_source_offset(mut self, offset: impl Into<String>) -> Self {
        self.source_offset = Some(offset.into());
        self
    }

    /// Compute the deduplication fingerprint for this event.
    ///
    /// SHA-256 over `(tenant, event_type, source, source_offset, canonical
    /// payload)`. The payload is canonicalised with lexicographically sorted
    /// object keys so that two semantically identical payloads hash the same
    /// regardless of key order at the source.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.tenant.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.event_type.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.source.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.source_offset.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical_json(&self.payload).as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Serialise a JSON value with object keys in lexicographic order.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event() -> Event {
        Event::new(
            "tenant-100",
            "ORDER_CREATED",
            json!({"orderId": "A1", "total": 99.5}),
            SourceKind::RelationalPoll,
            "orders_table",
        )
        .with_source_offset("42")
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = sample_event();
        let b = sample_event();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let mut a = sample_event();
        let mut b = sample_event();
        a.payload = json!({"x": 1, "y": {"b": 2, "a": 3}});
        b.payload = json!({"y": {"a": 3, "b": 2}, "x": 1});
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_differs_by_offset() {
        let a = sample_event();
        let b = sample_event().with_source_offset("43");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_differs_by_tenant() {
        let a = sample_event();
        let mut b = sample_event();
        b.tenant = "tenant-200".to_string();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn canonical_json_sorts_nested_keys() {
        let v = json!({"b": [{"z": 1, "a": 2}], "a": true});
        assert_eq!(canonical_json(&v), r#"{"a":true,"b":[{"a":2,"z":1}]}"#);
    }

    #[test]
    fn source_kind_round_trips() {
        use std::str::FromStr;
        for kind in [SourceKind::RelationalPoll, SourceKind::PartitionedLog, SourceKind::HttpPush] {
            assert_eq!(SourceKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }
}
