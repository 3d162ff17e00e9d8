//! Field-path evaluator over JSON trees.
//!
//! Paths use dotted keys with `[]` marking "apply to every array element":
//! `customer.name`, `items[].serviceCode`, `order.lines[].tax.rate`.
//! This is a small evaluator, not reflection over static types.

use serde_json::{Map, Value};

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Plain object key.
    Key(String),
    /// Object key holding an array; the rest of the path applies per element.
    Each(String),
}

fn parse_path(path: &str) -> Vec<Segment> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .map(|part| match part.strip_suffix("[]") {
            Some(key) => Segment::Each(key.to_string()),
            None => Segment::Key(part.to_string()),
        })
        .collect()
}

fn get_segments(root: &Value, segments: &[Segment]) -> Option<Value> {
    let Some((first, rest)) = segments.split_first() else {
        return Some(root.clone());
    };

    match first {
        Segment::Key(key) => get_segments(root.get(key.as_str())?, rest),
        Segment::Each(key) => {
            let items = root.get(key.as_str())?.as_array()?;
            let collected: Vec<Value> = items
                .iter()
                .map(|item| get_segments(item, rest).unwrap_or(Value::Null))
                .collect();
            Some(Value::Array(collected))
        }
    }
}

/// Read the value at `path`. A path through `[]` yields an array with one
/// entry per element (missing leaves become null). Returns `None` when any
/// non-iterating step is absent.
pub fn get_value(root: &Value, path: &str) -> Option<Value> {
    get_segments(root, &parse_path(path))
}

fn set_segments(root: &mut Value, segments: &[Segment], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *root = value;
        return;
    };

    match first {
        Segment::Key(key) => {
            if !root.is_object() {
                *root = Value::Object(Map::new());
            }
            let map = root.as_object_mut().expect("object ensured above");
            let slot = map.entry(key.clone()).or_insert(Value::Null);
            set_segments(slot, rest, value);
        }
        Segment::Each(key) => {
            if !root.is_object() {
                *root = Value::Object(Map::new());
            }
            let map = root.as_object_mut().expect("object ensured above");
            let slot = map.entry(key.clone()).or_insert_with(|| Value::Array(vec![]));
            if !slot.is_array() {
                *slot = Value::Array(vec![]);
            }
            let arr = slot.as_array_mut().expect("array ensured above");

            match value {
                // Element-wise distribution: items[i] gets values[i].
                Value::Array(values) => {
                    if arr.len() < values.len() {
                        arr.resize(values.len(), Value::Object(Map::new()));
                    }
                    for (i, v) in values.into_iter().enumerate() {
                        if v.is_null() {
                            continue;
                        }
                        set_segments(&mut arr[i], rest, v);
                    }
                }
                // Scalar: broadcast to every existing element.
                other => {
                    for item in arr.iter_mut() {
                        set_segments(item, rest, other.clone());
                    }
                }
            }
        }
    }
}

/// Write `value` at `path`, creating intermediate objects and arrays.
pub fn set_value(root: &mut Value, path: &str, value: Value) {
    let segments = parse_path(path);
    if segments.is_empty() {
        *root = value;
        return;
    }
    set_segments(root, &segments, value);
}
