use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Scalar leaves of a JSON object keyed by dotted path.
///
/// Arrays contribute each element to the same path; nulls are dropped.
/// `skip` names top-level keys that are handled elsewhere.
pub fn flatten<'a>(object: &'a Map<String, Value>, skip: &[&str]) -> BTreeMap<String, Vec<&'a Value>> {
    let mut out = BTreeMap::new();
    for (key, value) in object {
        if skip.contains(&key.as_str()) {
            continue;
        }
        collect(key.clone(), value, &mut out);
    }
    out
}

fn collect<'a>(path: String, value: &'a Value, out: &mut BTreeMap<String, Vec<&'a Value>>) {
    match value {
        Value::Null => {}
        Value::Object(map) => {
            for (key, inner) in map {
                collect(format!("{}.{}", path, key), inner, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(path.clone(), item, out);
            }
        }
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
            out.entry(path).or_default().push(value);
        }
    }
}
