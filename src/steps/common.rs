//! Shared helpers used by multiple phases: path projection (§4.7, §4.8) and
//! the fixed/pattern matching semantics (§4.7, reused by §4.12 step 3).

use serde_json::Value;

/// Splits an ED path (`Patient.identifier.value`) into segments relative to
/// the resource root, so they can be projected directly onto the parsed
/// resource tree. The root element itself (`path == resource_type`) yields
/// an empty segment list, meaning "the whole resource".
pub fn relative_segments<'a>(ed_path: &'a str, resource_type: &str) -> Vec<&'a str> {
    if ed_path == resource_type {
        return Vec::new();
    }
    match ed_path.strip_prefix(resource_type).and_then(|s| s.strip_prefix('.')) {
        Some(rest) => rest.split('.').collect(),
        None => ed_path.split('.').collect(),
    }
}

/// Projects `segments` onto `value`, transparently descending through arrays
/// encountered along the way (§4.8: "descending through arrays — collecting
/// values from every array element").
pub fn values_at_path<'a>(value: &'a Value, segments: &[&str]) -> Vec<&'a Value> {
    if segments.is_empty() {
        return vec![value];
    }
    match value {
        Value::Array(items) => items.iter().flat_map(|item| values_at_path(item, segments)).collect(),
        Value::Object(map) => match map.get(segments[0]) {
            Some(next) => values_at_path(next, &segments[1..]),
            None => Vec::new(),
        },
        _ => Vec::new(),
    }
}

pub fn value_at_ed_path<'a>(resource: &'a Value, ed_path: &str, resource_type: &str) -> Vec<&'a Value> {
    let segments = relative_segments(ed_path, resource_type);
    values_at_path(resource, &segments)
}

fn numbers_equal(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        x == y
    } else {
        a == b
    }
}

/// `fixed` semantics (§4.7): deep structural equality, with numeric
/// comparison by magnitude (`1` equals `1.0`) and position-wise array
/// comparison.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(xs), Value::Array(ys)) => xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| deep_equal(x, y)),
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len() && xs.iter().all(|(k, v)| ys.get(k).is_some_and(|ov| deep_equal(v, ov)))
        }
        _ => false,
    }
}

/// `pattern` semantics (§4.7): containment. Primitive patterns collapse to
/// equality; object patterns require every declared key to be present and
/// matching (extra keys on the target are allowed); array patterns require
/// every pattern item to match *some* target item (extra target items
/// allowed).
pub fn pattern_matches(pattern: &Value, target: &Value) -> bool {
    match pattern {
        Value::Object(pmap) => match target {
            Value::Object(tmap) => pmap.iter().all(|(k, pv)| tmap.get(k).is_some_and(|tv| pattern_matches(pv, tv))),
            _ => false,
        },
        Value::Array(pitems) => match target {
            Value::Array(titems) => pitems.iter().all(|pi| titems.iter().any(|ti| pattern_matches(pi, ti))),
            _ => false,
        },
        _ => deep_equal(pattern, target),
    }
}
