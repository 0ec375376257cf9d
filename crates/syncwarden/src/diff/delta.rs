//! Structural comparison of normalized documents.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::normalize::path::escape;
use crate::normalize::FieldPath;

/// How a field differs, seen as the change a sync would make to live state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Declared in desired state, absent from live state.
    Added,
    /// Present in live state, not declared.
    Removed,
    /// Present on both sides with different values.
    Changed,
}

/// One differing field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    /// Location of the field. Array elements matched by name are addressed by name.
    pub path: String,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<Value>,
}

/// Computes the field-wise delta between two normalized documents.
///
/// Arrays are compared as multisets unless their path matches one of
/// `ordered`. Arrays of uniquely named objects are matched element-by-name.
pub fn structural_delta(desired: &Value, live: &Value, ordered: &[FieldPath]) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    diff_values("", desired, live, ordered, &mut changes);
    changes
}

fn diff_values(
    path: &str,
    desired: &Value,
    live: &Value,
    ordered: &[FieldPath],
    out: &mut Vec<FieldChange>,
) {
    match (desired, live) {
        (Value::Object(d), Value::Object(l)) => {
            let keys: BTreeSet<&String> = d.keys().chain(l.keys()).collect();
            for key in keys {
                let child = format!("{}/{}", path, escape(key));
                match (d.get(key), l.get(key)) {
                    (Some(dv), Some(lv)) => diff_values(&child, dv, lv, ordered, out),
                    (Some(dv), None) => out.push(added(child, dv)),
                    (None, Some(lv)) => out.push(removed(child, lv)),
                    (None, None) => {}
                }
            }
        }
        (Value::Array(d), Value::Array(l)) => {
            if ordered.iter().any(|p| p.matches(path)) {
                diff_ordered(path, d, l, ordered, out);
            } else if let (Some(dn), Some(ln)) = (named_elements(d), named_elements(l)) {
                diff_named(path, &dn, &ln, ordered, out);
            } else if !multiset_equal(d, l) {
                out.push(changed(path, desired, live));
            }
        }
        (Value::Object(_), _) | (_, Value::Object(_)) | (Value::Array(_), _) | (_, Value::Array(_)) => {
            out.push(changed(path, desired, live));
        }
        _ => {
            if !scalars_equal(desired, live) {
                out.push(changed(path, desired, live));
            }
        }
    }
}

fn diff_ordered(
    path: &str,
    desired: &[Value],
    live: &[Value],
    ordered: &[FieldPath],
    out: &mut Vec<FieldChange>,
) {
    for index in 0..desired.len().max(live.len()) {
        let child = format!("{}/{}", path, index);
        match (desired.get(index), live.get(index)) {
            (Some(d), Some(l)) => diff_values(&child, d, l, ordered, out),
            (Some(d), None) => out.push(added(child, d)),
            (None, Some(l)) => out.push(removed(child, l)),
            (None, None) => {}
        }
    }
}

fn diff_named(
    path: &str,
    desired: &BTreeMap<&str, &Value>,
    live: &BTreeMap<&str, &Value>,
    ordered: &[FieldPath],
    out: &mut Vec<FieldChange>,
) {
    let names: BTreeSet<&&str> = desired.keys().chain(live.keys()).collect();
    for name in names {
        let child = format!("{}/{}", path, escape(name));
        match (desired.get(*name), live.get(*name)) {
            (Some(d), Some(l)) => diff_values(&child, d, l, ordered, out),
            (Some(d), None) => out.push(added(child, d)),
            (None, Some(l)) => out.push(removed(child, l)),
            (None, None) => {}
        }
    }
}

/// Indexes an array of objects by their unique `name` field.
pub(crate) fn named_elements(items: &[Value]) -> Option<BTreeMap<&str, &Value>> {
    if items.is_empty() {
        return None;
    }
    let mut by_name = BTreeMap::new();
    for item in items {
        let name = item.get("name")?.as_str()?;
        if by_name.insert(name, item).is_some() {
            return None;
        }
    }
    Some(by_name)
}

fn multiset_equal(desired: &[Value], live: &[Value]) -> bool {
    if desired.len() != live.len() {
        return false;
    }
    let mut d: Vec<String> = desired.iter().map(canonical).collect();
    let mut l: Vec<String> = live.iter().map(canonical).collect();
    d.sort();
    l.sort();
    d == l
}

/// Equality of scalars with numeric and boolean string coercion.
pub fn scalars_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (scalar_key(a), scalar_key(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Canonical text of a scalar: numbers and numeric strings share one form.
fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(b) => Some(format!("b:{}", b)),
        Value::Number(n) => n.as_f64().map(number_key),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed == "true" || trimmed == "false" {
                return Some(format!("b:{}", trimmed));
            }
            match trimmed.parse::<f64>() {
                Ok(f) if !trimmed.is_empty() && f.is_finite() => Some(number_key(f)),
                _ => Some(format!("s:{}", s)),
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn number_key(f: f64) -> String {
    if f.fract() == 0.0 && f.abs() < 1e15 {
        format!("n:{}", f as i64)
    } else {
        format!("n:{}", f)
    }
}

/// Order-insensitive canonical form of an array element.
fn canonical(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let fields: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{:?}={}", k, canonical(v)))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        // nested arrays keep their order
        Value::Array(items) => {
            let elements: Vec<String> = items.iter().map(canonical).collect();
            format!("[{}]", elements.join(","))
        }
        scalar => scalar_key(scalar).unwrap_or_default(),
    }
}

fn added(path: String, desired: &Value) -> FieldChange {
    FieldChange {
        path,
        kind: ChangeKind::Added,
        desired: Some(desired.clone()),
        live: None,
    }
}

fn removed(path: String, live: &Value) -> FieldChange {
    FieldChange {
        path,
        kind: ChangeKind::Removed,
        desired: None,
        live: Some(live.clone()),
    }
}

fn changed(path: &str, desired: &Value, live: &Value) -> FieldChange {
    FieldChange {
        path: if path.is_empty() { "/".to_string() } else { path.to_string() },
        kind: ChangeKind::Changed,
        desired: Some(desired.clone()),
        live: Some(live.clone()),
    }
}
