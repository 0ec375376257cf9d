//! Field paths in JSON-pointer syntax with a `*` wildcard segment.

use serde_json::Value;

use crate::diff::delta::named_elements;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Key(String),
    Any,
}

/// A pattern such as `/spec/template/spec/containers/*/imagePullPolicy`.
///
/// `*` matches every array element or every object key at that level. `~1` and
/// `~0` escape `/` and `~` inside a segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let Some(rest) = raw.strip_prefix('/') else {
            return Err("path must start with '/'".to_string());
        };
        if rest.is_empty() {
            return Err("path must name at least one field".to_string());
        }
        let segments = rest
            .split('/')
            .map(|s| {
                if s.is_empty() {
                    Err("path contains an empty segment".to_string())
                } else if s == "*" {
                    Ok(Segment::Any)
                } else {
                    Ok(Segment::Key(unescape(s)))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if a concrete path (as produced by [`escape`]) matches this pattern.
    pub fn matches(&self, concrete: &str) -> bool {
        let Some(rest) = concrete.strip_prefix('/') else {
            return false;
        };
        let parts: Vec<String> = rest.split('/').map(unescape).collect();
        parts.len() == self.segments.len()
            && self
                .segments
                .iter()
                .zip(parts.iter())
                .all(|(seg, part)| match seg {
                    Segment::Any => true,
                    Segment::Key(k) => k == part,
                })
    }

    /// Removes every field matched by this path.
    pub fn remove(&self, value: &mut Value) {
        remove_at(value, &self.segments);
    }

    /// Removes matched fields from `live` only where `desired` has no value at
    /// the same location. Array elements are paired by `name` when both sides
    /// are uniquely named, otherwise by index.
    pub fn remove_if_absent(&self, live: &mut Value, desired: Option<&Value>) {
        remove_absent_at(live, desired, &self.segments);
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Escapes a key for use as a path segment.
pub fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

fn remove_at(value: &mut Value, segments: &[Segment]) {
    let Some((head, tail)) = segments.split_first() else {
        return;
    };
    match (head, value) {
        (Segment::Key(key), Value::Object(map)) => {
            if tail.is_empty() {
                map.remove(key);
            } else if let Some(child) = map.get_mut(key) {
                remove_at(child, tail);
            }
        }
        (Segment::Key(key), Value::Array(items)) => {
            if let Ok(index) = key.parse::<usize>() {
                if tail.is_empty() {
                    if index < items.len() {
                        items.remove(index);
                    }
                } else if let Some(child) = items.get_mut(index) {
                    remove_at(child, tail);
                }
            }
        }
        (Segment::Any, Value::Object(map)) => {
            if tail.is_empty() {
                map.clear();
            } else {
                for child in map.values_mut() {
                    remove_at(child, tail);
                }
            }
        }
        (Segment::Any, Value::Array(items)) => {
            if tail.is_empty() {
                items.clear();
            } else {
                for child in items.iter_mut() {
                    remove_at(child, tail);
                }
            }
        }
        _ => {}
    }
}

fn remove_absent_at(live: &mut Value, desired: Option<&Value>, segments: &[Segment]) {
    let Some((head, tail)) = segments.split_first() else {
        return;
    };
    match (head, live) {
        (Segment::Key(key), Value::Object(map)) => {
            let desired_child = desired.and_then(|d| d.get(key.as_str()));
            if tail.is_empty() {
                if desired_child.is_none() {
                    map.remove(key);
                }
            } else if let Some(child) = map.get_mut(key) {
                remove_absent_at(child, desired_child, tail);
            }
        }
        (Segment::Any, Value::Object(map)) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                let desired_child = desired.and_then(|d| d.get(key.as_str()));
                if tail.is_empty() {
                    if desired_child.is_none() {
                        map.remove(&key);
                    }
                } else if let Some(child) = map.get_mut(&key) {
                    remove_absent_at(child, desired_child, tail);
                }
            }
        }
        (Segment::Any, Value::Array(items)) => {
            // Removing whole elements would shift indices; only descend.
            if tail.is_empty() {
                return;
            }
            let desired_items = desired.and_then(Value::as_array);
            let by_name = desired_items.and_then(|d| named_elements(d));
            let live_named = named_elements(items).is_some();
            for (index, child) in items.iter_mut().enumerate() {
                let desired_child = match (&by_name, live_named) {
                    (Some(by_name), true) => child
                        .get("name")
                        .and_then(Value::as_str)
                        .and_then(|name| by_name.get(name).copied()),
                    _ => desired_items.and_then(|d| d.get(index)),
                };
                remove_absent_at(child, desired_child, tail);
            }
        }
        (Segment::Key(key), Value::Array(items)) => {
            if tail.is_empty() {
                return;
            }
            if let Ok(index) = key.parse::<usize>() {
                let desired_child = desired.and_then(|d| d.get(index));
                if let Some(child) = items.get_mut(index) {
                    remove_absent_at(child, desired_child, tail);
                }
            }
        }
        _ => {}
    }
}
