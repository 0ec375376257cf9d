//! Resource normalization.
//!
//! Canonicalizes desired and live documents into a comparable form. Every
//! normalizer is a pure function of its input and the static per-kind rules,
//! so comparisons are deterministic and safe to run concurrently. Object keys
//! come out sorted because `serde_json::Map` is ordered.

pub mod path;
pub mod rules;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{Map, Value};

pub use path::FieldPath;
pub use rules::{builtin_rules, KindRules};

use crate::config::ResourceOverride;
use crate::error::ConfigError;
use crate::resource::KindKey;

/// Which side of a comparison a document comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Desired,
    Live,
}

/// Metadata fields populated exclusively by the API server.
const SERVER_METADATA_FIELDS: &[&str] = &[
    "uid",
    "resourceVersion",
    "generation",
    "creationTimestamp",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
    "managedFields",
    "selfLink",
];

/// Annotations written by tooling rather than users.
const VOLATILE_ANNOTATIONS: &[&str] = &[
    "kubectl.kubernetes.io/last-applied-configuration",
    "deployment.kubernetes.io/revision",
];

/// Canonicalizes one resource document.
pub trait Normalizer: Send + Sync {
    /// Normalizes `document`. For [`Role::Live`], `desired` is the raw desired
    /// document of the same identity, when there is one.
    fn normalize(
        &self,
        document: &Value,
        role: Role,
        desired: Option<&Value>,
    ) -> Result<Value, String>;
}

/// Strips server-managed fields, then applies per-kind path rules.
#[derive(Debug, Clone, Default)]
pub struct GenericNormalizer {
    rules: KindRules,
}

impl GenericNormalizer {
    pub fn new(rules: KindRules) -> Self {
        Self { rules }
    }
}

impl Normalizer for GenericNormalizer {
    fn normalize(
        &self,
        document: &Value,
        role: Role,
        desired: Option<&Value>,
    ) -> Result<Value, String> {
        if !document.is_object() {
            return Err("document is not a mapping".to_string());
        }
        let mut doc = document.clone();
        strip_server_fields(&mut doc);

        for path in &self.rules.ignored_paths {
            path.remove(&mut doc);
        }
        if role == Role::Live {
            for path in &self.rules.server_defaulted_paths {
                path.remove_if_absent(&mut doc, desired);
            }
        }

        drop_nulls(&mut doc);
        drop_empty_metadata_maps(&mut doc);
        Ok(doc)
    }
}

/// Folds `stringData` into base64 `data` so both forms compare equal.
#[derive(Debug, Clone, Default)]
pub struct SecretNormalizer {
    generic: GenericNormalizer,
}

impl SecretNormalizer {
    pub fn new(rules: KindRules) -> Self {
        Self {
            generic: GenericNormalizer::new(rules),
        }
    }
}

impl Normalizer for SecretNormalizer {
    fn normalize(
        &self,
        document: &Value,
        role: Role,
        desired: Option<&Value>,
    ) -> Result<Value, String> {
        let mut doc = self.generic.normalize(document, role, desired)?;
        let Some(root) = doc.as_object_mut() else {
            return Ok(doc);
        };

        let mut data = match root.remove("data") {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => Map::new(),
            Some(_) => return Err("Secret data is not a mapping".to_string()),
        };
        for (key, value) in data.iter() {
            let Value::String(encoded) = value else {
                return Err(format!("Secret data '{}' is not a string", key));
            };
            BASE64
                .decode(encoded)
                .map_err(|e| format!("Secret data '{}' is not valid base64: {}", key, e))?;
        }
        match root.remove("stringData") {
            Some(Value::Object(plain)) => {
                for (key, value) in plain {
                    let text = match value {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    data.insert(key, Value::String(BASE64.encode(text.as_bytes())));
                }
            }
            Some(Value::Null) | None => {}
            Some(_) => return Err("Secret stringData is not a mapping".to_string()),
        }
        if !data.is_empty() {
            root.insert("data".to_string(), Value::Object(data));
        }
        Ok(doc)
    }
}

/// Maps a resource kind to its normalizer, falling back to a generic one.
pub struct NormalizerRegistry {
    normalizers: HashMap<KindKey, Arc<dyn Normalizer>>,
    ordered_paths: HashMap<KindKey, Vec<FieldPath>>,
    fallback: Arc<dyn Normalizer>,
}

impl NormalizerRegistry {
    /// A registry with only the generic fallback.
    pub fn empty() -> Self {
        Self {
            normalizers: HashMap::new(),
            ordered_paths: HashMap::new(),
            fallback: Arc::new(GenericNormalizer::default()),
        }
    }

    /// A registry built from the built-in rule table.
    pub fn builtin() -> Self {
        Self::from_rules(builtin_rules())
    }

    /// Builds the registry from the built-in table merged with configured overrides.
    pub fn with_overrides(overrides: &[ResourceOverride]) -> Result<Self, ConfigError> {
        let mut rules = builtin_rules();
        for o in overrides {
            rules
                .entry(KindKey::new(&o.group, &o.kind))
                .or_default()
                .merge(o.to_rules()?);
        }
        Ok(Self::from_rules(rules))
    }

    pub fn from_rules(rules: BTreeMap<KindKey, KindRules>) -> Self {
        let mut registry = Self::empty();
        for (kind, kind_rules) in rules {
            if !kind_rules.ordered_paths.is_empty() {
                registry
                    .ordered_paths
                    .insert(kind.clone(), kind_rules.ordered_paths.clone());
            }
            let normalizer: Arc<dyn Normalizer> = if kind.group.is_empty() && kind.kind == "Secret"
            {
                Arc::new(SecretNormalizer::new(kind_rules))
            } else {
                Arc::new(GenericNormalizer::new(kind_rules))
            };
            registry.normalizers.insert(kind, normalizer);
        }
        registry
    }

    /// Registers a custom normalizer for a kind, replacing any existing one.
    pub fn register(&mut self, kind: KindKey, normalizer: Arc<dyn Normalizer>) {
        self.normalizers.insert(kind, normalizer);
    }

    pub fn get(&self, kind: &KindKey) -> &dyn Normalizer {
        self.normalizers
            .get(kind)
            .map(|n| n.as_ref())
            .unwrap_or_else(|| self.fallback.as_ref())
    }

    pub fn is_registered(&self, kind: &KindKey) -> bool {
        self.normalizers.contains_key(kind)
    }

    /// Array paths whose order is significant for `kind`.
    pub fn ordered_paths(&self, kind: &KindKey) -> &[FieldPath] {
        self.ordered_paths
            .get(kind)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Normalizes a document with the rule registered for `kind`.
    pub fn normalize(
        &self,
        kind: &KindKey,
        document: &Value,
        role: Role,
        desired: Option<&Value>,
    ) -> Result<Value, String> {
        self.get(kind).normalize(document, role, desired)
    }
}

impl Default for NormalizerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn strip_server_fields(doc: &mut Value) {
    let Some(root) = doc.as_object_mut() else {
        return;
    };
    root.remove("status");
    if let Some(Value::Object(metadata)) = root.get_mut("metadata") {
        for field in SERVER_METADATA_FIELDS {
            metadata.remove(*field);
        }
        if let Some(Value::Object(annotations)) = metadata.get_mut("annotations") {
            for annotation in VOLATILE_ANNOTATIONS {
                annotations.remove(*annotation);
            }
        }
    }
}

fn drop_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            for v in map.values_mut() {
                drop_nulls(v);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                drop_nulls(v);
            }
        }
        _ => {}
    }
}

fn drop_empty_metadata_maps(doc: &mut Value) {
    if let Some(Value::Object(metadata)) = doc.get_mut("metadata") {
        for field in ["labels", "annotations"] {
            if matches!(metadata.get(field), Some(Value::Object(m)) if m.is_empty()) {
                metadata.remove(field);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn live_deployment() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": "web",
                "namespace": "ns1",
                "uid": "1234",
                "resourceVersion": "42",
                "generation": 3,
                "creationTimestamp": "2024-01-01T00:00:00Z",
                "annotations": {"deployment.kubernetes.io/revision": "3"}
            },
            "spec": {
                "replicas": 2,
                "progressDeadlineSeconds": 600,
                "template": {"spec": {"containers": [
                    {"name": "web", "image": "nginx", "imagePullPolicy": "Always"}
                ]}}
            },
            "status": {"replicas": 2}
        })
    }

    fn desired_deployment() -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "ns1"},
            "spec": {
                "replicas": 2,
                "template": {"spec": {"containers": [{"name": "web", "image": "nginx"}]}}
            }
        })
    }

    #[test]
    fn test_live_normalization_matches_desired() {
        let registry = NormalizerRegistry::builtin();
        let kind = KindKey::new("apps", "Deployment");
        let desired = desired_deployment();
        let live = registry
            .normalize(&kind, &live_deployment(), Role::Live, Some(&desired))
            .unwrap();
        let normalized_desired = registry
            .normalize(&kind, &desired, Role::Desired, None)
            .unwrap();
        assert_eq!(live, normalized_desired);
    }

    #[test]
    fn test_declared_default_is_kept() {
        let registry = NormalizerRegistry::builtin();
        let kind = KindKey::new("apps", "Deployment");
        let mut desired = desired_deployment();
        desired["spec"]["progressDeadlineSeconds"] = json!(300);
        let live = registry
            .normalize(&kind, &live_deployment(), Role::Live, Some(&desired))
            .unwrap();
        assert_eq!(live["spec"]["progressDeadlineSeconds"], json!(600));
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let registry = NormalizerRegistry::builtin();
        let kind = KindKey::new("apps", "Deployment");
        let desired = desired_deployment();
        let a = registry
            .normalize(&kind, &live_deployment(), Role::Live, Some(&desired))
            .unwrap();
        let b = registry
            .normalize(&kind, &live_deployment(), Role::Live, Some(&desired))
            .unwrap();
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_unknown_kind_uses_generic_fallback() {
        let registry = NormalizerRegistry::builtin();
        let kind = KindKey::new("example.com", "Widget");
        assert!(!registry.is_registered(&kind));
        let doc = json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "w", "uid": "x", "labels": {}},
            "spec": {"size": 3, "color": null},
            "status": {"ready": true}
        });
        let normalized = registry.normalize(&kind, &doc, Role::Live, None).unwrap();
        assert_eq!(
            normalized,
            json!({
                "apiVersion": "example.com/v1",
                "kind": "Widget",
                "metadata": {"name": "w"},
                "spec": {"size": 3}
            })
        );
    }

    #[test]
    fn test_non_mapping_fails() {
        let registry = NormalizerRegistry::builtin();
        let kind = KindKey::new("", "ConfigMap");
        assert!(registry
            .normalize(&kind, &json!([1, 2]), Role::Desired, None)
            .is_err());
    }

    #[test]
    fn test_secret_string_data_equals_data() {
        let registry = NormalizerRegistry::builtin();
        let kind = KindKey::new("", "Secret");
        let desired = json!({
            "apiVersion": "v1", "kind": "Secret",
            "metadata": {"name": "creds"},
            "stringData": {"password": "hunter2"}
        });
        let live = json!({
            "apiVersion": "v1", "kind": "Secret",
            "metadata": {"name": "creds", "uid": "1"},
            "data": {"password": "aHVudGVyMg=="}
        });
        let d = registry.normalize(&kind, &desired, Role::Desired, None).unwrap();
        let l = registry
            .normalize(&kind, &live, Role::Live, Some(&desired))
            .unwrap();
        assert_eq!(d, l);
    }

    #[test]
    fn test_secret_invalid_base64_fails() {
        let registry = NormalizerRegistry::builtin();
        let kind = KindKey::new("", "Secret");
        let doc = json!({
            "apiVersion": "v1", "kind": "Secret",
            "metadata": {"name": "creds"},
            "data": {"password": "not base64!"}
        });
        let err = registry.normalize(&kind, &doc, Role::Desired, None).unwrap_err();
        assert!(err.contains("password"));
    }

    #[test]
    fn test_override_ignored_path() {
        let overrides = vec![ResourceOverride {
            group: "apps".to_string(),
            kind: "Deployment".to_string(),
            ignored_paths: vec!["/spec/replicas".to_string()],
            server_defaulted_paths: vec![],
            ordered_paths: vec![],
        }];
        let registry = NormalizerRegistry::with_overrides(&overrides).unwrap();
        let kind = KindKey::new("apps", "Deployment");
        let normalized = registry
            .normalize(&kind, &desired_deployment(), Role::Desired, None)
            .unwrap();
        assert!(normalized["spec"].get("replicas").is_none());
    }
}
