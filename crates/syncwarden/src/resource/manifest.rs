//! Resource documents exchanged with the renderer and the cluster.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::key::{group_of, is_cluster_scoped, ResourceKey};
use super::{ANNOTATION_COMPARE_OPTIONS, ANNOTATION_SYNC_OPTIONS, ANNOTATION_SYNC_WAVE};
use crate::error::ValidationError;
use crate::sync::hook::Hook;

/// A single resource document with a validated identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Manifest {
    object: Value,
}

impl Manifest {
    /// Wraps a document, checking that it carries `apiVersion`, `kind` and `metadata.name`.
    pub fn from_value(object: Value) -> Result<Self, String> {
        if !object.is_object() {
            return Err("document is not a mapping".to_string());
        }
        for (pointer, field) in [
            ("/apiVersion", "apiVersion"),
            ("/kind", "kind"),
            ("/metadata/name", "metadata.name"),
        ] {
            match object.pointer(pointer) {
                Some(Value::String(s)) if !s.is_empty() => {}
                _ => return Err(format!("missing or empty '{}'", field)),
            }
        }
        Ok(Self { object })
    }

    /// Parses the document at `index` of a desired set.
    pub fn parse(index: usize, object: Value) -> Result<Self, ValidationError> {
        Self::from_value(object).map_err(|reason| ValidationError::InvalidManifest { index, reason })
    }

    pub fn api_version(&self) -> &str {
        self.str_at("/apiVersion").unwrap_or_default()
    }

    pub fn group(&self) -> &str {
        group_of(self.api_version())
    }

    pub fn kind(&self) -> &str {
        self.str_at("/kind").unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.str_at("/metadata/name").unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.str_at("/metadata/namespace").unwrap_or_default()
    }

    pub fn key(&self) -> ResourceKey {
        let namespace = if is_cluster_scoped(self.kind()) {
            ""
        } else {
            self.namespace()
        };
        ResourceKey::new(self.group(), self.kind(), namespace, self.name())
    }

    pub fn object(&self) -> &Value {
        &self.object
    }

    pub fn into_value(self) -> Value {
        self.object
    }

    pub fn annotation(&self, name: &str) -> Option<&str> {
        self.object
            .get("metadata")?
            .get("annotations")?
            .get(name)?
            .as_str()
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.object.get("metadata")?.get("labels")?.get(name)?.as_str()
    }

    /// Sets `metadata.namespace` for namespaced kinds that do not declare one.
    pub fn default_namespace(&mut self, namespace: &str) {
        if namespace.is_empty() || is_cluster_scoped(self.kind()) || !self.namespace().is_empty() {
            return;
        }
        if let Some(metadata) = self.metadata_mut() {
            metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
        }
    }

    pub fn set_label(&mut self, key: &str, value: &str) {
        let Some(metadata) = self.metadata_mut() else {
            return;
        };
        let labels = metadata
            .entry("labels")
            .or_insert_with(|| Value::Object(Map::new()));
        if !labels.is_object() {
            *labels = Value::Object(Map::new());
        }
        if let Some(labels) = labels.as_object_mut() {
            labels.insert(key.to_string(), Value::String(value.to_string()));
        }
    }

    /// Lifecycle hook declared through annotations, if any.
    pub fn hook(&self) -> Option<Hook> {
        Hook::from_manifest(self)
    }

    pub fn is_hook(&self) -> bool {
        self.hook().is_some()
    }

    /// Sync wave, `0` when absent or unparseable.
    pub fn sync_wave(&self) -> i32 {
        self.annotation(ANNOTATION_SYNC_WAVE)
            .and_then(|w| w.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn has_compare_option(&self, option: &str) -> bool {
        has_option(self.annotation(ANNOTATION_COMPARE_OPTIONS), option)
    }

    pub fn has_sync_option(&self, option: &str) -> bool {
        has_option(self.annotation(ANNOTATION_SYNC_OPTIONS), option)
    }

    fn str_at(&self, pointer: &str) -> Option<&str> {
        self.object.pointer(pointer).and_then(Value::as_str)
    }

    fn metadata_mut(&mut self) -> Option<&mut Map<String, Value>> {
        let metadata = self
            .object
            .as_object_mut()?
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !metadata.is_object() {
            *metadata = Value::Object(Map::new());
        }
        metadata.as_object_mut()
    }
}

fn has_option(annotation: Option<&str>, option: &str) -> bool {
    annotation
        .map(|value| value.split(',').any(|o| o.trim() == option))
        .unwrap_or(false)
}

impl TryFrom<Value> for Manifest {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Manifest::from_value(value)
    }
}

impl From<Manifest> for Value {
    fn from(manifest: Manifest) -> Self {
        manifest.object
    }
}
