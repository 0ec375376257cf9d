//! In-process cluster used by the controller binary and tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use super::{ClusterClient, ClusterError, ClusterEvent, ClusterEventType, ClusterWatcher, DeleteOutcome};
use crate::resource::{is_cluster_scoped, Manifest, ResourceKey};

/// Mutates a stored document after each apply, standing in for cluster controllers.
pub type StatusSimulator = Arc<dyn Fn(&mut Value) + Send + Sync>;

/// Namespaces that exist without being declared.
const BUILTIN_NAMESPACES: &[&str] = &["default", "kube-system", "kube-public"];

/// A mutation recorded by the cluster, in completion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterOperation {
    Apply(ResourceKey),
    Delete(ResourceKey),
}

#[derive(Default)]
struct ClusterState {
    resources: BTreeMap<ResourceKey, Manifest>,
    resource_version: u64,
    unreachable: bool,
    require_namespaces: bool,
    latency: Option<Duration>,
    failures: HashMap<ResourceKey, VecDeque<ClusterError>>,
    simulator: Option<StatusSimulator>,
    operations: Vec<ClusterOperation>,
}

/// Stores resources in memory and behaves like a minimal API server:
/// it stamps server-managed fields, supports dry-run and emits watch events.
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
    watchers: Mutex<Vec<Arc<dyn ClusterWatcher>>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a watcher and sends it a full listing.
    pub fn watch(&self, watcher: Arc<dyn ClusterWatcher>) {
        watcher.resync(self.list());
        self.watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(watcher);
    }

    fn notify(&self, event: ClusterEvent) {
        let watchers = self
            .watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for watcher in watchers {
            watcher.on_event(event.clone());
        }
    }

    pub fn list(&self) -> Vec<Manifest> {
        self.state().resources.values().cloned().collect()
    }

    pub fn get_now(&self, key: &ResourceKey) -> Option<Manifest> {
        self.state().resources.get(key).cloned()
    }

    /// Mutations performed so far.
    pub fn operations(&self) -> Vec<ClusterOperation> {
        self.state().operations.clone()
    }

    /// Makes every request fail with [`ClusterError::Unreachable`].
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Rejects namespaced resources whose namespace does not exist.
    pub fn set_require_namespaces(&self, require: bool) {
        self.state().require_namespaces = require;
    }

    /// Delays every request.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    pub fn set_status_simulator(&self, simulator: Option<StatusSimulator>) {
        self.state().simulator = simulator;
    }

    /// Queues an error returned by the next request touching `key`.
    pub fn fail_next(&self, key: &ResourceKey, error: ClusterError) {
        self.state()
            .failures
            .entry(key.clone())
            .or_default()
            .push_back(error);
    }

    /// Replaces the status of a stored resource, as a cluster controller would.
    pub fn set_status(&self, key: &ResourceKey, status: Value) -> Result<(), ClusterError> {
        let event = {
            let mut state = self.state();
            state.resource_version += 1;
            let version = state.resource_version.to_string();
            let stored = state
                .resources
                .get_mut(key)
                .ok_or_else(|| ClusterError::NotFound { key: key.clone() })?;
            let mut object = stored.clone().into_value();
            if let Some(root) = object.as_object_mut() {
                root.insert("status".to_string(), status);
            }
            set_metadata(&mut object, "resourceVersion", Value::String(version));
            let manifest = Manifest::from_value(object).map_err(|message| ClusterError::Invalid {
                key: key.clone(),
                message,
            })?;
            *stored = manifest.clone();
            ClusterEvent {
                event_type: ClusterEventType::Modified,
                key: key.clone(),
                object: manifest,
            }
        };
        self.notify(event);
        Ok(())
    }

    /// Inserts a document as-is, bypassing apply semantics.
    pub fn seed(&self, manifest: Manifest) {
        let key = manifest.key();
        self.state().resources.insert(key.clone(), manifest.clone());
        self.notify(ClusterEvent {
            event_type: ClusterEventType::Added,
            key,
            object: manifest,
        });
    }

    async fn delay(&self) {
        let latency = self.state().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_available(state: &mut ClusterState, key: &ResourceKey) -> Result<(), ClusterError> {
        if state.unreachable {
            return Err(ClusterError::Unreachable(
                "connection refused".to_string(),
            ));
        }
        if let Some(queue) = state.failures.get_mut(key) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }
        Ok(())
    }

    fn prepare(state: &mut ClusterState, manifest: &Manifest) -> Result<Value, ClusterError> {
        let key = manifest.key();
        if state.require_namespaces && !is_cluster_scoped(manifest.kind()) {
            let namespace = manifest.namespace();
            let ns_key = ResourceKey::new("", "Namespace", "", namespace);
            if !namespace.is_empty()
                && !BUILTIN_NAMESPACES.contains(&namespace)
                && !state.resources.contains_key(&ns_key)
            {
                return Err(ClusterError::Invalid {
                    key,
                    message: format!("namespace '{}' not found", namespace),
                });
            }
        }

        let mut object = manifest.object().clone();
        if let Some(root) = object.as_object_mut() {
            root.remove("status");
        }
        let existing = state.resources.get(&key).map(|m| m.object().clone());
        let resource_version = (state.resource_version + 1).to_string();

        match &existing {
            Some(current) => {
                for field in ["uid", "creationTimestamp"] {
                    if let Some(v) = current.pointer(&format!("/metadata/{}", field)) {
                        set_metadata(&mut object, field, v.clone());
                    }
                }
                let generation = current
                    .pointer("/metadata/generation")
                    .and_then(Value::as_i64)
                    .unwrap_or(1);
                let generation = if spec_of(current) == spec_of(&object) {
                    generation
                } else {
                    generation + 1
                };
                set_metadata(&mut object, "generation", Value::from(generation));
                if let Some(status) = current.get("status") {
                    if let Some(root) = object.as_object_mut() {
                        root.insert("status".to_string(), status.clone());
                    }
                }
            }
            None => {
                set_metadata(
                    &mut object,
                    "uid",
                    Value::String(uuid::Uuid::new_v4().to_string()),
                );
                set_metadata(
                    &mut object,
                    "creationTimestamp",
                    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
                );
                set_metadata(&mut object, "generation", Value::from(1));
            }
        }
        set_metadata(&mut object, "resourceVersion", Value::String(resource_version));
        Ok(object)
    }
}

/// Everything except metadata and status, which drives `generation`.
fn spec_of(object: &Value) -> Map<String, Value> {
    object
        .as_object()
        .map(|root| {
            root.iter()
                .filter(|(k, _)| k.as_str() != "metadata" && k.as_str() != "status")
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn set_metadata(object: &mut Value, field: &str, value: Value) {
    let Some(root) = object.as_object_mut() else {
        return;
    };
    let metadata = root
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if let Some(metadata) = metadata.as_object_mut() {
        metadata.insert(field.to_string(), value);
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn apply(&self, manifest: &Manifest, dry_run: bool) -> Result<Manifest, ClusterError> {
        self.delay().await;
        let key = manifest.key();
        let event = {
            let mut state = self.state();
            Self::check_available(&mut state, &key)?;
            let mut object = Self::prepare(&mut state, manifest)?;
            if dry_run {
                return Manifest::from_value(object)
                    .map_err(|message| ClusterError::Invalid { key, message });
            }
            state.resource_version += 1;
            if let Some(simulator) = state.simulator.clone() {
                simulator(&mut object);
            }
            let stored = Manifest::from_value(object).map_err(|message| ClusterError::Invalid {
                key: key.clone(),
                message,
            })?;
            let event_type = if state.resources.contains_key(&key) {
                ClusterEventType::Modified
            } else {
                ClusterEventType::Added
            };
            state.resources.insert(key.clone(), stored.clone());
            state.operations.push(ClusterOperation::Apply(key.clone()));
            ClusterEvent {
                event_type,
                key,
                object: stored,
            }
        };
        let stored = event.object.clone();
        self.notify(event);
        Ok(stored)
    }

    async fn delete(
        &self,
        key: &ResourceKey,
        dry_run: bool,
    ) -> Result<DeleteOutcome, ClusterError> {
        self.delay().await;
        let event = {
            let mut state = self.state();
            Self::check_available(&mut state, key)?;
            if dry_run {
                return Ok(if state.resources.contains_key(key) {
                    DeleteOutcome::Deleted
                } else {
                    DeleteOutcome::NotFound
                });
            }
            let Some(removed) = state.resources.remove(key) else {
                return Ok(DeleteOutcome::NotFound);
            };
            state.resource_version += 1;
            state.operations.push(ClusterOperation::Delete(key.clone()));
            ClusterEvent {
                event_type: ClusterEventType::Deleted,
                key: key.clone(),
                object: removed,
            }
        };
        self.notify(event);
        Ok(DeleteOutcome::Deleted)
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<Manifest>, ClusterError> {
        let state = self.state();
        if state.unreachable {
            return Err(ClusterError::Unreachable(
                "connection refused".to_string(),
            ));
        }
        Ok(state.resources.get(key).cloned())
    }
}
