//! Builders for applications and manifests used across integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use serde_json::{json, Value};

use syncwarden::resource::application::{
    ApplicationDestination, ApplicationSource, ApplicationSpec, AutomatedSyncPolicy, SyncPolicy,
};
use syncwarden::resource::{Application, ResourceKey, ANNOTATION_HOOK, ANNOTATION_SYNC_OPTIONS};
use syncwarden::sync::RetryPolicy;

pub const REPO_URL: &str = "https://git.example.com/team/apps";

/// Builder for `Application` instances.
pub struct ApplicationBuilder {
    name: String,
    namespace: Option<String>,
    repo_url: String,
    path: String,
    target_revision: String,
    destination_namespace: String,
    automated: Option<AutomatedSyncPolicy>,
    retry: Option<RetryPolicy>,
}

impl ApplicationBuilder {
    /// An application rendering `path` of the test repository into `ns1`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: None,
            repo_url: REPO_URL.to_string(),
            path: name.to_string(),
            target_revision: "HEAD".to_string(),
            destination_namespace: "ns1".to_string(),
            automated: None,
            retry: None,
        }
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn repo_url(mut self, url: &str) -> Self {
        self.repo_url = url.to_string();
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn target_revision(mut self, revision: &str) -> Self {
        self.target_revision = revision.to_string();
        self
    }

    pub fn destination(mut self, namespace: &str) -> Self {
        self.destination_namespace = namespace.to_string();
        self
    }

    /// Enables automated sync.
    pub fn automated(mut self, prune: bool, self_heal: bool) -> Self {
        self.automated = Some(AutomatedSyncPolicy {
            enabled: true,
            prune,
            self_heal,
        });
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn build(self) -> Application {
        let mut app = Application::new(
            self.name,
            ApplicationSpec {
                source: ApplicationSource {
                    repo_url: self.repo_url,
                    target_revision: self.target_revision,
                    path: self.path,
                    parameters: BTreeMap::new(),
                },
                destination: ApplicationDestination {
                    cluster: "in-cluster".to_string(),
                    namespace: self.destination_namespace,
                },
                sync_policy: SyncPolicy {
                    automated: self.automated,
                    retry: self.retry,
                },
            },
        );
        if let Some(namespace) = self.namespace {
            app.metadata.namespace = namespace;
        }
        app
    }
}

pub fn namespace(name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {"name": name}
    })
}

pub fn config_map(namespace: &str, name: &str, data: &[(&str, &str)]) -> Value {
    let data: serde_json::Map<String, Value> = data
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": name, "namespace": namespace},
        "data": data
    })
}

pub fn deployment(namespace: &str, name: &str, replicas: i64) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {
            "replicas": replicas,
            "selector": {"matchLabels": {"app": name}},
            "template": {
                "metadata": {"labels": {"app": name}},
                "spec": {"containers": [{"name": name, "image": "nginx:1.25"}]}
            }
        }
    })
}

/// A Job bound to a hook phase.
pub fn hook_job(namespace: &str, name: &str, phase: &str) -> Value {
    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "annotations": {ANNOTATION_HOOK: phase}
        },
        "spec": {
            "template": {
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [{"name": name, "image": "busybox"}]
                }
            }
        }
    })
}

/// Marks a document as excluded from pruning.
pub fn no_prune(mut document: Value) -> Value {
    if let Some(metadata) = document.get_mut("metadata").and_then(Value::as_object_mut) {
        let annotations = metadata
            .entry("annotations")
            .or_insert_with(|| json!({}));
        if let Some(annotations) = annotations.as_object_mut() {
            annotations.insert(
                ANNOTATION_SYNC_OPTIONS.to_string(),
                Value::String("Prune=false".to_string()),
            );
        }
    }
    document
}

/// Status of a Deployment whose rollout finished.
pub fn rolled_out(replicas: i64) -> Value {
    json!({
        "observedGeneration": 1,
        "replicas": replicas,
        "updatedReplicas": replicas,
        "availableReplicas": replicas,
        "readyReplicas": replicas
    })
}

pub fn namespace_key(name: &str) -> ResourceKey {
    ResourceKey::new("", "Namespace", "", name)
}

pub fn config_map_key(namespace: &str, name: &str) -> ResourceKey {
    ResourceKey::new("", "ConfigMap", namespace, name)
}

pub fn deployment_key(namespace: &str, name: &str) -> ResourceKey {
    ResourceKey::new("apps", "Deployment", namespace, name)
}

pub fn job_key(namespace: &str, name: &str) -> ResourceKey {
    ResourceKey::new("batch", "Job", namespace, name)
}
