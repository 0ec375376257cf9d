//! K8s-style Application resource.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::sync::operation::RetryPolicy;

/// The API version of syncwarden resources.
pub const API_VERSION: &str = "syncwarden.io/v1alpha1";

/// The kind of the Application resource.
pub const APPLICATION_KIND: &str = "Application";

/// Namespace applications live in when none is given.
pub const DEFAULT_APP_NAMESPACE: &str = "syncwarden";

/// Identity of an application: (namespace, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppKey {
    pub namespace: String,
    pub name: String,
}

impl AppKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for AppKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Metadata for a resource, following K8s conventions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// The unique name of the resource within its namespace.
    pub name: String,

    #[serde(default = "default_app_namespace")]
    pub namespace: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

fn default_app_namespace() -> String {
    DEFAULT_APP_NAMESPACE.to_string()
}

impl ObjectMeta {
    /// Creates a new ObjectMeta with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: default_app_namespace(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }
}

/// A declaratively managed application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: ApplicationSpec,
}

impl Application {
    pub fn new(name: impl Into<String>, spec: ApplicationSpec) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: APPLICATION_KIND.to_string(),
            metadata: ObjectMeta::new(name),
            spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn key(&self) -> AppKey {
        AppKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// True when automated sync is configured and enabled.
    pub fn auto_sync_enabled(&self) -> bool {
        self.spec
            .sync_policy
            .automated
            .as_ref()
            .map(|a| a.enabled)
            .unwrap_or(false)
    }

    /// Checks the fields the controller depends on.
    pub fn validate(&self) -> Result<(), String> {
        let mut errors = Vec::new();
        if self.api_version != API_VERSION {
            errors.push(format!(
                "apiVersion '{}' is not '{}'",
                self.api_version, API_VERSION
            ));
        }
        if self.kind != APPLICATION_KIND {
            errors.push(format!("kind '{}' is not '{}'", self.kind, APPLICATION_KIND));
        }
        if self.metadata.name.is_empty() {
            errors.push("metadata.name is required".to_string());
        }
        if self.spec.source.repo_url.is_empty() {
            errors.push("spec.source.repoUrl is required".to_string());
        }
        if self.spec.destination.namespace.is_empty() {
            errors.push("spec.destination.namespace is required".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    pub source: ApplicationSource,
    pub destination: ApplicationDestination,
    #[serde(default)]
    pub sync_policy: SyncPolicy,
}

/// Where desired state is rendered from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    pub repo_url: String,

    /// Branch, tag or fixed commit.
    #[serde(default = "default_revision")]
    pub target_revision: String,

    #[serde(default = "default_path")]
    pub path: String,

    /// Rendering parameters handed to the manifest renderer.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

fn default_revision() -> String {
    "HEAD".to_string()
}

fn default_path() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDestination {
    #[serde(default = "default_cluster")]
    pub cluster: String,
    pub namespace: String,
}

fn default_cluster() -> String {
    "in-cluster".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    /// Automated sync; absent means manual.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automated: Option<AutomatedSyncPolicy>,

    /// Overrides the controller's default retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomatedSyncPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delete live resources that are no longer desired.
    #[serde(default)]
    pub prune: bool,

    /// Re-sync when live state drifts at an already synced revision.
    #[serde(default)]
    pub self_heal: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AutomatedSyncPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            prune: false,
            self_heal: false,
        }
    }
}
