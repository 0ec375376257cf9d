//! Test harness wiring an `ApplicationController` over an in-memory cluster.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use syncwarden::auth::SYSTEM_SUBJECT;
use syncwarden::cluster::StatusSimulator;
use syncwarden::source::{RenderRequest, RenderedManifests};
use syncwarden::sync::{ExecutorSettings, RetryPolicy};
use syncwarden::{
    AllowAll, AppKey, Application, ApplicationController, ApplicationStatus, Authorizer,
    ClusterCache, ControllerDeps, ControllerSettings, InMemoryCluster, InMemoryStatusStore,
    Manifest, ManifestRenderer, ResourceKey, SourceError, StatusStore, SyncResult,
};

pub const HEAD_REVISION: &str = "a1b2c3d";

/// Serves fixed documents per application path.
pub struct StaticRenderer {
    documents: Mutex<BTreeMap<String, Vec<Value>>>,
    head: Mutex<String>,
    failure: Mutex<Option<SourceError>>,
}

impl StaticRenderer {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(BTreeMap::new()),
            head: Mutex::new(HEAD_REVISION.to_string()),
            failure: Mutex::new(None),
        }
    }

    pub fn set(&self, path: &str, documents: Vec<Value>) {
        self.documents
            .lock()
            .unwrap()
            .insert(path.to_string(), documents);
    }

    /// Moves the floating revision to `revision`.
    pub fn set_head(&self, revision: &str) {
        *self.head.lock().unwrap() = revision.to_string();
    }

    /// Makes every render fail until cleared with `None`.
    pub fn fail_with(&self, error: Option<SourceError>) {
        *self.failure.lock().unwrap() = error;
    }
}

#[async_trait]
impl ManifestRenderer for StaticRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderedManifests, SourceError> {
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        let documents = self
            .documents
            .lock()
            .unwrap()
            .get(&request.path)
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                repo: request.repo_url.clone(),
                path: request.path.clone(),
            })?;
        let revision = if request.revision == "HEAD" {
            self.head.lock().unwrap().clone()
        } else {
            request.revision.clone()
        };
        Ok(RenderedManifests {
            revision,
            documents,
        })
    }
}

/// Marks every applied Job as complete, standing in for the job controller.
pub fn complete_jobs() -> StatusSimulator {
    Arc::new(|object: &mut Value| {
        if object.get("kind").and_then(Value::as_str) == Some("Job") {
            if let Some(root) = object.as_object_mut() {
                root.insert(
                    "status".to_string(),
                    json!({"conditions": [{"type": "Complete", "status": "True"}]}),
                );
            }
        }
    })
}

/// Marks every applied Job as failed.
pub fn fail_jobs() -> StatusSimulator {
    Arc::new(|object: &mut Value| {
        if object.get("kind").and_then(Value::as_str) == Some("Job") {
            if let Some(root) = object.as_object_mut() {
                root.insert(
                    "status".to_string(),
                    json!({"conditions": [{"type": "Failed", "status": "True", "reason": "BackoffLimitExceeded"}]}),
                );
            }
        }
    })
}

/// Settings with short timeouts and no retries.
pub fn fast_settings() -> ControllerSettings {
    ControllerSettings {
        default_retry: RetryPolicy::none(),
        executor: ExecutorSettings {
            timeout: Duration::from_secs(10),
            hook_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
        },
        ..ControllerSettings::default()
    }
}

/// Isolated controller with an in-memory cluster, status store and renderer.
pub struct TestHarness {
    pub cluster: Arc<InMemoryCluster>,
    pub cache: Arc<ClusterCache>,
    pub renderer: Arc<StaticRenderer>,
    pub store: Arc<InMemoryStatusStore>,
    pub controller: Arc<ApplicationController>,
}

impl TestHarness {
    /// A harness that allows every request.
    pub fn new() -> Self {
        Self::build(Arc::new(AllowAll), fast_settings(), true)
    }

    pub fn with_authorizer(authorizer: Arc<dyn Authorizer>) -> Self {
        Self::build(authorizer, fast_settings(), true)
    }

    pub fn with_settings(settings: ControllerSettings) -> Self {
        Self::build(Arc::new(AllowAll), settings, true)
    }

    /// A harness whose cluster cache never received a listing.
    pub fn unsynced() -> Self {
        Self::build(Arc::new(AllowAll), fast_settings(), false)
    }

    fn build(authorizer: Arc<dyn Authorizer>, settings: ControllerSettings, watch: bool) -> Self {
        let cluster = Arc::new(InMemoryCluster::new());
        let cache = Arc::new(ClusterCache::new());
        if watch {
            cluster.watch(cache.clone());
        }
        let renderer = Arc::new(StaticRenderer::new());
        let store = Arc::new(InMemoryStatusStore::new(10));
        let deps = ControllerDeps {
            renderer: renderer.clone(),
            cluster: cluster.clone(),
            cache: cache.clone(),
            store: store.clone(),
            authorizer,
        };
        let controller = Arc::new(
            ApplicationController::new(deps, settings).expect("Failed to build controller"),
        );
        Self {
            cluster,
            cache,
            renderer,
            store,
            controller,
        }
    }

    /// Registers `app` and the documents its path renders to.
    pub fn add_app(&self, app: Application, documents: Vec<Value>) -> AppKey {
        self.renderer.set(&app.spec.source.path, documents);
        self.controller
            .create_application(SYSTEM_SUBJECT, app)
            .expect("Failed to create application")
            .key()
    }

    /// Edits a live document in place, as an out-of-band change would.
    pub fn mutate_live(&self, key: &ResourceKey, edit: impl FnOnce(&mut Value)) {
        let live = self.cluster.get_now(key).expect("Resource not in cluster");
        let mut object = live.into_value();
        edit(&mut object);
        self.cluster
            .seed(Manifest::from_value(object).expect("Edited document is invalid"));
    }

    pub fn status(&self, key: &AppKey) -> ApplicationStatus {
        self.store.get_status(key).unwrap_or_default()
    }

    /// Runs a manual sync as the system subject and waits for its result.
    pub async fn sync(&self, key: &AppKey, prune: bool) -> SyncResult {
        let request = syncwarden::SyncRequest {
            prune,
            ..Default::default()
        };
        self.controller
            .request_sync(SYSTEM_SUBJECT, key, request)
            .expect("Failed to start sync");
        self.controller
            .wait_for_operation(key)
            .await
            .expect("Operation produced no result")
    }
}
