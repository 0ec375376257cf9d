//! The application controller: reconciliation loop and the operations exposed to callers.
//!
//! Every externally triggered action is authorized before any state changes.
//! Reconciliation passes are driven by a [`WorkQueue`] drained by a
//! [`ReconcileWorkerPool`]; sync operations run as independent tokio tasks
//! admitted through the [`OperationRegistry`].

pub mod operations;
pub mod pool;
pub mod queue;
pub mod reconcile;
pub mod runtime;
pub mod scheduler;
pub mod sync;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

pub use operations::OperationRegistry;
pub use pool::ReconcileWorkerPool;
pub use queue::WorkQueue;
pub use reconcile::ReconcileOutcome;
pub use runtime::ControllerRuntime;
pub use scheduler::RefreshScheduler;
pub use sync::SyncRequest;

use crate::auth::{
    authorize, Authorizer, ACTION_CREATE, ACTION_DELETE, ACTION_GET, ACTION_UPDATE,
    RESOURCE_APPLICATIONS, SYSTEM_SUBJECT,
};
use crate::broadcast::OperationBroadcaster;
use crate::cluster::{ClusterCache, ClusterClient, ClusterEvent};
use crate::config::{ControllerConfig, ResourceOverride};
use crate::diff::{CompareOptions, DiffEngine};
use crate::error::{ConfigError, ControllerError, Result};
use crate::health::HealthAssessor;
use crate::normalize::NormalizerRegistry;
use crate::repository::normalize_repo_url;
use crate::resource::{AppKey, Application, DEFAULT_TRACKING_LABEL};
use crate::source::ManifestRenderer;
use crate::store::{ApplicationStatus, StatusStore};
use crate::sync::{kind_tier, ExecutorSettings, RetryPolicy, SyncExecutor, SyncResult};

/// Collaborators the controller talks to.
pub struct ControllerDeps {
    pub renderer: Arc<dyn ManifestRenderer>,
    pub cluster: Arc<dyn ClusterClient>,
    pub cache: Arc<ClusterCache>,
    pub store: Arc<dyn StatusStore>,
    pub authorizer: Arc<dyn Authorizer>,
}

/// Tunables derived from [`ControllerConfig`].
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub tracking_label: String,
    pub compare_options: CompareOptions,
    /// Used when an application sets no retry policy.
    pub default_retry: RetryPolicy,
    pub executor: ExecutorSettings,
    pub resource_overrides: Vec<ResourceOverride>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            tracking_label: DEFAULT_TRACKING_LABEL.to_string(),
            compare_options: CompareOptions::default(),
            default_retry: RetryPolicy::default(),
            executor: ExecutorSettings::default(),
            resource_overrides: Vec::new(),
        }
    }
}

impl From<&ControllerConfig> for ControllerSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            tracking_label: config.reconciliation.tracking_label.clone(),
            compare_options: config.compare_options(),
            default_retry: config.sync.retry.clone(),
            executor: config.executor_settings(),
            resource_overrides: config.diff.resource_overrides.clone(),
        }
    }
}

pub struct ApplicationController {
    applications: RwLock<BTreeMap<AppKey, Application>>,
    renderer: Arc<dyn ManifestRenderer>,
    cluster: Arc<dyn ClusterClient>,
    cache: Arc<ClusterCache>,
    store: Arc<dyn StatusStore>,
    authorizer: Arc<dyn Authorizer>,
    diff: DiffEngine,
    health: Arc<HealthAssessor>,
    executor: Arc<SyncExecutor>,
    operations: OperationRegistry,
    queue: Arc<WorkQueue>,
    broadcaster: OperationBroadcaster,
    settings: ControllerSettings,
}

impl ApplicationController {
    pub fn new(
        deps: ControllerDeps,
        settings: ControllerSettings,
    ) -> std::result::Result<Self, ConfigError> {
        Self::with_health(deps, settings, HealthAssessor::builtin())
    }

    /// Like [`new`](Self::new) with a custom health rule set.
    pub fn with_health(
        deps: ControllerDeps,
        settings: ControllerSettings,
        health: HealthAssessor,
    ) -> std::result::Result<Self, ConfigError> {
        let registry = NormalizerRegistry::with_overrides(&settings.resource_overrides)?;
        let health = Arc::new(health);
        let executor = Arc::new(SyncExecutor::new(
            Arc::clone(&deps.cluster),
            Arc::clone(&health),
            settings.executor.clone(),
        ));
        Ok(Self {
            applications: RwLock::new(BTreeMap::new()),
            renderer: deps.renderer,
            cluster: deps.cluster,
            cache: deps.cache,
            store: deps.store,
            authorizer: deps.authorizer,
            diff: DiffEngine::new(Arc::new(registry)),
            health,
            executor,
            operations: OperationRegistry::new(),
            queue: Arc::new(WorkQueue::new()),
            broadcaster: OperationBroadcaster::default(),
            settings,
        })
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    pub fn cache(&self) -> &Arc<ClusterCache> {
        &self.cache
    }

    pub fn operations(&self) -> &OperationRegistry {
        &self.operations
    }

    pub fn broadcaster(&self) -> &OperationBroadcaster {
        &self.broadcaster
    }

    // ------------------------------------------------------------------
    // Applications
    // ------------------------------------------------------------------

    pub fn create_application(&self, subject: &str, application: Application) -> Result<Application> {
        let key = application.key();
        self.authorize(subject, ACTION_CREATE, &key)?;
        application
            .validate()
            .map_err(ControllerError::InvalidApplication)?;
        {
            let mut applications = self.applications.write().unwrap_or_else(|e| e.into_inner());
            if applications.contains_key(&key) {
                return Err(ControllerError::ApplicationExists(key.to_string()));
            }
            applications.insert(key.clone(), application.clone());
        }
        log::info!("Created application {}", key);
        self.queue.add(key);
        Ok(application)
    }

    pub fn update_application(&self, subject: &str, application: Application) -> Result<Application> {
        let key = application.key();
        self.authorize(subject, ACTION_UPDATE, &key)?;
        application
            .validate()
            .map_err(ControllerError::InvalidApplication)?;
        {
            let mut applications = self.applications.write().unwrap_or_else(|e| e.into_inner());
            let Some(existing) = applications.get_mut(&key) else {
                return Err(ControllerError::ApplicationNotFound(key.to_string()));
            };
            *existing = application.clone();
        }
        log::info!("Updated application {}", key);
        self.queue.add(key);
        Ok(application)
    }

    /// Creates or updates an application.
    pub fn apply_application(&self, subject: &str, application: Application) -> Result<Application> {
        let exists = self
            .applications
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&application.key());
        if exists {
            self.update_application(subject, application)
        } else {
            self.create_application(subject, application)
        }
    }

    /// Removes an application. With `cascade`, its tracked live resources are
    /// deleted too, dependents first.
    pub async fn delete_application(&self, subject: &str, key: &AppKey, cascade: bool) -> Result<()> {
        self.authorize(subject, ACTION_DELETE, key)?;
        let removed = self
            .applications
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        let Some(application) = removed else {
            return Err(ControllerError::ApplicationNotFound(key.to_string()));
        };

        if let Ok(id) = self.operations.cancel(key) {
            log::info!("Cancelled operation {} of deleted application {}", id, key);
        }
        self.store.remove(key);

        if cascade {
            let mut tracked = self
                .cache
                .list_tracked(&self.settings.tracking_label, application.name());
            tracked.sort_by_key(|m| std::cmp::Reverse(kind_tier(m.kind())));
            let mut first_error = None;
            for manifest in tracked {
                let resource = manifest.key();
                match self.cluster.delete(&resource, false).await {
                    Ok(_) => log::info!("Deleted {} of application {}", resource, key),
                    Err(e) => {
                        log::error!("Failed to delete {} of application {}: {}", resource, key, e);
                        first_error.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e.into());
            }
        }
        log::info!("Deleted application {}", key);
        Ok(())
    }

    pub fn get_application(&self, subject: &str, key: &AppKey) -> Result<Application> {
        self.authorize(subject, ACTION_GET, key)?;
        self.application(key)
            .ok_or_else(|| ControllerError::ApplicationNotFound(key.to_string()))
    }

    /// Applications the subject may read.
    pub fn list_applications(&self, subject: &str) -> Vec<Application> {
        self.applications
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|a| self.authorize_quiet(subject, ACTION_GET, &a.key()))
            .cloned()
            .collect()
    }

    pub fn get_status(&self, subject: &str, key: &AppKey) -> Result<ApplicationStatus> {
        self.authorize(subject, ACTION_GET, key)?;
        if self.application(key).is_none() {
            return Err(ControllerError::ApplicationNotFound(key.to_string()));
        }
        Ok(self.store.get_status(key).unwrap_or_default())
    }

    /// Retained sync results, oldest first.
    pub fn history(&self, subject: &str, key: &AppKey) -> Result<Vec<SyncResult>> {
        self.authorize(subject, ACTION_GET, key)?;
        Ok(self.store.history(key))
    }

    pub fn app_keys(&self) -> Vec<AppKey> {
        self.applications
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------

    /// Queues a refresh of every application.
    pub fn refresh_all(&self) {
        for key in self.app_keys() {
            self.queue.add(key);
        }
    }

    /// Queues a refresh of every application sourced from `repo_url`.
    pub fn notify_source_changed(&self, repo_url: &str) -> usize {
        let url = normalize_repo_url(repo_url);
        let keys: Vec<AppKey> = self
            .applications
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|a| normalize_repo_url(&a.spec.source.repo_url) == url)
            .map(Application::key)
            .collect();
        log::debug!("Source {} changed, refreshing {} application(s)", url, keys.len());
        let count = keys.len();
        for key in keys {
            self.queue.add(key);
        }
        count
    }

    /// Queues the applications a cluster change concerns: those tracking the
    /// resource by label and those whose last status lists it.
    pub fn notify_cluster_event(&self, event: &ClusterEvent) -> usize {
        let owner = event.object.label(&self.settings.tracking_label);
        let keys: Vec<AppKey> = self
            .app_keys()
            .into_iter()
            .filter(|key| {
                owner == Some(key.name.as_str())
                    || self
                        .store
                        .get_status(key)
                        .map(|s| s.sync.resources.iter().any(|r| r.key == event.key))
                        .unwrap_or(false)
            })
            .collect();
        let count = keys.len();
        for key in keys {
            self.queue.add(key);
        }
        count
    }

    pub(crate) fn application(&self, key: &AppKey) -> Option<Application> {
        self.applications
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn authorize(&self, subject: &str, action: &str, key: &AppKey) -> Result<()> {
        authorize(
            self.authorizer.as_ref(),
            subject,
            RESOURCE_APPLICATIONS,
            action,
            &key.to_string(),
        )
    }

    fn authorize_quiet(&self, subject: &str, action: &str, key: &AppKey) -> bool {
        subject == SYSTEM_SUBJECT
            || self
                .authorizer
                .enforce(subject, RESOURCE_APPLICATIONS, action, &key.to_string())
    }
}
