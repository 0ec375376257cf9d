pub mod auth;
pub mod broadcast;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod diff;
pub mod error;
pub mod gitops;
pub mod health;
pub mod normalize;
pub mod repository;
pub mod resource;
pub mod source;
pub mod store;
pub mod sync;

pub use auth::{AllowAll, Authorizer, Policy, PolicyAuthorizer};
pub use broadcast::{OperationBroadcaster, OperationEvent};
pub use cluster::{ClusterCache, ClusterClient, ClusterError, InMemoryCluster};
pub use config::{load_config, ControllerConfig};
pub use controller::{
    ApplicationController, ControllerDeps, ControllerRuntime, ControllerSettings, SyncRequest,
};
pub use diff::{Comparison, DiffClassification, DiffEngine, ResourceDiff, SyncStatusCode};
pub use error::{ConfigError, ControllerError, ResourceError, Result, ValidationError};
pub use gitops::{ApplicationLoader, ApplicationWatcher, GitOpsError};
pub use health::{HealthAssessor, HealthStatus, HealthStatusCode};
pub use repository::{Repository, RepositoryError, RepositoryService, RepositoryView};
pub use resource::{AppKey, Application, Manifest, ResourceKey};
pub use source::{CachingRenderer, DirectoryRenderer, ManifestRenderer, SourceError};
pub use store::{ApplicationStatus, InMemoryStatusStore, StatusStore};
pub use sync::{OperationPhase, SyncOperation, SyncOptions, SyncResult};
