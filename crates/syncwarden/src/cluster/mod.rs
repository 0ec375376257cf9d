//! Cluster boundary: mutation interface, watch events and the shared state cache.

pub mod cache;
pub mod error;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use cache::{ClusterCache, ClusterSnapshot};
pub use error::ClusterError;
pub use memory::{InMemoryCluster, StatusSimulator};

use crate::resource::{Manifest, ResourceKey};

/// Outcome of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Mutation interface used by the sync executor.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Creates or updates a resource and returns the stored document.
    /// With `dry_run` the request is validated but nothing is persisted.
    async fn apply(&self, manifest: &Manifest, dry_run: bool) -> Result<Manifest, ClusterError>;

    async fn delete(&self, key: &ResourceKey, dry_run: bool)
        -> Result<DeleteOutcome, ClusterError>;

    /// Reads the current document directly from the cluster.
    async fn get(&self, key: &ResourceKey) -> Result<Option<Manifest>, ClusterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterEventType {
    Added,
    Modified,
    Deleted,
}

/// A change to one live resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterEvent {
    pub event_type: ClusterEventType,
    pub key: ResourceKey,
    /// Document after the change; the last known document for deletions.
    pub object: Manifest,
}

/// Receives the watch stream of a cluster.
pub trait ClusterWatcher: Send + Sync {
    /// Replaces all known state with a full listing.
    fn resync(&self, resources: Vec<Manifest>);

    fn on_event(&self, event: ClusterEvent);
}
