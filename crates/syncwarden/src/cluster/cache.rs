//! Shared, continuously updated view of live cluster state.
//!
//! Readers load the current snapshot without locking; every watch event
//! publishes a new snapshot with copy-on-write.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;

use super::{ClusterEvent, ClusterEventType, ClusterWatcher};
use crate::resource::{Manifest, ResourceKey};

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Immutable point-in-time view of the cluster.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    resources: BTreeMap<ResourceKey, Arc<Manifest>>,
}

impl ClusterSnapshot {
    pub fn get(&self, key: &ResourceKey) -> Option<Arc<Manifest>> {
        self.resources.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources whose `label` equals `value`.
    pub fn list_tracked(&self, label: &str, value: &str) -> Vec<Arc<Manifest>> {
        self.resources
            .values()
            .filter(|m| m.label(label) == Some(value))
            .cloned()
            .collect()
    }
}

pub struct ClusterCache {
    snapshot: ArcSwap<ClusterSnapshot>,
    synced: AtomicBool,
    events: broadcast::Sender<ClusterEvent>,
}

impl ClusterCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a cache whose event stream buffers `capacity` events per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            snapshot: ArcSwap::from_pointee(ClusterSnapshot::default()),
            synced: AtomicBool::new(false),
            events,
        }
    }

    /// True once a full listing has been received.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    /// Marks the cache as stale, e.g. after the watch connection dropped.
    pub fn invalidate(&self) {
        self.synced.store(false, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Arc<ClusterSnapshot> {
        self.snapshot.load_full()
    }

    pub fn get(&self, key: &ResourceKey) -> Option<Arc<Manifest>> {
        self.snapshot.load().get(key)
    }

    pub fn list_tracked(&self, label: &str, value: &str) -> Vec<Arc<Manifest>> {
        self.snapshot.load().list_tracked(label, value)
    }

    /// Subscribes to change events applied after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: ClusterEvent) {
        if let Err(e) = self.events.send(event) {
            log::debug!("No cluster event subscribers: {}", e);
        }
    }
}

impl Default for ClusterCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterWatcher for ClusterCache {
    fn resync(&self, resources: Vec<Manifest>) {
        let resources = resources
            .into_iter()
            .map(|m| (m.key(), Arc::new(m)))
            .collect();
        self.snapshot.store(Arc::new(ClusterSnapshot { resources }));
        self.synced.store(true, Ordering::SeqCst);
        log::debug!("Cluster cache resynced ({} resources)", self.snapshot.load().len());
    }

    fn on_event(&self, event: ClusterEvent) {
        let object = Arc::new(event.object.clone());
        self.snapshot.rcu(|current| {
            let mut next = ClusterSnapshot::clone(current);
            match event.event_type {
                ClusterEventType::Added | ClusterEventType::Modified => {
                    next.resources.insert(event.key.clone(), object.clone());
                }
                ClusterEventType::Deleted => {
                    next.resources.remove(&event.key);
                }
            }
            next
        });
        self.publish(event);
    }
}
