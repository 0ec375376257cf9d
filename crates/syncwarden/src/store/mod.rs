//! Status persistence boundary.

pub mod status;

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

pub use status::{
    ApplicationCondition, ApplicationStatus, ConditionType, ResourceStatus, SyncStatus,
};

use crate::resource::AppKey;
use crate::sync::SyncResult;

/// Where the reconciler writes application status and sync history.
pub trait StatusStore: Send + Sync {
    fn get_status(&self, app: &AppKey) -> Option<ApplicationStatus>;

    /// Atomically updates the status of `app`, creating a default one if absent.
    fn update_status(&self, app: &AppKey, update: &mut dyn FnMut(&mut ApplicationStatus));

    /// Appends a terminal result to the history of `app`.
    fn record_result(&self, app: &AppKey, result: SyncResult);

    /// Retained results, oldest first.
    fn history(&self, app: &AppKey) -> Vec<SyncResult>;

    fn remove(&self, app: &AppKey);
}

#[derive(Default)]
struct Entry {
    status: ApplicationStatus,
    history: VecDeque<SyncResult>,
}

/// Keeps status in memory with a bounded history per application.
pub struct InMemoryStatusStore {
    history_limit: usize,
    entries: RwLock<HashMap<AppKey, Entry>>,
}

impl InMemoryStatusStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            history_limit: history_limit.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }
}

impl StatusStore for InMemoryStatusStore {
    fn get_status(&self, app: &AppKey) -> Option<ApplicationStatus> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(app)
            .map(|e| e.status.clone())
    }

    fn update_status(&self, app: &AppKey, update: &mut dyn FnMut(&mut ApplicationStatus)) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        update(&mut entries.entry(app.clone()).or_default().status);
    }

    fn record_result(&self, app: &AppKey, result: SyncResult) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let history = &mut entries.entry(app.clone()).or_default().history;
        history.push_back(result);
        while history.len() > self.history_limit {
            if let Some(dropped) = history.pop_front() {
                log::debug!(
                    "Dropped sync result {} of {} from history",
                    dropped.operation_id,
                    app
                );
            }
        }
    }

    fn history(&self, app: &AppKey) -> Vec<SyncResult> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(app)
            .map(|e| e.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn remove(&self, app: &AppKey) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(app);
    }
}
