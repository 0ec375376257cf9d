//! Per-application registry of running sync operations.
//!
//! Admission happens under a single lock so two concurrent requests for the
//! same application can never both be admitted.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;

use crate::error::ControllerError;
use crate::resource::AppKey;
use crate::sync::{CancellationToken, SyncResult};

struct RunningOperation {
    id: String,
    cancel: CancellationToken,
    completion: watch::Sender<Option<SyncResult>>,
}

#[derive(Default)]
pub struct OperationRegistry {
    running: Mutex<HashMap<AppKey, RunningOperation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits operation `id` for `app`, or rejects it when another one is running.
    pub fn try_begin(&self, app: &AppKey, id: &str) -> Result<CancellationToken, ControllerError> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = running.get(app) {
            log::info!(
                "Rejected operation {} for {}: operation {} is running",
                id,
                app,
                existing.id
            );
            return Err(ControllerError::OperationInProgress {
                app: app.to_string(),
            });
        }
        let cancel = CancellationToken::new();
        let (completion, _) = watch::channel(None);
        running.insert(
            app.clone(),
            RunningOperation {
                id: id.to_string(),
                cancel: cancel.clone(),
                completion,
            },
        );
        Ok(cancel)
    }

    /// Releases `app` and publishes the result to waiters. A stale `id` is ignored.
    pub fn finish(&self, app: &AppKey, id: &str, result: &SyncResult) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.get(app).map(|r| r.id.as_str()) != Some(id) {
            log::warn!("Operation {} for {} is not registered", id, app);
            return;
        }
        if let Some(entry) = running.remove(app) {
            entry.completion.send_replace(Some(result.clone()));
        }
    }

    /// Requests cooperative cancellation and returns the id of the cancelled operation.
    pub fn cancel(&self, app: &AppKey) -> Result<String, ControllerError> {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        match running.get(app) {
            Some(entry) => {
                entry.cancel.cancel();
                Ok(entry.id.clone())
            }
            None => Err(ControllerError::NoOperationRunning {
                app: app.to_string(),
            }),
        }
    }

    pub fn is_running(&self, app: &AppKey) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(app)
    }

    pub fn running_id(&self, app: &AppKey) -> Option<String> {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(app)
            .map(|r| r.id.clone())
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// A receiver resolving to the result of the running operation, if any.
    pub fn subscribe(&self, app: &AppKey) -> Option<watch::Receiver<Option<SyncResult>>> {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(app)
            .map(|r| r.completion.subscribe())
    }
}
