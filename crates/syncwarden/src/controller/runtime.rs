use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::{ApplicationController, ReconcileWorkerPool, RefreshScheduler};

/// A running controller: refresh triggers plus the reconciliation worker pool.
pub struct ControllerRuntime {
    controller: Arc<ApplicationController>,
    scheduler: RefreshScheduler,
    scheduler_task: JoinHandle<()>,
    pool: ReconcileWorkerPool,
}

impl ControllerRuntime {
    pub fn start(
        controller: Arc<ApplicationController>,
        handle: Handle,
        workers: usize,
        interval: Duration,
    ) -> Self {
        let scheduler = RefreshScheduler::new(Arc::clone(&controller), interval);
        let scheduler_task = scheduler.start(&handle);
        let pool = ReconcileWorkerPool::start(Arc::clone(&controller), handle, workers.max(1));
        Self {
            controller,
            scheduler,
            scheduler_task,
            pool,
        }
    }

    pub fn controller(&self) -> &Arc<ApplicationController> {
        &self.controller
    }

    pub fn trigger_refresh(&self) {
        self.scheduler.trigger();
    }

    /// Stops triggers and workers and waits for in-flight reconciliations.
    /// Running sync operations are cancelled.
    pub async fn shutdown(self) {
        self.scheduler.stop();
        self.controller.queue().shutdown();
        self.pool.shutdown();
        for key in self.controller.app_keys() {
            if let Ok(id) = self.controller.operations().cancel(&key) {
                log::info!("Cancelled operation {} of {} on shutdown", id, key);
            }
        }
        let _ = self.scheduler_task.await;
        let pool = self.pool;
        let _ = tokio::task::spawn_blocking(move || pool.wait()).await;
    }
}
